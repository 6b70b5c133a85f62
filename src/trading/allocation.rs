//! Capital Allocation
//!
//! Blends the regime template with per-domain conviction, dampens domains
//! named by risk breaches, clamps to per-domain bounds and caps the total
//! invested fraction. Whatever is not allocated is held as cash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::domain::Domain;
use super::regime::MarketRegime;
use super::signals::SignalBundle;
use crate::errors::{OrchestraError, OrchestraResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocationConstraint {
    pub min: f64,
    pub max: f64,
}

impl AllocationConstraint {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, fraction: f64) -> f64 {
        fraction.min(self.max).max(self.min)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UrgencyThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl Default for UrgencyThresholds {
    fn default() -> Self {
        Self {
            low: 0.03,
            medium: 0.07,
            high: 0.12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    pub constraints: BTreeMap<Domain, AllocationConstraint>,

    /// Allocation shift per unit of average conviction
    pub conviction_weight: f64,

    /// Ceiling on the invested fraction; the rest is cash
    pub max_total_allocation: f64,

    /// Multiplier on a domain's ceiling when a risk breach names it
    pub breach_dampening: BTreeMap<Domain, f64>,

    pub urgency: UrgencyThresholds,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            constraints: BTreeMap::from([
                (Domain::Bonds, AllocationConstraint::new(0.05, 0.60)),
                (Domain::Crypto, AllocationConstraint::new(0.0, 0.35)),
                (Domain::RealEstate, AllocationConstraint::new(0.05, 0.45)),
                (Domain::Distressed, AllocationConstraint::new(0.05, 0.65)),
            ]),
            conviction_weight: 0.3,
            max_total_allocation: 0.95,
            breach_dampening: Domain::ALL.into_iter().map(|d| (d, 0.5)).collect(),
            urgency: UrgencyThresholds::default(),
        }
    }
}

impl AllocatorConfig {
    pub fn validate(&self) -> OrchestraResult<()> {
        for (domain, c) in &self.constraints {
            if !(0.0 <= c.min && c.min <= c.max && c.max <= 1.0) {
                return Err(OrchestraError::config_error(format!(
                    "allocation bounds for {} must satisfy 0 <= min <= max <= 1, got [{}, {}]",
                    domain, c.min, c.max
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.max_total_allocation) {
            return Err(OrchestraError::config_error(format!(
                "max_total_allocation must be within [0, 1], got {}",
                self.max_total_allocation
            )));
        }
        if self.breach_dampening.values().any(|f| !(0.0..=1.0).contains(f)) {
            return Err(OrchestraError::config_error("breach dampening factors must be within [0, 1]"));
        }
        Ok(())
    }

    pub fn constraint_for(&self, domain: Domain) -> AllocationConstraint {
        self.constraints
            .get(&domain)
            .copied()
            .unwrap_or(AllocationConstraint::new(0.0, 1.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceUrgency {
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationTarget {
    pub target: f64,
    pub min: f64,
    pub max: f64,
    pub current: f64,
    pub regime_base: f64,
    pub conviction_adjustment: f64,
    pub risk_adjustment: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub targets: BTreeMap<Domain, AllocationTarget>,
    pub cash_reserve: f64,
    pub total_allocated: f64,
    pub regime: MarketRegime,
    pub rebalance_urgency: RebalanceUrgency,
    pub timestamp: DateTime<Utc>,
}

impl AllocationPlan {
    pub fn target_fractions(&self) -> BTreeMap<Domain, f64> {
        self.targets.iter().map(|(d, t)| (*d, t.target)).collect()
    }
}

pub struct CapitalAllocator {
    config: AllocatorConfig,
    current: BTreeMap<Domain, f64>,
    history: Vec<AllocationPlan>,
}

impl CapitalAllocator {
    pub fn new(config: AllocatorConfig) -> Self {
        Self {
            config,
            current: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    pub fn set_current_allocations(&mut self, current: BTreeMap<Domain, f64>) {
        self.current = current;
    }

    pub fn current_allocations(&self) -> &BTreeMap<Domain, f64> {
        &self.current
    }

    pub fn allocate(
        &mut self,
        regime_allocations: &BTreeMap<Domain, f64>,
        bundles: &[SignalBundle],
        risk_breaches: &[String],
        regime: MarketRegime,
    ) -> AllocationPlan {
        let mut raw = regime_allocations.clone();

        let mut conviction_adjustments = BTreeMap::new();
        for bundle in bundles {
            let adjustment = bundle.average_conviction() * self.config.conviction_weight;
            *conviction_adjustments.entry(bundle.domain).or_insert(0.0) += adjustment;
            *raw.entry(bundle.domain).or_insert(0.0) += adjustment;
        }

        let mut risk_adjustments = BTreeMap::new();
        for breach in risk_breaches {
            let breach = breach.to_ascii_lowercase();
            for (domain, factor) in &self.config.breach_dampening {
                if !breach.contains(domain.as_str()) {
                    continue;
                }
                let ceiling = self.config.constraint_for(*domain).max * factor;
                let before = raw.get(domain).copied().unwrap_or(0.0);
                let after = before.min(ceiling);
                if after < before {
                    warn!("Dampening {} allocation to {:.4} after risk breach", domain, after);
                    *risk_adjustments.entry(*domain).or_insert(0.0) += after - before;
                }
                raw.insert(*domain, after);
            }
        }

        for (domain, fraction) in raw.iter_mut() {
            *fraction = self.config.constraint_for(*domain).clamp(*fraction);
        }

        let total: f64 = raw.values().sum();
        if total > self.config.max_total_allocation && total > 0.0 {
            let scale = self.config.max_total_allocation / total;
            for fraction in raw.values_mut() {
                *fraction *= scale;
            }
        }
        for fraction in raw.values_mut() {
            *fraction = fraction.max(0.0);
        }
        let total: f64 = raw.values().sum();

        let mut max_drift = 0.0_f64;
        let targets: BTreeMap<Domain, AllocationTarget> = raw
            .iter()
            .map(|(domain, target)| {
                let constraint = self.config.constraint_for(*domain);
                let current = self.current.get(domain).copied().unwrap_or(0.0);
                max_drift = max_drift.max((target - current).abs());
                let record = AllocationTarget {
                    target: *target,
                    min: constraint.min,
                    max: constraint.max,
                    current,
                    regime_base: regime_allocations.get(domain).copied().unwrap_or(0.0),
                    conviction_adjustment: conviction_adjustments.get(domain).copied().unwrap_or(0.0),
                    risk_adjustment: risk_adjustments.get(domain).copied().unwrap_or(0.0),
                };
                (*domain, record)
            })
            .collect();

        let plan = AllocationPlan {
            targets,
            cash_reserve: 1.0 - total,
            total_allocated: total,
            regime,
            rebalance_urgency: self.urgency_for(max_drift),
            timestamp: Utc::now(),
        };
        info!(
            "Allocation plan for {}: {:.1}% invested, {:.1}% cash, urgency {:?}",
            regime,
            total * 100.0,
            plan.cash_reserve * 100.0,
            plan.rebalance_urgency
        );
        self.history.push(plan.clone());
        plan
    }

    fn urgency_for(&self, drift: f64) -> RebalanceUrgency {
        let t = &self.config.urgency;
        if drift >= t.high {
            RebalanceUrgency::High
        } else if drift >= t.medium {
            RebalanceUrgency::Medium
        } else if drift >= t.low {
            RebalanceUrgency::Low
        } else {
            RebalanceUrgency::None
        }
    }

    /// The most recent `n` plans, oldest first
    pub fn history(&self, n: usize) -> &[AllocationPlan] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }
}
