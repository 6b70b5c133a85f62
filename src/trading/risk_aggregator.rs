//! Cross-Domain Risk Aggregation
//! Composes per-domain risk into portfolio VaR with a correlation matrix and
//! evaluates the configured risk limits against the result.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use super::domain::Domain;
use super::risk_models::{DomainRisk, RiskMetrics};
use crate::errors::{OrchestraError, OrchestraResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitStatus {
    Ok,
    Warning,
    Critical,
    Breached,
}

impl std::fmt::Display for LimitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitStatus::Ok => write!(f, "ok"),
            LimitStatus::Warning => write!(f, "warning"),
            LimitStatus::Critical => write!(f, "critical"),
            LimitStatus::Breached => write!(f, "breached"),
        }
    }
}

/// Portfolio quantity a limit is checked against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metric", rename_all = "snake_case")]
pub enum LimitMetric {
    PortfolioVar,
    MaxDrawdown,
    GrossExposure,
    Concentration,
    DomainAllocation { domain: Domain },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimit {
    pub name: String,
    pub metric: LimitMetric,
    pub warning: f64,
    pub critical: f64,
    pub hard: f64,
}

impl RiskLimit {
    pub fn new(name: &str, metric: LimitMetric, warning: f64, critical: f64, hard: f64) -> Self {
        Self {
            name: name.to_string(),
            metric,
            warning,
            critical,
            hard,
        }
    }

    /// Thresholds compare on magnitude so drawdown limits work with negative values
    pub fn evaluate(&self, current: f64) -> LimitStatus {
        let magnitude = current.abs();
        if magnitude >= self.hard.abs() {
            LimitStatus::Breached
        } else if magnitude >= self.critical.abs() {
            LimitStatus::Critical
        } else if magnitude >= self.warning.abs() {
            LimitStatus::Warning
        } else {
            LimitStatus::Ok
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitEvaluation {
    pub name: String,
    pub current: f64,
    pub warning: f64,
    pub critical: f64,
    pub hard: f64,
    pub status: LimitStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationEntry {
    pub a: Domain,
    pub b: Domain,
    pub rho: f64,
}

impl CorrelationEntry {
    fn new(a: Domain, b: Domain, rho: f64) -> Self {
        Self { a, b, rho }
    }
}

/// Risk aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub limits: Vec<RiskLimit>,

    /// Symmetric pairwise correlations; unlisted pairs are uncorrelated
    pub correlations: Vec<CorrelationEntry>,

    /// Volatility assumed for a domain without a VaR
    pub default_volatility: f64,

    /// CVaR as a multiple of VaR
    pub cvar_multiplier: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            limits: vec![
                RiskLimit::new("portfolio_var_95", LimitMetric::PortfolioVar, 0.02, 0.04, 0.05),
                RiskLimit::new("max_drawdown", LimitMetric::MaxDrawdown, -0.10, -0.15, -0.20),
                RiskLimit::new("gross_exposure", LimitMetric::GrossExposure, 0.80, 0.90, 1.0),
                RiskLimit::new(
                    "single_asset_concentration",
                    LimitMetric::Concentration,
                    0.30,
                    0.40,
                    0.50,
                ),
                RiskLimit::new(
                    "crypto_allocation",
                    LimitMetric::DomainAllocation {
                        domain: Domain::Crypto,
                    },
                    0.25,
                    0.30,
                    0.35,
                ),
            ],
            correlations: vec![
                CorrelationEntry::new(Domain::Bonds, Domain::Crypto, -0.15),
                CorrelationEntry::new(Domain::Bonds, Domain::RealEstate, 0.30),
                CorrelationEntry::new(Domain::Bonds, Domain::Distressed, 0.25),
                CorrelationEntry::new(Domain::Crypto, Domain::RealEstate, 0.10),
                CorrelationEntry::new(Domain::Crypto, Domain::Distressed, 0.05),
                CorrelationEntry::new(Domain::RealEstate, Domain::Distressed, 0.40),
            ],
            default_volatility: 0.02, // 2% when a domain reports no VaR
            cvar_multiplier: 1.4,     // normal-tail approximation
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> OrchestraResult<()> {
        for entry in &self.correlations {
            if !(-1.0..=1.0).contains(&entry.rho) {
                return Err(OrchestraError::config_error(format!(
                    "correlation {}-{} = {} is outside [-1, 1]",
                    entry.a, entry.b, entry.rho
                )));
            }
        }
        for limit in &self.limits {
            let (w, c, h) = (limit.warning.abs(), limit.critical.abs(), limit.hard.abs());
            if !(w <= c && c <= h) {
                return Err(OrchestraError::config_error(format!(
                    "limit '{}' thresholds must increase in magnitude",
                    limit.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRiskSummary {
    pub allocation: f64,
    pub var_95: Option<f64>,
    pub cvar_95: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub detail: Option<DomainRisk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRiskSummary {
    pub portfolio_var_95: f64,
    pub portfolio_cvar_95: f64,
    pub max_drawdown: f64,
    pub gross_exposure: f64,
    pub net_exposure: f64,
    pub concentration: f64,
    pub limits: Vec<LimitEvaluation>,
    /// Limits at critical or breached, as "name: status (value)"
    pub breached_limits: Vec<String>,
    pub domain_risks: BTreeMap<Domain, DomainRiskSummary>,
    pub correlations: BTreeMap<String, f64>,
}

pub struct RiskAggregator {
    config: RiskConfig,
    correlations: BTreeMap<(Domain, Domain), f64>,
    domain_risks: BTreeMap<Domain, RiskMetrics>,
    allocations: BTreeMap<Domain, f64>,
}

fn ordered(a: Domain, b: Domain) -> (Domain, Domain) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl RiskAggregator {
    pub fn new(config: RiskConfig) -> Self {
        let correlations = config
            .correlations
            .iter()
            .map(|entry| (ordered(entry.a, entry.b), entry.rho))
            .collect();
        Self {
            config,
            correlations,
            domain_risks: BTreeMap::new(),
            allocations: BTreeMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RiskConfig::default())
    }

    pub fn update_domain_risk(&mut self, metrics: RiskMetrics) {
        self.domain_risks.insert(metrics.domain, metrics);
    }

    pub fn remove_domain_risk(&mut self, domain: Domain) {
        self.domain_risks.remove(&domain);
    }

    /// Merge allocation fractions; last write wins per domain
    pub fn update_allocations(&mut self, allocations: &BTreeMap<Domain, f64>) {
        for (domain, fraction) in allocations {
            self.allocations.insert(*domain, *fraction);
        }
    }

    /// Replace the allocation map; domains absent from `allocations` drop out
    pub fn set_allocations(&mut self, allocations: BTreeMap<Domain, f64>) {
        self.allocations = allocations;
    }

    pub fn domain_risk(&self, domain: Domain) -> Option<&RiskMetrics> {
        self.domain_risks.get(&domain)
    }

    pub fn allocations(&self) -> &BTreeMap<Domain, f64> {
        &self.allocations
    }

    pub fn correlation(&self, a: Domain, b: Domain) -> f64 {
        if a == b {
            return 1.0;
        }
        self.correlations.get(&ordered(a, b)).copied().unwrap_or(0.0)
    }

    fn volatility(&self, domain: Domain) -> f64 {
        self.domain_risks
            .get(&domain)
            .and_then(|r| r.var_95)
            .filter(|v| *v != 0.0 && v.is_finite())
            .unwrap_or(self.config.default_volatility)
    }

    /// sqrt of sum_i sum_j w_i w_j s_i s_j rho_ij over allocated domains
    pub fn portfolio_var(&self) -> f64 {
        let mut variance = 0.0;
        for (a, wa) in &self.allocations {
            for (b, wb) in &self.allocations {
                variance += wa * wb * self.volatility(*a) * self.volatility(*b) * self.correlation(*a, *b);
            }
        }
        variance.max(0.0).sqrt()
    }

    fn metric_value(&self, metric: &LimitMetric, summary: &PortfolioRiskSummary) -> f64 {
        match metric {
            LimitMetric::PortfolioVar => summary.portfolio_var_95,
            LimitMetric::MaxDrawdown => summary.max_drawdown,
            LimitMetric::GrossExposure => summary.gross_exposure,
            LimitMetric::Concentration => summary.concentration,
            LimitMetric::DomainAllocation { domain } => {
                self.allocations.get(domain).copied().unwrap_or(0.0)
            }
        }
    }

    pub fn aggregate(&self) -> PortfolioRiskSummary {
        let portfolio_var_95 = self.portfolio_var();
        let max_drawdown = self
            .domain_risks
            .values()
            .filter_map(|r| r.max_drawdown)
            .fold(0.0_f64, f64::min);
        let concentration = self
            .allocations
            .values()
            .map(|w| w.abs())
            .fold(0.0_f64, f64::max);

        let mut domains: Vec<Domain> = self.domain_risks.keys().copied().collect();
        domains.extend(self.allocations.keys().copied());
        domains.sort();
        domains.dedup();
        let domain_risks = domains
            .into_iter()
            .map(|domain| {
                let risk = self.domain_risks.get(&domain);
                let summary = DomainRiskSummary {
                    allocation: self.allocations.get(&domain).copied().unwrap_or(0.0),
                    var_95: risk.and_then(|r| r.var_95),
                    cvar_95: risk.and_then(|r| r.cvar_95),
                    max_drawdown: risk.and_then(|r| r.max_drawdown),
                    detail: risk.and_then(|r| r.detail.clone()),
                };
                (domain, summary)
            })
            .collect();

        let correlations = self
            .correlations
            .iter()
            .map(|((a, b), rho)| {
                let (first, second) = if a.as_str() <= b.as_str() { (a, b) } else { (b, a) };
                (format!("{}__{}", first, second), *rho)
            })
            .collect();

        let mut summary = PortfolioRiskSummary {
            portfolio_var_95,
            portfolio_cvar_95: portfolio_var_95 * self.config.cvar_multiplier,
            max_drawdown,
            gross_exposure: self.allocations.values().map(|w| w.abs()).sum(),
            net_exposure: self.allocations.values().sum(),
            concentration,
            limits: Vec::new(),
            breached_limits: Vec::new(),
            domain_risks,
            correlations,
        };

        for limit in &self.config.limits {
            let current = self.metric_value(&limit.metric, &summary);
            let status = limit.evaluate(current);
            if matches!(status, LimitStatus::Breached | LimitStatus::Critical) {
                warn!("Risk limit {} is {} at {:.4}", limit.name, status, current);
                summary
                    .breached_limits
                    .push(format!("{}: {} ({:.4})", limit.name, status, current));
            }
            summary.limits.push(LimitEvaluation {
                name: limit.name.clone(),
                current,
                warning: limit.warning,
                critical: limit.critical,
                hard: limit.hard,
                status,
            });
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(domain: Domain, var_95: f64, max_drawdown: f64) -> RiskMetrics {
        RiskMetrics {
            var_95: Some(var_95),
            cvar_95: Some(var_95 * 1.4),
            max_drawdown: Some(max_drawdown),
            ..RiskMetrics::empty(domain)
        }
    }

    #[test]
    fn test_two_domain_variance() {
        let mut agg = RiskAggregator::with_defaults();
        agg.update_domain_risk(metrics(Domain::Bonds, 0.01, -0.05));
        agg.update_domain_risk(metrics(Domain::Crypto, 0.04, -0.20));
        agg.update_allocations(&BTreeMap::from([(Domain::Bonds, 0.5), (Domain::Crypto, 0.5)]));

        let variance: f64 = 0.25 * 0.0001 + 0.25 * 0.0016 + 2.0 * 0.25 * 0.01 * 0.04 * -0.15;
        let summary = agg.aggregate();
        assert!((summary.portfolio_var_95 - variance.sqrt()).abs() < 1e-12);
        assert!((summary.portfolio_cvar_95 - variance.sqrt() * 1.4).abs() < 1e-12);
        assert_eq!(summary.max_drawdown, -0.20);
        assert_eq!(summary.gross_exposure, 1.0);
        assert_eq!(summary.concentration, 0.5);
    }

    #[test]
    fn test_missing_var_uses_default_volatility() {
        let mut agg = RiskAggregator::with_defaults();
        agg.update_allocations(&BTreeMap::from([(Domain::RealEstate, 1.0)]));
        assert!((agg.aggregate().portfolio_var_95 - 0.02).abs() < 1e-12);

        agg.update_domain_risk(metrics(Domain::RealEstate, 0.0, -0.1));
        assert!((agg.aggregate().portfolio_var_95 - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_correlation_lookup_is_symmetric() {
        let agg = RiskAggregator::with_defaults();
        assert_eq!(agg.correlation(Domain::Crypto, Domain::Bonds), -0.15);
        assert_eq!(agg.correlation(Domain::Distressed, Domain::RealEstate), 0.40);
        assert_eq!(agg.correlation(Domain::Crypto, Domain::Crypto), 1.0);

        let sparse = RiskAggregator::new(RiskConfig {
            correlations: Vec::new(),
            ..RiskConfig::default()
        });
        assert_eq!(sparse.correlation(Domain::Bonds, Domain::Crypto), 0.0);
        assert!(agg.aggregate().correlations.contains_key("distressed__real_estate"));
    }

    #[test]
    fn test_limit_status_ladder() {
        let limit = RiskLimit::new("max_drawdown", LimitMetric::MaxDrawdown, -0.10, -0.15, -0.20);
        assert_eq!(limit.evaluate(-0.05), LimitStatus::Ok);
        assert_eq!(limit.evaluate(-0.10), LimitStatus::Warning);
        assert_eq!(limit.evaluate(-0.16), LimitStatus::Critical);
        assert_eq!(limit.evaluate(-0.20), LimitStatus::Breached);
    }

    #[test]
    fn test_breached_limits_include_critical() {
        let mut agg = RiskAggregator::with_defaults();
        agg.update_allocations(&BTreeMap::from([
            (Domain::Bonds, 0.30),
            (Domain::Crypto, 0.32),
            (Domain::RealEstate, 0.20),
        ]));
        let summary = agg.aggregate();
        assert!(summary
            .breached_limits
            .iter()
            .any(|b| b == "crypto_allocation: critical (0.3200)"));
        assert!(summary
            .limits
            .iter()
            .any(|l| l.name == "gross_exposure" && l.status == LimitStatus::Warning));
        assert!(!summary.breached_limits.iter().any(|b| b.starts_with("gross_exposure")));
    }

    #[test]
    fn test_set_allocations_drops_stale_domains() {
        let mut agg = RiskAggregator::with_defaults();
        agg.update_allocations(&BTreeMap::from([(Domain::Bonds, 0.4), (Domain::Crypto, 0.3)]));
        agg.set_allocations(BTreeMap::from([(Domain::Bonds, 0.4)]));

        let summary = agg.aggregate();
        assert!(!summary.domain_risks.contains_key(&Domain::Crypto));
        assert!((summary.gross_exposure - 0.4).abs() < 1e-12);
        assert!((summary.portfolio_var_95 - 0.4 * 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let mut agg = RiskAggregator::with_defaults();
        agg.update_domain_risk(metrics(Domain::Distressed, 0.15, -0.30));
        agg.update_allocations(&BTreeMap::from([(Domain::Distressed, 0.6), (Domain::Bonds, 0.3)]));
        assert_eq!(agg.aggregate(), agg.aggregate());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RiskConfig::default();
        assert!(config.validate().is_ok());
        config.correlations.push(CorrelationEntry::new(Domain::Bonds, Domain::Crypto, 1.5));
        assert!(config.validate().is_err());
    }
}
