//! Signals exported from a domain run to the portfolio level

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::Domain;
use super::regime::MarketRegime;
use crate::workers::{DataMap, Direction};

/// Recommended position fraction for a conviction magnitude.
///
/// Tiers: below 0.2 no position, then 2%, 5%, 8% and a 10% cap.
pub fn position_size_for(conviction: f64) -> f64 {
    let magnitude = conviction.abs();
    if magnitude < 0.2 {
        0.0
    } else if magnitude < 0.5 {
        0.02
    } else if magnitude < 0.7 {
        0.05
    } else if magnitude < 0.9 {
        0.08
    } else {
        0.10
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub domain: Domain,
    pub entity_id: String,
    pub direction: Direction,
    /// Signed strength in [-1, 1]
    pub conviction: f64,
    /// Fraction of capital in [0, 1]
    pub position_size: f64,
    pub risk_metrics: DataMap,
    pub data_freshness_secs: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalBundle {
    pub domain: Domain,
    pub signals: Vec<Signal>,
    pub regime: MarketRegime,
    pub regime_confidence: f64,
    pub is_degraded: bool,
    pub degraded_workers: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl SignalBundle {
    /// Mean conviction across the bundle's entities, 0 when empty
    pub fn average_conviction(&self) -> f64 {
        if self.signals.is_empty() {
            return 0.0;
        }
        self.signals.iter().map(|s| s.conviction).sum::<f64>() / self.signals.len() as f64
    }
}
