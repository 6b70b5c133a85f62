//! Read-only monitoring view over a portfolio orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::portfolio::{PortfolioOrchestrator, RunRecord, RunStatus};
use crate::guardian::{DeadLetter, DriftAlert, QuarantinedOutput, ValidationStats};
use crate::resilience::BreakerSnapshot;
use crate::trading::{AllocationPlan, RegimeClassification};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSnapshot {
    pub breakers: BTreeMap<String, BreakerSnapshot>,
    pub open_breakers: Vec<String>,
    pub drift_alerts: Vec<DriftAlert>,
    pub dead_letters: Vec<DeadLetter>,
    pub quarantined: Vec<QuarantinedOutput>,
    pub allocation_history: Vec<AllocationPlan>,
    pub regime_history: Vec<RegimeClassification>,
    pub run_history: Vec<RunRecord>,
    pub validation_stats: ValidationStats,
    pub taken_at: DateTime<Utc>,
}

impl MonitoringSnapshot {
    /// Capture state, keeping the last `history` entries of each history
    pub fn capture(orchestrator: &PortfolioOrchestrator, history: usize) -> Self {
        Self {
            breakers: orchestrator.breaker_stats(),
            open_breakers: orchestrator.open_breakers(),
            drift_alerts: orchestrator.drift_alerts(None),
            dead_letters: orchestrator.dead_letters(),
            quarantined: orchestrator.quarantined(),
            allocation_history: orchestrator.allocation_history(history).to_vec(),
            regime_history: orchestrator.regime_history(history).to_vec(),
            run_history: orchestrator.run_history(history).to_vec(),
            validation_stats: orchestrator.validation_stats(),
            taken_at: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.open_breakers.is_empty()
            && self
                .run_history
                .last()
                .map_or(true, |run| run.status == RunStatus::Completed)
    }
}
