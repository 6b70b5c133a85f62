//! Portfolio Orchestrator
//!
//! Top-level DAG, one pass per run:
//! detect_regime -> dispatch_sub_orchestrators -> aggregate_risk ->
//! allocate_capital -> guardian_check (bounded retries) -> synthesize
//!
//! Stage failures are collected into the run's error list instead of
//! aborting. The only fatal outcome is a run where no domain produced
//! usable output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::sub_orchestrator::{ParentContext, SubOrchestrator, SubOrchestratorReport};
use crate::config::Config;
use crate::errors::{CallError, OrchestraError, OrchestraResult};
use crate::guardian::{
    DeadLetter, DriftAlert, OutputGuardian, OutputRecord, QuarantinedOutput, Severity,
    ValidationStats,
};
use crate::resilience::{
    BreakerRegistry, BreakerSnapshot, BreakerState, CircuitBreakerConfig, RetryExecutor,
};
use crate::trading::risk_models::DealAnalysis;
use crate::trading::{
    AllocationPlan, CapitalAllocator, Domain, MarketRegime, PortfolioRiskSummary,
    RegimeClassification, RegimeClassifier, RiskAggregator, Signal, SignalBundle,
};
use crate::workers::DataMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Guardian re-checks before a rejected run proceeds degraded
    pub max_guardian_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_guardian_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    AgentsRunning,
    BarrierWait,
    ActionNeeded,
    Degraded,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "PENDING"),
            RunStatus::AgentsRunning => write!(f, "AGENTS_RUNNING"),
            RunStatus::BarrierWait => write!(f, "BARRIER_WAIT"),
            RunStatus::ActionNeeded => write!(f, "ACTION_NEEDED"),
            RunStatus::Degraded => write!(f, "DEGRADED"),
            RunStatus::Completed => write!(f, "COMPLETED"),
            RunStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Inputs for one portfolio run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioRequest {
    pub entity_ids: Vec<String>,
    pub macro_indicators: BTreeMap<String, f64>,
    /// Market data keyed by domain name
    pub market_data: DataMap,
    /// Reference data handed to semantic checks
    pub reference_data: DataMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub regime: MarketRegime,
    pub status: RunStatus,
    pub error_count: usize,
    pub degraded_domains: Vec<Domain>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardianReport {
    pub approved: bool,
    pub violations: Vec<String>,
    pub warnings: Vec<String>,
    pub drift_alerts: usize,
    pub manual_review_required: bool,
    /// Checks performed, including the first
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalRecommendation {
    pub run_id: Uuid,
    pub regime: MarketRegime,
    pub regime_confidence: f64,
    pub allocation_plan: AllocationPlan,
    pub positions: Vec<Signal>,
    pub risk_summary: PortfolioRiskSummary,
    pub guardian: GuardianReport,
    pub guardian_approved: bool,
    pub manual_review_required: bool,
    pub degraded_domains: Vec<Domain>,
    pub degraded_workers: Vec<String>,
    pub deal_analysis: Option<DealAnalysis>,
    pub errors: Vec<String>,
    pub status: RunStatus,
    pub timestamp: DateTime<Utc>,
}

/// Mutable state threaded through the nodes of one run
struct RunContext {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    status: RunStatus,
    errors: Vec<String>,
    degraded_domains: Vec<Domain>,
    degraded_workers: Vec<String>,
}

impl RunContext {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            status: RunStatus::Pending,
            errors: Vec::new(),
            degraded_domains: Vec::new(),
            degraded_workers: Vec::new(),
        }
    }

    fn advance(&mut self, status: RunStatus) {
        debug!("Run {}: {} -> {}", self.run_id, self.status, status);
        self.status = status;
    }
}

pub struct PortfolioOrchestrator {
    config: OrchestratorConfig,
    sub_orchestrators: BTreeMap<Domain, Arc<SubOrchestrator>>,
    registry: Arc<BreakerRegistry>,
    guardian: Arc<OutputGuardian>,
    domain_breaker: CircuitBreakerConfig,
    retry: RetryExecutor,
    classifier: RegimeClassifier,
    risk: RiskAggregator,
    allocator: CapitalAllocator,
    history: Vec<RunRecord>,
}

impl PortfolioOrchestrator {
    pub fn new(
        config: &Config,
        registry: Arc<BreakerRegistry>,
        guardian: Arc<OutputGuardian>,
    ) -> OrchestraResult<Self> {
        config.validate()?;
        info!("Initializing Portfolio Orchestrator");
        Ok(Self {
            config: config.orchestrator.clone(),
            sub_orchestrators: BTreeMap::new(),
            registry,
            guardian,
            domain_breaker: config.domain_breaker.clone(),
            retry: RetryExecutor::new(config.domain_retry.clone()),
            classifier: RegimeClassifier::new(config.regime.clone()),
            risk: RiskAggregator::new(config.risk.clone()),
            allocator: CapitalAllocator::new(config.allocator.clone()),
            history: Vec::new(),
        })
    }

    /// Register one sub-orchestrator per domain
    pub fn register(&mut self, sub: SubOrchestrator) -> OrchestraResult<()> {
        let domain = sub.domain();
        if self.sub_orchestrators.contains_key(&domain) {
            return Err(OrchestraError::Registration(format!(
                "a sub-orchestrator for {} is already registered",
                domain
            )));
        }
        self.registry.get_or_create_with(
            &format!("sub_orch.{}", domain),
            self.domain_breaker.clone(),
        );
        self.sub_orchestrators.insert(domain, Arc::new(sub));
        Ok(())
    }

    pub fn domains(&self) -> Vec<Domain> {
        self.sub_orchestrators.keys().copied().collect()
    }

    pub fn sub_orchestrator(&self, domain: Domain) -> Option<&Arc<SubOrchestrator>> {
        self.sub_orchestrators.get(&domain)
    }

    /// Seed the allocator's view of current holdings for drift urgency
    pub fn set_current_allocations(&mut self, current: BTreeMap<Domain, f64>) {
        self.allocator.set_current_allocations(current);
    }

    pub async fn run(&mut self, request: PortfolioRequest) -> OrchestraResult<FinalRecommendation> {
        let mut ctx = RunContext::new();
        info!("🚀 Portfolio run {} starting", ctx.run_id);

        // Node 1: detect_regime
        let classification = self.detect_regime(&request.macro_indicators, &mut ctx);

        // Node 2: dispatch_sub_orchestrators
        ctx.advance(RunStatus::AgentsRunning);
        let parent = Arc::new(ParentContext {
            run_id: ctx.run_id,
            entity_ids: request.entity_ids.clone(),
            regime: classification.regime,
            regime_confidence: classification.confidence,
            market_data: request.market_data.clone(),
        });
        let outcomes = self.dispatch(parent).await;
        ctx.advance(RunStatus::BarrierWait);

        let mut reports: Vec<SubOrchestratorReport> = Vec::new();
        for (domain, outcome) in outcomes {
            match outcome {
                Ok(report) => {
                    ctx.degraded_workers.extend(
                        report
                            .bundle
                            .degraded_workers
                            .iter()
                            .map(|w| format!("{}.{}", domain, w)),
                    );
                    if report.is_viable() {
                        reports.push(report);
                    } else {
                        warn!(
                            "Sub-orchestrator {} is below its minimum viable set ({:.0}% complete)",
                            domain, report.barrier.completion_pct
                        );
                        ctx.errors.push(format!(
                            "{}: minimum viable workers missing ({:.0}% complete)",
                            domain, report.barrier.completion_pct
                        ));
                        ctx.degraded_domains.push(domain);
                    }
                }
                Err(e) => {
                    error!("Sub-orchestrator {} failed: {}", domain, e);
                    ctx.errors.push(format!("{}: {}", domain, e));
                    ctx.degraded_domains.push(domain);
                }
            }
        }

        if reports.is_empty() {
            error!("Portfolio run {} has no usable domain output", ctx.run_id);
            ctx.advance(RunStatus::Failed);
            self.record_run(&ctx, classification.regime);
            return Err(OrchestraError::NoUsableDomains { errors: ctx.errors });
        }

        // Node 3: aggregate_risk over the viable domains only
        for domain in &ctx.degraded_domains {
            self.risk.remove_domain_risk(*domain);
        }
        for report in &reports {
            self.risk.update_domain_risk(report.risk.clone());
        }
        let viable_allocations: BTreeMap<Domain, f64> = reports
            .iter()
            .map(|r| {
                let weight = classification
                    .allocation_template
                    .get(&r.domain)
                    .copied()
                    .unwrap_or(0.0);
                (r.domain, weight)
            })
            .collect();
        self.risk.set_allocations(viable_allocations);
        let risk_summary = self.risk.aggregate();
        if !risk_summary.breached_limits.is_empty() {
            warn!("Risk limits at critical or breached: {:?}", risk_summary.breached_limits);
        }

        // Node 4: allocate_capital
        let bundles: Vec<SignalBundle> = reports.iter().map(|r| r.bundle.clone()).collect();
        let allocation_plan = self.allocator.allocate(
            &classification.allocation_template,
            &bundles,
            &risk_summary.breached_limits,
            classification.regime,
        );

        // Node 5: guardian_check, retried a bounded number of times
        let positions: Vec<Signal> = bundles.iter().flat_map(|b| b.signals.iter().cloned()).collect();
        let mut guardian = self.guardian_check(&positions, &request.reference_data, false).await;
        guardian.attempts = 1;
        while !guardian.approved && guardian.attempts <= self.config.max_guardian_retries {
            info!(
                "Guardian retry {}/{}",
                guardian.attempts, self.config.max_guardian_retries
            );
            let mut retry = self.guardian_check(&positions, &request.reference_data, true).await;
            retry.attempts = guardian.attempts + 1;
            retry.drift_alerts = guardian.drift_alerts;
            retry.manual_review_required |= guardian.manual_review_required;
            retry.warnings.extend(
                guardian
                    .warnings
                    .iter()
                    .filter(|w| w.starts_with("Drift["))
                    .cloned(),
            );
            guardian = retry;
        }
        if guardian.approved {
            ctx.advance(RunStatus::ActionNeeded);
        } else {
            warn!("Guardian rejected run {}: {:?}", ctx.run_id, guardian.violations);
            ctx.errors.push(format!(
                "guardian: rejected after {} checks ({} violations)",
                guardian.attempts,
                guardian.violations.len()
            ));
            ctx.advance(RunStatus::Degraded);
        }

        // Node 6: synthesize
        let status = if guardian.approved && ctx.degraded_domains.is_empty() {
            RunStatus::Completed
        } else {
            RunStatus::Degraded
        };
        ctx.advance(status);

        let deal_analysis = reports.iter().find_map(|r| r.deal_analysis.clone());
        self.record_run(&ctx, classification.regime);

        info!(
            "✅ Portfolio run {} finished: status={}, regime={}, {} errors",
            ctx.run_id,
            ctx.status,
            classification.regime,
            ctx.errors.len()
        );

        Ok(FinalRecommendation {
            run_id: ctx.run_id,
            regime: classification.regime,
            regime_confidence: classification.confidence,
            allocation_plan,
            positions,
            risk_summary,
            guardian_approved: guardian.approved,
            manual_review_required: guardian.manual_review_required,
            guardian,
            degraded_domains: ctx.degraded_domains,
            degraded_workers: ctx.degraded_workers,
            deal_analysis,
            errors: ctx.errors,
            status: ctx.status,
            timestamp: Utc::now(),
        })
    }

    fn detect_regime(
        &mut self,
        indicators: &BTreeMap<String, f64>,
        ctx: &mut RunContext,
    ) -> RegimeClassification {
        self.classifier.update_indicators(indicators);
        match self.classifier.classify() {
            Ok(classification) => classification,
            Err(e) => {
                warn!("Regime detection failed, defaulting to UNKNOWN: {}", e);
                ctx.errors.push(format!("regime_detection: {}", e));
                self.classifier.fallback()
            }
        }
    }

    /// Every domain concurrently, each through its own breaker and retry
    async fn dispatch(
        &self,
        parent: Arc<ParentContext>,
    ) -> Vec<(Domain, Result<SubOrchestratorReport, CallError>)> {
        if self.sub_orchestrators.is_empty() {
            warn!("No sub-orchestrators registered");
        }
        let calls = self.sub_orchestrators.iter().map(|(domain, sub)| {
            let breaker = self
                .registry
                .get_or_create_with(&format!("sub_orch.{}", domain), self.domain_breaker.clone());
            let sub = Arc::clone(sub);
            let parent = Arc::clone(&parent);
            async move {
                let outcome = self
                    .retry
                    .call(&breaker, move || {
                        let sub = Arc::clone(&sub);
                        let parent = Arc::clone(&parent);
                        async move { sub.run(&parent).await.map_err(anyhow::Error::from) }
                    })
                    .await;
                (*domain, outcome)
            }
        });
        futures::future::join_all(calls).await
    }

    /// Layers 1 and 2 on every position, then a Layer 3 sweep. A recheck
    /// re-runs Layers 1 and 2 only and records nothing.
    async fn guardian_check(
        &self,
        positions: &[Signal],
        reference: &DataMap,
        recheck: bool,
    ) -> GuardianReport {
        let mut report = GuardianReport::default();

        for signal in positions {
            let record = signal_record(signal);
            let worker = format!("signal.{}", signal.domain);
            let result = if recheck {
                self.guardian.recheck(&worker, &record, Some(reference)).await
            } else {
                self.guardian.validate(&worker, &record, Some(reference)).await
            };
            report.violations.extend(
                result
                    .violations
                    .iter()
                    .map(|v| format!("{}[{}]: {}", worker, signal.entity_id, v)),
            );
            report.warnings.extend(result.warnings);
            report.manual_review_required |= result.manual_review_required;
        }

        if recheck {
            report.approved = report.violations.is_empty();
            return report;
        }

        let alerts = self.guardian.run_drift_check();
        for alert in &alerts {
            report
                .warnings
                .push(format!("Drift[{}]: {}", alert.worker, alert.description));
            if alert.severity.needs_review() {
                report.manual_review_required = true;
            }
        }
        report.drift_alerts = alerts.len();
        report.approved = report.violations.is_empty();
        report
    }

    fn record_run(&mut self, ctx: &RunContext, regime: MarketRegime) {
        self.history.push(RunRecord {
            run_id: ctx.run_id,
            regime,
            status: ctx.status,
            error_count: ctx.errors.len(),
            degraded_domains: ctx.degraded_domains.clone(),
            started_at: ctx.started_at,
            finished_at: Utc::now(),
        });
    }

    pub fn registry(&self) -> &Arc<BreakerRegistry> {
        &self.registry
    }

    pub fn guardian(&self) -> &Arc<OutputGuardian> {
        &self.guardian
    }

    pub fn breaker_states(&self) -> BTreeMap<String, BreakerState> {
        self.registry.all_states()
    }

    pub fn breaker_stats(&self) -> BTreeMap<String, BreakerSnapshot> {
        self.registry.stats()
    }

    pub fn open_breakers(&self) -> Vec<String> {
        self.registry.open_breakers()
    }

    pub fn drift_alerts(&self, severity: Option<Severity>) -> Vec<DriftAlert> {
        self.guardian.drift_alerts(severity)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.guardian.dead_letters()
    }

    pub fn quarantined(&self) -> Vec<QuarantinedOutput> {
        self.guardian.quarantined()
    }

    pub fn validation_stats(&self) -> ValidationStats {
        self.guardian.stats()
    }

    pub fn allocation_history(&self, n: usize) -> &[AllocationPlan] {
        self.allocator.history(n)
    }

    pub fn regime_history(&self, n: usize) -> &[RegimeClassification] {
        self.classifier.history(n)
    }

    pub fn run_history(&self, n: usize) -> &[RunRecord] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }
}

/// Guardian view of one position: its risk fields plus the signal itself
fn signal_record(signal: &Signal) -> OutputRecord {
    let mut record = OutputRecord::from_map(&signal.risk_metrics);
    record.insert("entity_id", signal.entity_id.as_str());
    record.insert("direction", signal.direction.as_str());
    record.insert("conviction", signal.conviction);
    record.insert("position_size", signal.position_size);
    record.insert("data_freshness_secs", signal.data_freshness_secs);
    record.insert("timestamp", signal.timestamp);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::{Direction, NumericScore, ReplayWorker, WorkerResult};

    fn orchestrator() -> PortfolioOrchestrator {
        PortfolioOrchestrator::new(
            &Config::default(),
            Arc::new(BreakerRegistry::default()),
            Arc::new(OutputGuardian::default()),
        )
        .expect("default config is valid")
    }

    #[test]
    fn test_signal_record_fields() {
        let mut risk = DataMap::new();
        risk.insert("max_drawdown".to_string(), serde_json::json!(-0.2));
        let signal = Signal {
            domain: Domain::Crypto,
            entity_id: "ETH".to_string(),
            direction: Direction::Bullish,
            conviction: 0.4,
            position_size: 0.02,
            risk_metrics: risk,
            data_freshness_secs: 1.5,
            timestamp: Utc::now(),
        };
        let record = signal_record(&signal);
        assert_eq!(record.number("conviction"), Some(0.4));
        assert_eq!(record.number("max_drawdown"), Some(-0.2));
        assert!(record.contains("timestamp"));
    }

    #[test]
    fn test_duplicate_domain_rejected() {
        let mut orch = orchestrator();
        let build = || {
            SubOrchestrator::builder(Domain::Bonds)
                .numeric_worker(
                    ReplayWorker::returning(
                        "ta",
                        WorkerResult::NumericScore(NumericScore::new("ta", 50.0, 1.0)),
                    )
                    .into_arc(),
                )
                .build(Arc::clone(orch.registry()), Arc::clone(orch.guardian()))
                .expect("valid")
        };
        let first = build();
        let second = build();
        assert!(orch.register(first).is_ok());
        assert!(matches!(orch.register(second), Err(OrchestraError::Registration(_))));
        assert_eq!(orch.domains(), vec![Domain::Bonds]);
        assert!(orch.registry().get("sub_orch.bonds").is_some());
    }

    #[tokio::test]
    async fn test_no_domains_is_fatal_and_recorded() {
        let mut orch = orchestrator();
        let err = orch
            .run(PortfolioRequest::default())
            .await
            .expect_err("nothing registered");
        assert!(matches!(err, OrchestraError::NoUsableDomains { .. }));

        let history = orch.run_history(10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, RunStatus::Failed);
        assert_eq!(history[0].regime, MarketRegime::Unknown);
        assert_eq!(orch.regime_history(10).len(), 1);
    }
}
