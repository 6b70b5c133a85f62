//! Domain Sub-Orchestrator
//!
//! One generic engine per domain. A run fetches the domain's data, fans out
//! every registered worker through its breaker and retry policy, tracks
//! completion on a barrier, votes, validates, computes domain risk and
//! returns a signal bundle. A failing worker never aborts the run; only a
//! failed data fetch does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::consensus::{
    BarrierReport, CompletionBarrier, ConsensusAggregator, ConsensusConfig, ConvictionScore,
    WorkerRoster, WorkerSet,
};
use crate::errors::{CallError, OrchestraError, OrchestraResult};
use crate::guardian::{OutputGuardian, OutputRecord};
use crate::resilience::{
    BreakerRegistry, BreakerState, CircuitBreaker, CircuitBreakerConfig, RetryConfig, RetryExecutor,
};
use crate::trading::risk_models::{default_risk_model, DealAnalysis, RiskMetrics, RiskModel};
use crate::trading::{position_size_for, Domain, MarketRegime, Signal, SignalBundle};
use crate::workers::{DataMap, Direction, Track, Worker, WorkerOutput, WorkerResult};

/// Run summaries kept per sub-orchestrator
const MAX_RUN_HISTORY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BarrierConfig {
    pub timeout_secs: f64,

    /// Per-domain minimum viable worker names. Domains without an entry use
    /// the first two numeric workers plus the first categorical worker.
    pub minimum_viable: BTreeMap<Domain, Vec<String>>,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120.0,
            minimum_viable: BTreeMap::new(),
        }
    }
}

impl BarrierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or_default()
    }
}

/// What the portfolio level hands each sub-orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentContext {
    pub run_id: Uuid,
    pub entity_ids: Vec<String>,
    pub regime: MarketRegime,
    pub regime_confidence: f64,
    /// Market data keyed by domain name
    pub market_data: DataMap,
}

impl ParentContext {
    pub fn new(entity_ids: Vec<String>, market_data: DataMap) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            entity_ids,
            regime: MarketRegime::Unknown,
            regime_confidence: 0.0,
            market_data,
        }
    }
}

/// Fetches the opaque data map a domain's workers analyze
#[async_trait]
pub trait DomainDataSource: Send + Sync {
    async fn fetch(
        &self,
        domain: Domain,
        entity_ids: &[String],
        parent: &ParentContext,
    ) -> anyhow::Result<DataMap>;
}

/// Reads `market_data[domain]` from the parent context
#[derive(Debug, Default, Clone, Copy)]
pub struct ParentSliceSource;

#[async_trait]
impl DomainDataSource for ParentSliceSource {
    async fn fetch(
        &self,
        domain: Domain,
        _entity_ids: &[String],
        parent: &ParentContext,
    ) -> anyhow::Result<DataMap> {
        match parent.market_data.get(domain.as_str()) {
            Some(serde_json::Value::Object(slice)) => Ok(slice.clone()),
            Some(other) => anyhow::bail!("market data for {} is not an object: {}", domain, other),
            None => anyhow::bail!("no market data supplied for {}", domain),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubOrchestratorReport {
    pub run_id: Uuid,
    pub domain: Domain,
    pub bundle: SignalBundle,
    pub convictions: BTreeMap<String, ConvictionScore>,
    pub outputs: Vec<WorkerOutput>,
    pub risk: RiskMetrics,
    pub completed_workers: Vec<String>,
    pub failed_workers: Vec<String>,
    pub worker_errors: BTreeMap<String, String>,
    pub validation_violations: Vec<String>,
    pub barrier: BarrierReport,
    pub deal_analysis: Option<DealAnalysis>,
}

impl SubOrchestratorReport {
    pub fn is_viable(&self) -> bool {
        self.barrier.is_viable
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubRunSummary {
    pub run_id: Uuid,
    pub domain: Domain,
    pub entity_ids: Vec<String>,
    pub completed: usize,
    pub failed: usize,
    pub degraded: bool,
    pub timestamp: DateTime<Utc>,
}

struct RegisteredWorker {
    name: String,
    track: Track,
    worker: Arc<dyn Worker>,
    breaker: Arc<CircuitBreaker>,
}

pub struct SubOrchestratorBuilder {
    domain: Domain,
    workers: Vec<(Track, Arc<dyn Worker>)>,
    data_source: Option<Arc<dyn DomainDataSource>>,
    risk_model: Option<Box<dyn RiskModel>>,
    minimum_viable: Option<Vec<String>>,
    consensus: ConsensusConfig,
    retry: RetryConfig,
    breaker: CircuitBreakerConfig,
    barrier_timeout: Duration,
}

impl SubOrchestratorBuilder {
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            workers: Vec::new(),
            data_source: None,
            risk_model: None,
            minimum_viable: None,
            consensus: ConsensusConfig::default(),
            retry: RetryConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            barrier_timeout: BarrierConfig::default().timeout(),
        }
    }

    /// Apply the worker-level sections of the engine configuration
    pub fn settings(mut self, config: &Config) -> Self {
        self.consensus = config.consensus.clone();
        self.retry = config.retry.clone();
        self.breaker = config.breaker.clone();
        self.barrier_timeout = config.barrier.timeout();
        if let Some(names) = config.barrier.minimum_viable.get(&self.domain) {
            self.minimum_viable = Some(names.clone());
        }
        self
    }

    pub fn numeric_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.workers.push((Track::Numeric, worker));
        self
    }

    pub fn categorical_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.workers.push((Track::Categorical, worker));
        self
    }

    pub fn worker(mut self, track: Track, worker: Arc<dyn Worker>) -> Self {
        self.workers.push((track, worker));
        self
    }

    pub fn data_source(mut self, source: Arc<dyn DomainDataSource>) -> Self {
        self.data_source = Some(source);
        self
    }

    pub fn risk_model(mut self, model: Box<dyn RiskModel>) -> Self {
        self.risk_model = Some(model);
        self
    }

    pub fn minimum_viable<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.minimum_viable = Some(names.iter().map(|n| n.as_ref().to_string()).collect());
        self
    }

    pub fn consensus(mut self, config: ConsensusConfig) -> Self {
        self.consensus = config;
        self
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    pub fn breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    pub fn barrier_timeout(mut self, timeout: Duration) -> Self {
        self.barrier_timeout = timeout;
        self
    }

    /// Register every worker, create its breaker in the shared registry and
    /// resolve the barrier sets
    pub fn build(
        self,
        registry: Arc<BreakerRegistry>,
        guardian: Arc<OutputGuardian>,
    ) -> OrchestraResult<SubOrchestrator> {
        self.consensus.validate()?;

        let mut roster = WorkerRoster::new();
        let mut workers = Vec::with_capacity(self.workers.len());
        for (track, worker) in self.workers {
            let name = worker.name().to_string();
            roster.register(&name)?;
            let breaker = registry.get_or_create_with(
                &format!("{}.{}", self.domain, name),
                self.breaker.clone(),
            );
            workers.push(RegisteredWorker {
                name,
                track,
                worker,
                breaker,
            });
        }

        let required = roster.all();
        let minimum_viable = match &self.minimum_viable {
            Some(names) => roster.set_of(names)?,
            None => {
                let numeric = workers.iter().filter(|w| w.track == Track::Numeric).take(2);
                let categorical = workers.iter().filter(|w| w.track == Track::Categorical).take(1);
                let names: Vec<&str> = numeric.chain(categorical).map(|w| w.name.as_str()).collect();
                roster.set_of(&names)?
            }
        };

        info!(
            "[{}] Sub-orchestrator registered {} workers ({} minimum viable)",
            self.domain,
            workers.len(),
            minimum_viable.len()
        );

        Ok(SubOrchestrator {
            domain: self.domain,
            workers,
            roster: Arc::new(roster),
            required,
            minimum_viable,
            barrier_timeout: self.barrier_timeout,
            consensus: self.consensus,
            retry: RetryExecutor::new(self.retry),
            data_source: self.data_source.unwrap_or_else(|| Arc::new(ParentSliceSource)),
            risk_model: self.risk_model.unwrap_or_else(|| default_risk_model(self.domain)),
            guardian,
            history: Mutex::new(VecDeque::new()),
        })
    }
}

pub struct SubOrchestrator {
    domain: Domain,
    workers: Vec<RegisteredWorker>,
    roster: Arc<WorkerRoster>,
    required: WorkerSet,
    minimum_viable: WorkerSet,
    barrier_timeout: Duration,
    consensus: ConsensusConfig,
    retry: RetryExecutor,
    data_source: Arc<dyn DomainDataSource>,
    risk_model: Box<dyn RiskModel>,
    guardian: Arc<OutputGuardian>,
    history: Mutex<VecDeque<SubRunSummary>>,
}

impl SubOrchestrator {
    pub fn builder(domain: Domain) -> SubOrchestratorBuilder {
        SubOrchestratorBuilder::new(domain)
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn worker_names(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.name.clone()).collect()
    }

    pub fn minimum_viable_workers(&self) -> Vec<String> {
        self.roster.names_in(self.minimum_viable)
    }

    /// Breaker state per worker name
    pub fn breaker_states(&self) -> BTreeMap<String, BreakerState> {
        self.workers
            .iter()
            .map(|w| (w.name.clone(), w.breaker.state()))
            .collect()
    }

    /// Most recent `n` run summaries, oldest first
    pub fn history(&self, n: usize) -> Vec<SubRunSummary> {
        let history = self.history.lock();
        history
            .iter()
            .skip(history.len().saturating_sub(n))
            .cloned()
            .collect()
    }

    /// Worker results describe the whole domain slice, so every entity in
    /// `parent.entity_ids` receives the same conviction.
    pub async fn run(&self, parent: &ParentContext) -> OrchestraResult<SubOrchestratorReport> {
        let run_id = Uuid::new_v4();
        let domain = self.domain;
        info!("[{}] Sub-orchestrator run {} starting", domain, run_id);

        // Step 1: fetch domain data
        let data = self
            .data_source
            .fetch(domain, &parent.entity_ids, parent)
            .await
            .map_err(|e| {
                warn!("[{}] Data fetch failed: {}", domain, e);
                OrchestraError::data_fetch(domain.as_str().to_string(), e.to_string())
            })?;
        let fetched_at = Utc::now();
        let data = Arc::new(data);

        // Step 2: fan out every worker
        let mut barrier = CompletionBarrier::new(
            Arc::clone(&self.roster),
            self.required,
            self.minimum_viable,
            self.barrier_timeout,
        )?;
        barrier.start();

        let calls = self
            .workers
            .iter()
            .map(|w| self.invoke(w, Arc::clone(&data)));
        let outcomes = futures::future::join_all(calls).await;

        // Steps 3-5: barrier, consensus and Layer 1
        let mut aggregator = ConsensusAggregator::new(&self.consensus)?;
        let mut outputs = Vec::new();
        let mut worker_errors = BTreeMap::new();
        let mut violations = Vec::new();

        for (registered, (outcome, elapsed)) in self.workers.iter().zip(outcomes) {
            let qualified = format!("{}.{}", domain, registered.name);
            let response_time_ms = elapsed.as_secs_f64() * 1000.0;

            let result = match outcome {
                Ok(result) if result.track() == registered.track => result,
                Ok(result) => {
                    let message = format!(
                        "returned a {} result but is registered on the {} track",
                        result.track(),
                        registered.track
                    );
                    warn!("[{}] Worker {} {}", domain, registered.name, message);
                    barrier.mark_failed(&registered.name);
                    worker_errors.insert(registered.name.clone(), message);
                    self.guardian.record_error(&qualified, true);
                    continue;
                }
                Err(e) => {
                    if e.is_breaker_open() {
                        warn!("[{}] Worker {} breaker is OPEN, skipping", domain, registered.name);
                    } else {
                        warn!("[{}] Worker {} failed: {}", domain, registered.name, e);
                    }
                    barrier.mark_failed(&registered.name);
                    worker_errors.insert(registered.name.clone(), e.to_string());
                    self.guardian.record_error(&qualified, true);
                    continue;
                }
            };

            barrier.mark_complete(&registered.name);
            self.guardian.record_error(&qualified, false);
            self.guardian.observe(&qualified, "response_time_ms", response_time_ms);
            self.guardian.observe(&qualified, "confidence", result.confidence());

            let result = match result {
                WorkerResult::NumericScore(score) => {
                    self.guardian.observe(&qualified, "score", score.score);
                    let rules = self
                        .guardian
                        .check_rules(&OutputRecord::from_numeric(&score, Utc::now()));
                    if rules.passed {
                        let clamped = score.clamped();
                        aggregator.add_numeric(&registered.name, clamped.clone());
                        WorkerResult::NumericScore(clamped)
                    } else {
                        warn!(
                            "[{}] Withholding {} from consensus: {}",
                            domain,
                            registered.name,
                            rules.errors.join("; ")
                        );
                        violations.extend(
                            rules
                                .errors
                                .iter()
                                .map(|e| format!("{}: {}", registered.name, e)),
                        );
                        WorkerResult::NumericScore(score)
                    }
                }
                WorkerResult::CategoricalOpinion(opinion) => {
                    let clamped = opinion.clamped();
                    aggregator.add_categorical(&registered.name, clamped.clone());
                    WorkerResult::CategoricalOpinion(clamped)
                }
            };

            outputs.push(WorkerOutput {
                worker: registered.name.clone(),
                result,
                response_time_ms,
                timestamp: Utc::now(),
            });
        }

        let status = barrier.status();
        if barrier.is_timed_out() {
            warn!(
                "[{}] Barrier exceeded its {:?} timeout; proceeding with {:.0}% complete",
                domain, self.barrier_timeout, status.completion_pct
            );
        }
        let missing = barrier.missing_workers();
        info!(
            "[{}] Barrier: {:.0}% complete, viable={}, missing={:?}",
            domain, status.completion_pct, status.is_viable, missing
        );

        let entities: Vec<String> = if parent.entity_ids.is_empty() {
            vec![String::new()]
        } else {
            parent.entity_ids.clone()
        };
        let convictions: BTreeMap<String, ConvictionScore> = entities
            .iter()
            .map(|entity| (entity.clone(), aggregator.aggregate(entity, &missing)))
            .collect();

        // Step 6: domain risk
        let risk = self.risk_model.compute(&data).unwrap_or_else(|e| {
            warn!("[{}] Risk computation failed, using empty metrics: {}", domain, e);
            RiskMetrics::empty(domain)
        });
        let deal_analysis = self.risk_model.deal_analysis(&data);

        // Step 7: signals
        let freshness = (Utc::now() - fetched_at).num_milliseconds() as f64 / 1000.0;
        let risk_map = risk.to_map();
        let signals: Vec<Signal> = entities
            .iter()
            .filter_map(|entity| convictions.get(entity))
            .map(|conviction| {
                let direction = if aggregator.has_categorical_votes() {
                    conviction.categorical_direction
                } else {
                    Direction::from_score(conviction.combined_score)
                };
                Signal {
                    domain,
                    entity_id: conviction.entity_id.clone(),
                    direction,
                    conviction: conviction.combined_score,
                    position_size: position_size_for(conviction.combined_score),
                    risk_metrics: risk_map.clone(),
                    data_freshness_secs: freshness,
                    timestamp: Utc::now(),
                }
            })
            .collect();

        let bundle = SignalBundle {
            domain,
            signals,
            regime: parent.regime,
            regime_confidence: parent.regime_confidence,
            is_degraded: !status.is_complete,
            degraded_workers: missing.clone(),
            timestamp: Utc::now(),
        };

        let report = SubOrchestratorReport {
            run_id,
            domain,
            bundle,
            convictions,
            outputs,
            risk,
            completed_workers: barrier.completed_workers(),
            failed_workers: barrier.failed_workers(),
            worker_errors,
            validation_violations: violations,
            barrier: barrier.report(),
            deal_analysis,
        };

        self.record_run(&report, &parent.entity_ids);
        info!(
            "[{}] Run {} complete: {} workers OK, {} failed",
            domain,
            run_id,
            report.completed_workers.len(),
            report.failed_workers.len()
        );
        Ok(report)
    }

    async fn invoke(
        &self,
        registered: &RegisteredWorker,
        data: Arc<DataMap>,
    ) -> (Result<WorkerResult, CallError>, Duration) {
        let started = Instant::now();
        let worker = Arc::clone(&registered.worker);
        let outcome = self
            .retry
            .call(&registered.breaker, move || {
                let worker = Arc::clone(&worker);
                let data = Arc::clone(&data);
                async move { worker.invoke(data).await }
            })
            .await;
        (outcome, started.elapsed())
    }

    fn record_run(&self, report: &SubOrchestratorReport, entity_ids: &[String]) {
        let mut history = self.history.lock();
        history.push_back(SubRunSummary {
            run_id: report.run_id,
            domain: report.domain,
            entity_ids: entity_ids.to_vec(),
            completed: report.completed_workers.len(),
            failed: report.failed_workers.len(),
            degraded: report.bundle.is_degraded,
            timestamp: Utc::now(),
        });
        while history.len() > MAX_RUN_HISTORY {
            history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::{CategoricalOpinion, NumericScore, ReplayWorker};
    use serde_json::json;

    fn numeric(name: &str, score: f64, confidence: f64) -> Arc<dyn Worker> {
        ReplayWorker::returning(
            name,
            WorkerResult::NumericScore(NumericScore::new(name, score, confidence)),
        )
        .into_arc()
    }

    fn categorical(name: &str, direction: Direction, confidence: f64) -> Arc<dyn Worker> {
        ReplayWorker::returning(
            name,
            WorkerResult::CategoricalOpinion(CategoricalOpinion::new(direction, confidence)),
        )
        .into_arc()
    }

    fn parent() -> ParentContext {
        let market = json!({
            "crypto": { "volatility": { "realized_30d": 0.5 } }
        });
        let market = market.as_object().cloned().unwrap_or_default();
        ParentContext::new(vec!["BTC".to_string()], market)
    }

    fn no_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 0,
            base_delay_ms: 0,
        }
    }

    fn build(builder: SubOrchestratorBuilder) -> SubOrchestrator {
        builder
            .retry(no_retry())
            .build(Arc::new(BreakerRegistry::default()), Arc::new(OutputGuardian::default()))
            .expect("valid sub-orchestrator")
    }

    #[tokio::test]
    async fn test_all_workers_complete() {
        let sub = build(
            SubOrchestrator::builder(Domain::Crypto)
                .numeric_worker(numeric("ta_rsi", 85.0, 1.0))
                .numeric_worker(numeric("ta_macd", 85.0, 1.0))
                .categorical_worker(categorical("llm_a", Direction::Bullish, 0.9)),
        );
        let report = sub.run(&parent()).await.expect("run succeeds");

        assert!(report.barrier.is_complete);
        assert!(!report.bundle.is_degraded);
        assert_eq!(report.completed_workers.len(), 3);

        let conviction = &report.convictions["BTC"];
        // 0.6 * 0.7 + 0.4 * 1.0
        assert!((conviction.combined_score - 0.82).abs() < 1e-9);
        let signal = &report.bundle.signals[0];
        assert_eq!(signal.direction, Direction::Bullish);
        assert_eq!(signal.position_size, 0.08);
        assert!(signal.risk_metrics.contains_key("var_95"));
        assert_eq!(sub.history(5).len(), 1);
    }

    #[tokio::test]
    async fn test_every_entity_shares_the_domain_conviction() {
        let sub = build(
            SubOrchestrator::builder(Domain::Crypto)
                .numeric_worker(numeric("ta_rsi", 70.0, 0.8))
                .categorical_worker(categorical("llm_a", Direction::Bullish, 0.6)),
        );
        let mut parent = parent();
        parent.entity_ids = vec!["BTC".to_string(), "ETH".to_string()];
        let report = sub.run(&parent).await.expect("run succeeds");

        assert_eq!(report.bundle.signals.len(), 2);
        let btc = &report.convictions["BTC"];
        let eth = &report.convictions["ETH"];
        assert_eq!(btc.combined_score, eth.combined_score);
        assert_eq!(btc.categorical_direction, eth.categorical_direction);
        assert_eq!(eth.entity_id, "ETH");
    }

    #[tokio::test]
    async fn test_failed_worker_degrades_but_does_not_abort() {
        let sub = build(
            SubOrchestrator::builder(Domain::Crypto)
                .numeric_worker(numeric("ta_rsi", 70.0, 0.8))
                .numeric_worker(numeric("ta_macd", 60.0, 0.8))
                .numeric_worker(ReplayWorker::failing("ta_volume", "feed down").into_arc())
                .categorical_worker(categorical("llm_a", Direction::Neutral, 0.5)),
        );
        let report = sub.run(&parent()).await.expect("run succeeds");

        assert!(report.bundle.is_degraded);
        assert!(report.is_viable());
        assert_eq!(report.failed_workers, vec!["ta_volume".to_string()]);
        assert_eq!(report.bundle.degraded_workers, vec!["ta_volume".to_string()]);
        assert!(report.worker_errors["ta_volume"].contains("feed down"));
        assert!(report.convictions["BTC"].degraded);
    }

    #[tokio::test]
    async fn test_missing_data_aborts_only_this_domain() {
        let sub = build(SubOrchestrator::builder(Domain::Bonds).numeric_worker(numeric("ta_rsi", 50.0, 1.0)));
        let err = sub.run(&parent()).await.expect_err("no bonds data");
        assert!(matches!(err, OrchestraError::DataFetch { .. }));
    }

    #[tokio::test]
    async fn test_rule_violation_withholds_score() {
        let bad = ReplayWorker::returning(
            "ta_rsi",
            WorkerResult::NumericScore(NumericScore::new("rsi", 140.0, 1.0)),
        )
        .into_arc();
        let sub = build(
            SubOrchestrator::builder(Domain::Crypto)
                .numeric_worker(bad)
                .numeric_worker(numeric("ta_macd", 25.0, 1.0)),
        );
        let report = sub.run(&parent()).await.expect("run succeeds");

        assert_eq!(report.validation_violations.len(), 1);
        assert!(report.validation_violations[0].starts_with("ta_rsi: score: 140"));
        let conviction = &report.convictions["BTC"];
        assert_eq!(conviction.numeric_score, 25.0);
        assert_eq!(report.bundle.signals[0].direction, Direction::Bearish);
    }

    #[tokio::test]
    async fn test_track_mismatch_is_a_failure() {
        let sub = build(
            SubOrchestrator::builder(Domain::Crypto)
                .categorical_worker(numeric("confused", 80.0, 1.0))
                .numeric_worker(numeric("ta_rsi", 80.0, 1.0)),
        );
        let report = sub.run(&parent()).await.expect("run succeeds");
        assert_eq!(report.failed_workers, vec!["confused".to_string()]);
        assert!(!report.is_viable());
    }

    #[test]
    fn test_default_minimum_viable_set() {
        let sub = build(
            SubOrchestrator::builder(Domain::Bonds)
                .numeric_worker(numeric("a", 50.0, 1.0))
                .categorical_worker(categorical("x", Direction::Neutral, 1.0))
                .numeric_worker(numeric("b", 50.0, 1.0))
                .numeric_worker(numeric("c", 50.0, 1.0))
                .categorical_worker(categorical("y", Direction::Neutral, 1.0)),
        );
        assert_eq!(
            sub.minimum_viable_workers(),
            vec!["a".to_string(), "x".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_duplicate_and_unknown_workers_rejected() {
        let registry = Arc::new(BreakerRegistry::default());
        let guardian = Arc::new(OutputGuardian::default());

        let dup = SubOrchestrator::builder(Domain::Bonds)
            .numeric_worker(numeric("a", 50.0, 1.0))
            .numeric_worker(numeric("a", 50.0, 1.0))
            .build(Arc::clone(&registry), Arc::clone(&guardian));
        assert!(matches!(dup, Err(OrchestraError::Registration(_))));

        let unknown = SubOrchestrator::builder(Domain::Bonds)
            .numeric_worker(numeric("a", 50.0, 1.0))
            .minimum_viable(&["b"])
            .build(registry, guardian);
        assert!(unknown.is_err());
    }
}
