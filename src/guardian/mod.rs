//! Output Guardian
//!
//! Three validation layers between worker output and its consumers:
//! - Layer 1: deterministic rules, always run, blocking
//! - Layer 2: semantic checks through an external collaborator, fail-open
//! - Layer 3: rolling drift statistics per worker
//!
//! Failed validations land in a bounded dead-letter queue.

pub mod drift;
pub mod rules;
pub mod semantic;

pub use drift::{DriftAlert, DriftConfig, DriftDetector, DriftType, WorkerDriftSummary};
pub use rules::{FieldValue, OutputRecord, RuleReport, RuleValidator, ValidationRule};
pub use semantic::{
    QuarantinedOutput, SemanticChecker, SemanticIssue, SemanticOutcome, SemanticReport,
    SemanticRequest, SemanticValidator, Severity,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::{OrchestraError, OrchestraResult};
use crate::workers::DataMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Age in seconds past which a record's timestamp draws a warning
    pub staleness_threshold_secs: f64,

    /// Run Layer 2 when a checker is configured
    pub semantic_enabled: bool,

    /// Minimum issue severity that quarantines an output
    pub quarantine_severity: Severity,

    pub semantic_timeout_secs: f64,
    pub max_quarantined: usize,
    pub max_dead_letters: usize,
    pub drift: DriftConfig,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_secs: 300.0,
            semantic_enabled: true,
            quarantine_severity: Severity::High,
            semantic_timeout_secs: 30.0,
            max_quarantined: 1000,
            max_dead_letters: 1000,
            drift: DriftConfig::default(),
        }
    }
}

impl ValidatorConfig {
    pub fn validate(&self) -> OrchestraResult<()> {
        if self.drift.recent_window == 0 || self.drift.window_size <= self.drift.recent_window {
            return Err(OrchestraError::config_error(format!(
                "drift window ({}) must exceed the recent window ({}) and both must be positive",
                self.drift.window_size, self.drift.recent_window
            )));
        }
        if self.drift.min_samples + self.drift.recent_window > self.drift.window_size {
            return Err(OrchestraError::config_error(format!(
                "drift min_samples ({}) plus recent window ({}) cannot fit in a window of {}",
                self.drift.min_samples, self.drift.recent_window, self.drift.window_size
            )));
        }
        if self.drift.z_threshold <= 0.0 {
            return Err(OrchestraError::config_error("drift z threshold must be positive"));
        }
        Ok(())
    }

    pub fn semantic_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.semantic_timeout_secs).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub worker: String,
    pub passed: bool,
    pub violations: Vec<String>,
    pub warnings: Vec<String>,
    pub quarantined: bool,
    pub manual_review_required: bool,
    pub drift_alerts: Vec<DriftAlert>,
    pub semantic: Option<SemanticOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub worker: String,
    pub record: OutputRecord,
    pub violations: Vec<String>,
    pub rejected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationStats {
    pub total_validations: u64,
    pub passed: u64,
    pub failed: u64,
    pub pass_rate: f64,
    pub dead_letter_queue_size: usize,
    pub quarantined_count: usize,
    pub drift_alerts: usize,
}

#[derive(Debug, Default)]
struct Tally {
    total: u64,
    passed: u64,
}

pub struct OutputGuardian {
    config: ValidatorConfig,
    rules: RuleValidator,
    semantic: SemanticValidator,
    drift: Mutex<DriftDetector>,
    dead_letters: Mutex<VecDeque<DeadLetter>>,
    tally: Mutex<Tally>,
}

impl OutputGuardian {
    pub fn new(config: ValidatorConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_checker(config: ValidatorConfig, checker: Arc<dyn SemanticChecker>) -> Self {
        Self::build(config, Some(checker))
    }

    fn build(config: ValidatorConfig, checker: Option<Arc<dyn SemanticChecker>>) -> Self {
        let checker = checker.filter(|_| config.semantic_enabled);
        Self {
            rules: RuleValidator::new(config.staleness_threshold_secs),
            semantic: SemanticValidator::new(
                checker,
                config.quarantine_severity,
                config.semantic_timeout(),
                config.max_quarantined,
            ),
            drift: Mutex::new(DriftDetector::new(config.drift.clone())),
            dead_letters: Mutex::new(VecDeque::new()),
            tally: Mutex::new(Tally::default()),
            config,
        }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Layer 1 only
    pub fn check_rules(&self, record: &OutputRecord) -> RuleReport {
        self.rules.validate(record)
    }

    /// Run every layer on one output. Layer 3 always records the output
    /// and checks the worker for drift.
    pub async fn validate(
        &self,
        worker: &str,
        record: &OutputRecord,
        reference: Option<&DataMap>,
    ) -> ValidationResult {
        let mut result = self.check_layers(worker, record, reference, true).await;

        let alerts = {
            let mut drift = self.drift.lock();
            drift.record_output(worker, record);
            drift.record_error(worker, !result.passed);
            drift.check_drift(Some(worker))
        };
        for alert in &alerts {
            result
                .warnings
                .push(format!("Drift[{}]: {}", alert.metric, alert.description));
            if alert.severity.needs_review() {
                result.manual_review_required = true;
            }
        }
        result.drift_alerts = alerts;

        if !result.passed {
            warn!(
                "Validation failed for {}: {}",
                worker,
                result.violations.join("; ")
            );
            self.push_dead_letter(worker, record, &result.violations);
        } else {
            debug!("Validation passed for {}", worker);
        }

        let mut tally = self.tally.lock();
        tally.total += 1;
        if result.passed {
            tally.passed += 1;
        }

        result
    }

    /// Layers 1 and 2 on an output already validated once. Nothing is
    /// recorded: no quarantine entry, dead letter, drift sample or tally.
    pub async fn recheck(
        &self,
        worker: &str,
        record: &OutputRecord,
        reference: Option<&DataMap>,
    ) -> ValidationResult {
        self.check_layers(worker, record, reference, false).await
    }

    async fn check_layers(
        &self,
        worker: &str,
        record: &OutputRecord,
        reference: Option<&DataMap>,
        quarantine: bool,
    ) -> ValidationResult {
        let layer1 = self.rules.validate(record);
        let mut result = ValidationResult {
            worker: worker.to_string(),
            passed: layer1.passed,
            violations: layer1.errors,
            warnings: layer1.warnings,
            quarantined: false,
            manual_review_required: false,
            drift_alerts: Vec::new(),
            semantic: None,
        };

        if self.semantic.is_enabled() {
            let request = SemanticRequest {
                worker: worker.to_string(),
                output: record.to_map(),
                reference: reference.cloned().unwrap_or_default(),
            };
            let outcome = if quarantine {
                self.semantic.validate(request).await
            } else {
                self.semantic.assess(&request).await
            };
            if outcome.quarantined {
                result.passed = false;
                result.quarantined = true;
                result.violations.extend(
                    outcome
                        .blocking_issues
                        .iter()
                        .map(|i| format!("Semantic[{}]: {}", i.kind, i.description)),
                );
            }
            result.semantic = Some(outcome);
        }

        result
    }

    /// Feed a Layer 3 metric without running a check
    pub fn observe(&self, worker: &str, metric: &str, value: f64) {
        self.drift.lock().record(worker, metric, value);
    }

    pub fn record_error(&self, worker: &str, is_error: bool) {
        self.drift.lock().record_error(worker, is_error);
    }

    /// Drift check across every tracked worker
    pub fn run_drift_check(&self) -> Vec<DriftAlert> {
        self.drift.lock().check_drift(None)
    }

    pub fn drift_alerts(&self, severity: Option<Severity>) -> Vec<DriftAlert> {
        self.drift.lock().alerts(severity)
    }

    pub fn worker_drift_summary(&self, worker: &str) -> WorkerDriftSummary {
        self.drift.lock().worker_summary(worker)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().iter().cloned().collect()
    }

    pub fn quarantined(&self) -> Vec<QuarantinedOutput> {
        self.semantic.quarantined()
    }

    pub fn clear_quarantine(&self) -> usize {
        self.semantic.clear_quarantine()
    }

    pub fn stats(&self) -> ValidationStats {
        let (total, passed) = {
            let tally = self.tally.lock();
            (tally.total, tally.passed)
        };
        ValidationStats {
            total_validations: total,
            passed,
            failed: total - passed,
            pass_rate: if total > 0 { passed as f64 / total as f64 } else { 0.0 },
            dead_letter_queue_size: self.dead_letters.lock().len(),
            quarantined_count: self.semantic.quarantine_len(),
            drift_alerts: self.drift.lock().alert_count(),
        }
    }

    fn push_dead_letter(&self, worker: &str, record: &OutputRecord, violations: &[String]) {
        let mut queue = self.dead_letters.lock();
        queue.push_back(DeadLetter {
            worker: worker.to_string(),
            record: record.clone(),
            violations: violations.to_vec(),
            rejected_at: Utc::now(),
        });
        while queue.len() > self.config.max_dead_letters {
            queue.pop_front();
        }
    }
}

impl Default for OutputGuardian {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FlagsEverything;

    #[async_trait]
    impl SemanticChecker for FlagsEverything {
        async fn check(&self, _request: &SemanticRequest) -> anyhow::Result<SemanticReport> {
            Ok(SemanticReport {
                is_valid: false,
                confidence: 0.8,
                issues: vec![SemanticIssue {
                    kind: "factual_error".to_string(),
                    severity: Severity::Critical,
                    description: "price does not match reference".to_string(),
                    field: Some("price".to_string()),
                }],
                summary: "bad price".to_string(),
            })
        }
    }

    fn good_record() -> OutputRecord {
        OutputRecord::new().with("confidence", 0.7).with("score", 64.0)
    }

    #[tokio::test]
    async fn test_clean_output_passes() {
        let guardian = OutputGuardian::default();
        let result = guardian.validate("bonds.ta_rsi", &good_record(), None).await;
        assert!(result.passed);
        assert!(result.semantic.is_none());
        assert!(!result.manual_review_required);
        assert_eq!(guardian.stats().passed, 1);
    }

    #[tokio::test]
    async fn test_rule_violation_goes_to_dead_letters() {
        let guardian = OutputGuardian::default();
        let record = OutputRecord::new().with("confidence", 1.7);
        let result = guardian.validate("bonds.ta_rsi", &record, None).await;
        assert!(!result.passed);
        assert!(!result.quarantined);
        assert_eq!(guardian.dead_letters().len(), 1);

        let stats = guardian.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.dead_letter_queue_size, 1);
        assert_eq!(stats.pass_rate, 0.0);
    }

    #[tokio::test]
    async fn test_semantic_issue_quarantines() {
        let guardian = OutputGuardian::with_checker(ValidatorConfig::default(), Arc::new(FlagsEverything));
        let result = guardian.validate("llm_sentiment", &good_record(), None).await;
        assert!(!result.passed);
        assert!(result.quarantined);
        assert!(result
            .violations
            .contains(&"Semantic[factual_error]: price does not match reference".to_string()));
        assert_eq!(guardian.quarantined().len(), 1);
        assert_eq!(guardian.stats().quarantined_count, 1);
    }

    #[tokio::test]
    async fn test_recheck_records_nothing() {
        let guardian = OutputGuardian::with_checker(ValidatorConfig::default(), Arc::new(FlagsEverything));
        guardian.validate("llm_sentiment", &good_record(), None).await;

        for _ in 0..2 {
            let result = guardian.recheck("llm_sentiment", &good_record(), None).await;
            assert!(!result.passed);
            assert!(result.quarantined);
        }

        let stats = guardian.stats();
        assert_eq!(stats.total_validations, 1);
        assert_eq!(stats.dead_letter_queue_size, 1);
        assert_eq!(stats.quarantined_count, 1);
        let summary = guardian.worker_drift_summary("llm_sentiment");
        assert_eq!(summary.metrics["confidence"].count, 1);
    }

    #[tokio::test]
    async fn test_semantic_disabled_by_config() {
        let config = ValidatorConfig {
            semantic_enabled: false,
            ..Default::default()
        };
        let guardian = OutputGuardian::with_checker(config, Arc::new(FlagsEverything));
        assert!(guardian.validate("x", &good_record(), None).await.passed);
    }

    #[tokio::test]
    async fn test_dead_letter_queue_is_bounded() {
        let config = ValidatorConfig {
            max_dead_letters: 3,
            ..Default::default()
        };
        let guardian = OutputGuardian::new(config);
        for i in 0..5 {
            let record = OutputRecord::new().with("rsi", 200.0 + i as f64);
            guardian.validate("w", &record, None).await;
        }
        let letters = guardian.dead_letters();
        assert_eq!(letters.len(), 3);
        assert_eq!(letters[0].record.number("rsi"), Some(202.0));
    }

    #[tokio::test]
    async fn test_drift_sets_manual_review() {
        let guardian = OutputGuardian::default();
        for i in 0..40 {
            let v = if i % 2 == 0 { 0.45 } else { 0.55 };
            guardian.observe("w", "confidence", v);
        }
        for _ in 0..19 {
            guardian.observe("w", "confidence", 0.99);
        }
        let result = guardian
            .validate("w", &OutputRecord::new().with("confidence", 0.99), None)
            .await;
        assert!(result.passed);
        assert!(!result.drift_alerts.is_empty());
        assert!(result.manual_review_required);
        assert!(result.warnings.iter().any(|w| w.starts_with("Drift[confidence]")));
    }

    #[test]
    fn test_config_validation() {
        assert!(ValidatorConfig::default().validate().is_ok());
        let mut config = ValidatorConfig::default();
        config.drift.window_size = 40;
        assert!(config.validate().is_err());
    }
}
