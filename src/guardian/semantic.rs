//! Layer 2: semantic checks delegated to an external collaborator
//!
//! The collaborator returns a list of issues with severities. Any issue at
//! or above the configured threshold quarantines the output. A collaborator
//! that errors or exceeds its time bound is logged and treated as a pass.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::workers::DataMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// High and critical findings call for a human
    pub fn needs_review(&self) -> bool {
        *self >= Severity::High
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("Unknown severity: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticRequest {
    pub worker: String,
    pub output: DataMap,
    pub reference: DataMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticIssue {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub description: String,
    pub field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticReport {
    pub is_valid: bool,
    pub confidence: f64,
    pub issues: Vec<SemanticIssue>,
    pub summary: String,
}

impl SemanticReport {
    pub fn clean<S: Into<String>>(summary: S) -> Self {
        Self {
            is_valid: true,
            confidence: 0.0,
            issues: Vec::new(),
            summary: summary.into(),
        }
    }
}

/// External semantic check. Must be safe to call concurrently.
#[async_trait]
pub trait SemanticChecker: Send + Sync {
    async fn check(&self, request: &SemanticRequest) -> anyhow::Result<SemanticReport>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticOutcome {
    pub worker: String,
    pub report: SemanticReport,
    pub quarantined: bool,
    /// True when no check actually ran (no checker, error, or timeout)
    pub skipped: bool,
    pub blocking_issues: Vec<SemanticIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantinedOutput {
    pub worker: String,
    pub output: DataMap,
    pub report: SemanticReport,
    pub quarantined_at: DateTime<Utc>,
}

pub struct SemanticValidator {
    checker: Option<Arc<dyn SemanticChecker>>,
    threshold: Severity,
    timeout: Duration,
    max_quarantine: usize,
    quarantine: Mutex<VecDeque<QuarantinedOutput>>,
}

impl SemanticValidator {
    pub fn new(
        checker: Option<Arc<dyn SemanticChecker>>,
        threshold: Severity,
        timeout: Duration,
        max_quarantine: usize,
    ) -> Self {
        Self {
            checker,
            threshold,
            timeout,
            max_quarantine,
            quarantine: Mutex::new(VecDeque::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.checker.is_some()
    }

    pub fn threshold(&self) -> Severity {
        self.threshold
    }

    /// Check one output and quarantine it when a blocking issue is found
    pub async fn validate(&self, request: SemanticRequest) -> SemanticOutcome {
        let outcome = self.assess(&request).await;
        if outcome.quarantined {
            warn!("QUARANTINED output from {}: {}", request.worker, outcome.report.summary);
            let mut list = self.quarantine.lock();
            list.push_back(QuarantinedOutput {
                worker: request.worker,
                output: request.output,
                report: outcome.report.clone(),
                quarantined_at: Utc::now(),
            });
            while list.len() > self.max_quarantine {
                list.pop_front();
            }
        }
        outcome
    }

    /// Check one output without touching the quarantine list
    pub async fn assess(&self, request: &SemanticRequest) -> SemanticOutcome {
        let Some(checker) = &self.checker else {
            return Self::skipped(request.worker.clone(), "Semantic check skipped (no checker configured)");
        };

        let report = match tokio::time::timeout(self.timeout, checker.check(request)).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                warn!("Semantic check failed for {} (passing): {}", request.worker, e);
                return Self::skipped(request.worker.clone(), format!("Semantic check error: {}", e));
            }
            Err(_) => {
                warn!(
                    "Semantic check for {} timed out after {:?} (passing)",
                    request.worker, self.timeout
                );
                return Self::skipped(request.worker.clone(), "Semantic check timed out");
            }
        };

        let blocking_issues: Vec<SemanticIssue> = report
            .issues
            .iter()
            .filter(|i| i.severity >= self.threshold)
            .cloned()
            .collect();
        let quarantined = !blocking_issues.is_empty();

        SemanticOutcome {
            worker: request.worker.clone(),
            report,
            quarantined,
            skipped: false,
            blocking_issues,
        }
    }

    /// Check several outputs concurrently
    pub async fn check_batch(&self, requests: Vec<SemanticRequest>) -> Vec<SemanticOutcome> {
        futures::future::join_all(requests.into_iter().map(|r| self.validate(r))).await
    }

    pub fn quarantined(&self) -> Vec<QuarantinedOutput> {
        self.quarantine.lock().iter().cloned().collect()
    }

    pub fn quarantine_len(&self) -> usize {
        self.quarantine.lock().len()
    }

    pub fn clear_quarantine(&self) -> usize {
        let mut list = self.quarantine.lock();
        let count = list.len();
        list.clear();
        count
    }

    fn skipped<S: Into<String>>(worker: String, summary: S) -> SemanticOutcome {
        SemanticOutcome {
            worker,
            report: SemanticReport::clean(summary),
            quarantined: false,
            skipped: true,
            blocking_issues: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedChecker(Vec<Severity>);

    #[async_trait]
    impl SemanticChecker for FixedChecker {
        async fn check(&self, request: &SemanticRequest) -> anyhow::Result<SemanticReport> {
            Ok(SemanticReport {
                is_valid: self.0.is_empty(),
                confidence: 0.9,
                issues: self
                    .0
                    .iter()
                    .map(|s| SemanticIssue {
                        kind: "hallucination".to_string(),
                        severity: *s,
                        description: format!("claim from {}", request.worker),
                        field: None,
                    })
                    .collect(),
                summary: "checked".to_string(),
            })
        }
    }

    struct BrokenChecker;

    #[async_trait]
    impl SemanticChecker for BrokenChecker {
        async fn check(&self, _request: &SemanticRequest) -> anyhow::Result<SemanticReport> {
            anyhow::bail!("collaborator unavailable")
        }
    }

    struct SlowChecker;

    #[async_trait]
    impl SemanticChecker for SlowChecker {
        async fn check(&self, _request: &SemanticRequest) -> anyhow::Result<SemanticReport> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(SemanticReport::clean("late"))
        }
    }

    fn request(worker: &str) -> SemanticRequest {
        SemanticRequest {
            worker: worker.to_string(),
            output: DataMap::new(),
            reference: DataMap::new(),
        }
    }

    fn validator(checker: Arc<dyn SemanticChecker>) -> SemanticValidator {
        SemanticValidator::new(Some(checker), Severity::High, Duration::from_secs(30), 2)
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High.needs_review());
        assert!(!Severity::Medium.needs_review());
        assert_eq!("HIGH".parse::<Severity>(), Ok(Severity::High));
        assert!("severe".parse::<Severity>().is_err());
    }

    #[tokio::test]
    async fn test_threshold_quarantines() {
        let v = validator(Arc::new(FixedChecker(vec![Severity::Medium])));
        let outcome = v.validate(request("llm_sentiment")).await;
        assert!(!outcome.quarantined);
        assert!(!outcome.skipped);

        let v = validator(Arc::new(FixedChecker(vec![Severity::Low, Severity::High])));
        let outcome = v.validate(request("llm_sentiment")).await;
        assert!(outcome.quarantined);
        assert_eq!(outcome.blocking_issues.len(), 1);
        assert_eq!(v.quarantined().len(), 1);
        assert_eq!(v.clear_quarantine(), 1);
        assert_eq!(v.quarantine_len(), 0);
    }

    #[tokio::test]
    async fn test_collaborator_error_fails_open() {
        let v = validator(Arc::new(BrokenChecker));
        let outcome = v.validate(request("llm_sentiment")).await;
        assert!(!outcome.quarantined);
        assert!(outcome.skipped);
        assert!(outcome.report.summary.contains("collaborator unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_open() {
        let v = validator(Arc::new(SlowChecker));
        let outcome = v.validate(request("llm_sentiment")).await;
        assert!(outcome.skipped);
        assert!(!outcome.quarantined);
    }

    #[tokio::test]
    async fn test_no_checker_skips() {
        let v = SemanticValidator::new(None, Severity::High, Duration::from_secs(30), 10);
        assert!(!v.is_enabled());
        assert!(v.validate(request("x")).await.skipped);
    }

    #[tokio::test]
    async fn test_batch_and_bounded_quarantine() {
        let v = validator(Arc::new(FixedChecker(vec![Severity::Critical])));
        let outcomes = v
            .check_batch(vec![request("a"), request("b"), request("c")])
            .await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.quarantined));
        let kept: Vec<String> = v.quarantined().into_iter().map(|q| q.worker).collect();
        assert_eq!(kept, vec!["b".to_string(), "c".to_string()]);
    }
}
