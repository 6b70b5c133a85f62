//! Layer 3: statistical drift detection
//!
//! Rolling windows per (worker, metric) plus a success/error window per
//! worker. A drift check compares the most recent samples against the rest
//! of the window with a z-score.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::warn;

use super::rules::OutputRecord;
use super::semantic::Severity;

/// Output fields tracked automatically by `record_output`
pub const TRACKED_FIELDS: [&str; 5] = [
    "confidence",
    "conviction",
    "score",
    "severity_score",
    "response_time_ms",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    pub window_size: usize,
    pub recent_window: usize,
    pub z_threshold: f64,
    /// Minimum baseline observations before a metric is checked
    pub min_samples: usize,
    pub max_alerts: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            window_size: 200,
            recent_window: 20,
            z_threshold: 2.5,
            min_samples: 30,
            max_alerts: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftType {
    MeanShift,
    VarianceChange,
    ErrorRateSpike,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftAlert {
    pub worker: String,
    pub metric: String,
    pub drift_type: DriftType,
    pub baseline_value: f64,
    pub current_value: f64,
    pub z_score: f64,
    pub severity: Severity,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub recent_mean: f64,
    pub recent_std: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerDriftSummary {
    pub worker: String,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub error_rate: Option<f64>,
}

/// Severity for a mean-shift z-score; each bound is exclusive
pub fn severity_from_z(z: f64) -> Severity {
    if z > 4.0 {
        Severity::Critical
    } else if z > 3.5 {
        Severity::High
    } else if z > 3.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1)
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

pub struct DriftDetector {
    config: DriftConfig,
    metrics: BTreeMap<String, BTreeMap<String, VecDeque<f64>>>,
    outcomes: BTreeMap<String, VecDeque<bool>>,
    alerts: VecDeque<DriftAlert>,
}

impl DriftDetector {
    pub fn new(config: DriftConfig) -> Self {
        Self {
            config,
            metrics: BTreeMap::new(),
            outcomes: BTreeMap::new(),
            alerts: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    pub fn record(&mut self, worker: &str, metric: &str, value: f64) {
        if !value.is_finite() {
            return;
        }
        let window = self
            .metrics
            .entry(worker.to_string())
            .or_default()
            .entry(metric.to_string())
            .or_default();
        window.push_back(value);
        while window.len() > self.config.window_size {
            window.pop_front();
        }
    }

    pub fn record_error(&mut self, worker: &str, is_error: bool) {
        let window = self.outcomes.entry(worker.to_string()).or_default();
        window.push_back(is_error);
        while window.len() > self.config.window_size {
            window.pop_front();
        }
    }

    pub fn record_output(&mut self, worker: &str, record: &OutputRecord) {
        for field in TRACKED_FIELDS {
            if let Some(value) = record.number(field) {
                self.record(worker, field, value);
            }
        }
    }

    /// Check one worker, or every tracked worker when `worker` is None.
    /// New alerts are retained and returned.
    pub fn check_drift(&mut self, worker: Option<&str>) -> Vec<DriftAlert> {
        let workers: Vec<String> = match worker {
            Some(name) => vec![name.to_string()],
            None => self
                .metrics
                .keys()
                .chain(self.outcomes.keys())
                .cloned()
                .collect::<std::collections::BTreeSet<_>>()
                .into_iter()
                .collect(),
        };

        let mut found = Vec::new();
        for name in &workers {
            if let Some(metrics) = self.metrics.get(name) {
                for (metric, window) in metrics {
                    let values: Vec<f64> = window.iter().copied().collect();
                    if let Some(alert) = self.check_metric(name, metric, &values) {
                        found.push(alert);
                    }
                }
            }
            if let Some(alert) = self.check_error_rate(name) {
                found.push(alert);
            }
        }

        for alert in &found {
            warn!("Drift alert [{}]: {}", alert.severity, alert.description);
            self.alerts.push_back(alert.clone());
        }
        while self.alerts.len() > self.config.max_alerts {
            self.alerts.pop_front();
        }
        found
    }

    fn check_metric(&self, worker: &str, metric: &str, values: &[f64]) -> Option<DriftAlert> {
        let split = values.len().checked_sub(self.config.recent_window)?;
        let (baseline, recent) = values.split_at(split);
        if baseline.len() < self.config.min_samples || recent.is_empty() {
            return None;
        }

        let baseline_mean = mean(baseline);
        let baseline_std = std_dev(baseline);
        if baseline_std == 0.0 {
            return None;
        }

        let recent_mean = mean(recent);
        let z_score = (recent_mean - baseline_mean).abs() / baseline_std;
        if z_score < self.config.z_threshold {
            return None;
        }

        let variance_ratio = std_dev(recent) / baseline_std;
        let drift_type = if !(0.5..=2.0).contains(&variance_ratio) {
            DriftType::VarianceChange
        } else {
            DriftType::MeanShift
        };

        Some(DriftAlert {
            worker: worker.to_string(),
            metric: metric.to_string(),
            drift_type,
            baseline_value: baseline_mean,
            current_value: recent_mean,
            z_score,
            severity: severity_from_z(z_score),
            description: format!(
                "{}.{}: baseline={:.4}, recent={:.4}, z={:.2}, variance_ratio={:.2}",
                worker, metric, baseline_mean, recent_mean, z_score, variance_ratio
            ),
            timestamp: Utc::now(),
        })
    }

    fn check_error_rate(&self, worker: &str) -> Option<DriftAlert> {
        let outcomes = self.outcomes.get(worker)?;
        if outcomes.len() < self.config.min_samples {
            return None;
        }

        let baseline_rate = outcomes.iter().filter(|e| **e).count() as f64 / outcomes.len() as f64;
        let recent: Vec<bool> = outcomes
            .iter()
            .skip(outcomes.len().saturating_sub(self.config.recent_window))
            .copied()
            .collect();
        let recent_rate = recent.iter().filter(|e| **e).count() as f64 / recent.len() as f64;

        if baseline_rate == 0.0 && recent_rate == 0.0 {
            return None;
        }

        let z_score = if baseline_rate > 0.0 && baseline_rate < 1.0 {
            let std = (baseline_rate * (1.0 - baseline_rate) / recent.len() as f64).sqrt();
            (recent_rate - baseline_rate) / std
        } else {
            0.0
        };
        if z_score < self.config.z_threshold {
            return None;
        }

        let severity = if recent_rate > 0.5 {
            Severity::Critical
        } else if recent_rate > 0.3 {
            Severity::High
        } else {
            Severity::Medium
        };

        Some(DriftAlert {
            worker: worker.to_string(),
            metric: "error_rate".to_string(),
            drift_type: DriftType::ErrorRateSpike,
            baseline_value: baseline_rate,
            current_value: recent_rate,
            z_score,
            severity,
            description: format!(
                "{} error rate: baseline={:.2}%, recent={:.2}%, z={:.2}",
                worker,
                baseline_rate * 100.0,
                recent_rate * 100.0,
                z_score
            ),
            timestamp: Utc::now(),
        })
    }

    /// Retained alerts, optionally only those of one severity
    pub fn alerts(&self, severity: Option<Severity>) -> Vec<DriftAlert> {
        self.alerts
            .iter()
            .filter(|a| severity.map_or(true, |s| a.severity == s))
            .cloned()
            .collect()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.len()
    }

    pub fn clear_alerts(&mut self) -> usize {
        let count = self.alerts.len();
        self.alerts.clear();
        count
    }

    pub fn worker_summary(&self, worker: &str) -> WorkerDriftSummary {
        let recent_n = self.config.recent_window;
        let metrics = self
            .metrics
            .get(worker)
            .map(|metrics| {
                metrics
                    .iter()
                    .map(|(name, window)| {
                        let values: Vec<f64> = window.iter().copied().collect();
                        let recent = &values[values.len().saturating_sub(recent_n)..];
                        let summary = MetricSummary {
                            count: values.len(),
                            mean: mean(&values),
                            std: std_dev(&values),
                            recent_mean: mean(recent),
                            recent_std: std_dev(recent),
                        };
                        (name.clone(), summary)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let error_rate = self
            .outcomes
            .get(worker)
            .filter(|o| !o.is_empty())
            .map(|o| o.iter().filter(|e| **e).count() as f64 / o.len() as f64);

        WorkerDriftSummary {
            worker: worker.to_string(),
            metrics,
            error_rate,
        }
    }

    pub fn tracked_workers(&self) -> Vec<String> {
        self.metrics.keys().cloned().collect()
    }
}

impl Default for DriftDetector {
    fn default() -> Self {
        Self::new(DriftConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 40 samples with mean 0.5 and sample std exactly 0.1
    fn baseline() -> Vec<f64> {
        let d = 0.1 * (39.0_f64 / 40.0).sqrt();
        (0..40).map(|i| if i % 2 == 0 { 0.5 + d } else { 0.5 - d }).collect()
    }

    fn feed(detector: &mut DriftDetector, values: &[f64]) {
        for v in values {
            detector.record("bonds.ta_rsi", "confidence", *v);
        }
    }

    #[test]
    fn test_severity_boundaries() {
        assert_eq!(severity_from_z(4.01), Severity::Critical);
        assert_eq!(severity_from_z(4.0), Severity::High);
        assert_eq!(severity_from_z(3.5), Severity::Medium);
        assert_eq!(severity_from_z(3.0), Severity::Low);
        assert_eq!(severity_from_z(2.6), Severity::Low);
    }

    #[test]
    fn test_mean_shift_of_four_sigma() {
        let mut detector = DriftDetector::default();
        feed(&mut detector, &baseline());
        let d = 0.1 * (19.0_f64 / 20.0).sqrt();
        let recent: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 0.9 + d } else { 0.9 - d }).collect();
        feed(&mut detector, &recent);

        let alerts = detector.check_drift(Some("bonds.ta_rsi"));
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert!((alert.z_score - 4.0).abs() < 1e-9);
        assert!((alert.baseline_value - 0.5).abs() < 1e-12);
        assert!((alert.current_value - 0.9).abs() < 1e-12);
        assert_eq!(alert.drift_type, DriftType::MeanShift);
        assert_eq!(alert.severity, severity_from_z(alert.z_score));
        assert!(alert.severity.needs_review());
        assert_eq!(detector.alert_count(), 1);
    }

    #[test]
    fn test_flat_recent_window_is_variance_change() {
        let mut detector = DriftDetector::default();
        feed(&mut detector, &baseline());
        feed(&mut detector, &[0.9; 20]);
        let alerts = detector.check_drift(None);
        assert_eq!(alerts[0].drift_type, DriftType::VarianceChange);
    }

    #[test]
    fn test_insufficient_baseline_is_skipped() {
        let mut detector = DriftDetector::default();
        feed(&mut detector, &baseline()[..20]);
        feed(&mut detector, &[5.0; 20]);
        assert!(detector.check_drift(None).is_empty());
    }

    #[test]
    fn test_stable_metric_has_no_alert() {
        let mut detector = DriftDetector::default();
        feed(&mut detector, &baseline());
        feed(&mut detector, &baseline()[..20]);
        assert!(detector.check_drift(None).is_empty());
    }

    #[test]
    fn test_error_rate_spike() {
        let mut detector = DriftDetector::default();
        for i in 0..80 {
            detector.record_error("crypto.onchain", i % 20 == 0);
        }
        for _ in 0..20 {
            detector.record_error("crypto.onchain", true);
        }
        let alerts = detector.check_drift(Some("crypto.onchain"));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].drift_type, DriftType::ErrorRateSpike);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(detector.alerts(Some(Severity::Critical)).len(), 1);
        assert!(detector.alerts(Some(Severity::Low)).is_empty());
    }

    #[test]
    fn test_all_errors_never_alerts() {
        let mut detector = DriftDetector::default();
        for _ in 0..50 {
            detector.record_error("x", true);
        }
        assert!(detector.check_drift(None).is_empty());
    }

    #[test]
    fn test_window_is_bounded_and_summarized() {
        let mut detector = DriftDetector::new(DriftConfig {
            window_size: 50,
            ..Default::default()
        });
        for i in 0..120 {
            detector.record("w", "score", i as f64);
        }
        detector.record("w", "score", f64::NAN);
        detector.record_error("w", false);

        let summary = detector.worker_summary("w");
        assert_eq!(summary.metrics["score"].count, 50);
        assert_eq!(summary.metrics["score"].recent_mean, 109.5);
        assert_eq!(summary.error_rate, Some(0.0));
        assert!(detector.worker_summary("missing").metrics.is_empty());
    }
}
