//! Worker Contract
//!
//! Workers are named analysis units invoked by a sub-orchestrator. Each one
//! receives the domain's opaque data map and returns either a numeric score
//! or a categorical opinion. Their internal formulas live outside this crate.

pub mod replay;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub use replay::{ReplayResponse, ReplaySpec, ReplayWorker};

/// Opaque key-value data handed to workers
pub type DataMap = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

impl Direction {
    /// Order in which tied votes are resolved
    pub const VOTE_ORDER: [Direction; 3] = [Direction::Bullish, Direction::Bearish, Direction::Neutral];

    pub fn sign(&self) -> f64 {
        match self {
            Direction::Bullish => 1.0,
            Direction::Bearish => -1.0,
            Direction::Neutral => 0.0,
        }
    }

    /// Unknown labels map to neutral
    pub fn parse_lenient(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "bullish" => Direction::Bullish,
            "bearish" => Direction::Bearish,
            _ => Direction::Neutral,
        }
    }

    pub fn from_score(score: f64) -> Self {
        if score > 0.0 {
            Direction::Bullish
        } else if score < 0.0 {
            Direction::Bearish
        } else {
            Direction::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Bullish => "bullish",
            Direction::Bearish => "bearish",
            Direction::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which voting track a worker contributes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Track {
    Numeric,
    Categorical,
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Track::Numeric => write!(f, "numeric"),
            Track::Categorical => write!(f, "categorical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericScore {
    pub indicator: String,
    /// 0-100, 50 is neutral
    pub score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub signals: DataMap,
}

impl NumericScore {
    pub fn new<S: Into<String>>(indicator: S, score: f64, confidence: f64) -> Self {
        Self {
            indicator: indicator.into(),
            score,
            confidence,
            signals: DataMap::new(),
        }
    }

    pub fn with_signal<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.signals.insert(key.into(), value.into());
        self
    }

    /// Copy with score in [0, 100] and confidence in [0, 1]
    pub fn clamped(&self) -> Self {
        Self {
            score: self.score.clamp(0.0, 100.0),
            confidence: self.confidence.clamp(0.0, 1.0),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalOpinion {
    pub direction: Direction,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub model: String,
}

impl CategoricalOpinion {
    pub fn new(direction: Direction, confidence: f64) -> Self {
        Self {
            direction,
            confidence,
            reasoning: String::new(),
            model: String::new(),
        }
    }

    pub fn clamped(&self) -> Self {
        Self {
            confidence: self.confidence.clamp(0.0, 1.0),
            ..self.clone()
        }
    }
}

/// Output of one worker invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerResult {
    NumericScore(NumericScore),
    CategoricalOpinion(CategoricalOpinion),
}

impl WorkerResult {
    pub fn track(&self) -> Track {
        match self {
            WorkerResult::NumericScore(_) => Track::Numeric,
            WorkerResult::CategoricalOpinion(_) => Track::Categorical,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            WorkerResult::NumericScore(score) => score.confidence,
            WorkerResult::CategoricalOpinion(opinion) => opinion.confidence,
        }
    }
}

/// A successful invocation as recorded by the sub-orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutput {
    pub worker: String,
    pub result: WorkerResult,
    pub response_time_ms: f64,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, data: Arc<DataMap>) -> anyhow::Result<WorkerResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parsing_and_sign() {
        assert_eq!(Direction::parse_lenient("BULLISH"), Direction::Bullish);
        assert_eq!(Direction::parse_lenient(" bearish "), Direction::Bearish);
        assert_eq!(Direction::parse_lenient("sideways"), Direction::Neutral);
        assert_eq!(Direction::Bearish.sign(), -1.0);
        assert_eq!(Direction::from_score(0.0), Direction::Neutral);
    }

    #[test]
    fn test_worker_result_is_tagged() {
        let result = WorkerResult::NumericScore(NumericScore::new("rsi", 72.0, 0.8).with_signal("rsi", 71.5));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["kind"], "numeric_score");
        assert_eq!(json["signals"]["rsi"], 71.5);

        let parsed: WorkerResult = serde_json::from_value(serde_json::json!({
            "kind": "categorical_opinion",
            "direction": "bearish",
            "confidence": 0.7
        }))
        .unwrap();
        assert_eq!(parsed.track(), Track::Categorical);
        assert_eq!(parsed.confidence(), 0.7);
    }

    #[test]
    fn test_clamping() {
        let clamped = NumericScore::new("macd", 140.0, -0.5).clamped();
        assert_eq!(clamped.score, 100.0);
        assert_eq!(clamped.confidence, 0.0);
    }
}
