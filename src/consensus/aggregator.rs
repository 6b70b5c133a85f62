//! Hybrid Consensus Voting
//!
//! Two tracks are blended into one signed conviction:
//! - numeric track: confidence-weighted mean of 0-100 scores, mapped to [-1, 1]
//! - categorical track: confidence-weighted direction vote, signed by the
//!   winning direction and scaled by its agreement ratio

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{OrchestraError, OrchestraResult};
use crate::workers::{CategoricalOpinion, Direction, NumericScore, WorkerOutput, WorkerResult};

/// Allowed drift of the two weights from summing to 1.0
const WEIGHT_TOLERANCE: f64 = 0.001;

/// Numeric mean used when there is nothing to average
const NEUTRAL_SCORE: f64 = 50.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub numeric_weight: f64,
    pub categorical_weight: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            numeric_weight: 0.6,
            categorical_weight: 0.4,
        }
    }
}

impl ConsensusConfig {
    pub fn validate(&self) -> OrchestraResult<()> {
        let total = self.numeric_weight + self.categorical_weight;
        if !total.is_finite() || (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(OrchestraError::config_error(format!(
                "voting weights must sum to 1.0, got {} + {} = {}",
                self.numeric_weight, self.categorical_weight, total
            )));
        }
        Ok(())
    }
}

/// Consensus for one entity in one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvictionScore {
    pub entity_id: String,
    /// Weighted numeric mean, 0-100
    pub numeric_score: f64,
    pub numeric_normalized: f64,
    pub categorical_direction: Direction,
    pub categorical_agreement: f64,
    /// Blended conviction in [-1, 1]
    pub combined_score: f64,
    pub participating_workers: Vec<String>,
    pub missing_workers: Vec<String>,
    pub degraded: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ConsensusAggregator {
    numeric_weight: f64,
    categorical_weight: f64,
    numeric: Vec<(String, NumericScore)>,
    categorical: Vec<(String, CategoricalOpinion)>,
}

impl ConsensusAggregator {
    pub fn new(config: &ConsensusConfig) -> OrchestraResult<Self> {
        config.validate()?;
        Ok(Self {
            numeric_weight: config.numeric_weight,
            categorical_weight: config.categorical_weight,
            numeric: Vec::new(),
            categorical: Vec::new(),
        })
    }

    pub fn add(&mut self, output: &WorkerOutput) {
        match &output.result {
            WorkerResult::NumericScore(score) => self.add_numeric(&output.worker, score.clone()),
            WorkerResult::CategoricalOpinion(opinion) => {
                self.add_categorical(&output.worker, opinion.clone())
            }
        }
    }

    pub fn add_numeric(&mut self, worker: &str, score: NumericScore) {
        self.numeric.push((worker.to_string(), score));
    }

    pub fn add_categorical(&mut self, worker: &str, opinion: CategoricalOpinion) {
        self.categorical.push((worker.to_string(), opinion));
    }

    pub fn has_categorical_votes(&self) -> bool {
        !self.categorical.is_empty()
    }

    /// Confidence-weighted mean score, 50 when nothing carries weight
    pub fn numeric_weighted_score(&self) -> f64 {
        let total_confidence: f64 = self.numeric.iter().map(|(_, s)| s.confidence).sum();
        if self.numeric.is_empty() || total_confidence == 0.0 {
            return NEUTRAL_SCORE;
        }
        let weighted: f64 = self.numeric.iter().map(|(_, s)| s.score * s.confidence).sum();
        weighted / total_confidence
    }

    /// Winning direction and its share of the total vote weight
    pub fn categorical_consensus(&self) -> (Direction, f64) {
        let mut weights = [0.0_f64; 3];
        for (_, opinion) in &self.categorical {
            weights[vote_slot(opinion.direction)] += opinion.confidence;
        }
        let total: f64 = weights.iter().sum();
        if self.categorical.is_empty() || total == 0.0 {
            return (Direction::Neutral, 0.0);
        }

        let mut winner = Direction::VOTE_ORDER[0];
        for direction in Direction::VOTE_ORDER.iter().skip(1) {
            if weights[vote_slot(*direction)] > weights[vote_slot(winner)] {
                winner = *direction;
            }
        }
        (winner, weights[vote_slot(winner)] / total)
    }

    pub fn participating_workers(&self) -> Vec<String> {
        self.numeric
            .iter()
            .map(|(name, _)| name.clone())
            .chain(self.categorical.iter().map(|(name, _)| name.clone()))
            .collect()
    }

    pub fn aggregate(&self, entity_id: &str, missing_workers: &[String]) -> ConvictionScore {
        let numeric_score = self.numeric_weighted_score();
        let numeric_normalized = (numeric_score - NEUTRAL_SCORE) / NEUTRAL_SCORE;
        let (direction, agreement) = self.categorical_consensus();
        let categorical_signed = direction.sign() * agreement;

        let combined = (self.numeric_weight * numeric_normalized
            + self.categorical_weight * categorical_signed)
            .clamp(-1.0, 1.0);

        ConvictionScore {
            entity_id: entity_id.to_string(),
            numeric_score,
            numeric_normalized,
            categorical_direction: direction,
            categorical_agreement: agreement,
            combined_score: combined,
            participating_workers: self.participating_workers(),
            missing_workers: missing_workers.to_vec(),
            degraded: !missing_workers.is_empty(),
            timestamp: Utc::now(),
        }
    }

    pub fn reset(&mut self) {
        self.numeric.clear();
        self.categorical.clear();
    }
}

fn vote_slot(direction: Direction) -> usize {
    match direction {
        Direction::Bullish => 0,
        Direction::Bearish => 1,
        Direction::Neutral => 2,
    }
}
