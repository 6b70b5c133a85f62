//! Bitmask Completion Barrier
//!
//! Tracks which of a fixed worker set has reported. Worker names are mapped
//! to bit positions once, at registration, so completion, viability and
//! "who is missing" are single integer operations.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::errors::{OrchestraError, OrchestraResult};

/// Upper bound on workers per roster
pub const MAX_WORKERS: usize = 64;

/// Set of worker bit positions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerSet(u64);

impl WorkerSet {
    pub const EMPTY: WorkerSet = WorkerSet(0);

    pub fn from_bits(bits: u64) -> Self {
        WorkerSet(bits)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn with(self, index: usize) -> Self {
        if index >= MAX_WORKERS {
            return self;
        }
        WorkerSet(self.0 | (1u64 << index))
    }

    pub fn without(self, index: usize) -> Self {
        if index >= MAX_WORKERS {
            return self;
        }
        WorkerSet(self.0 & !(1u64 << index))
    }

    pub fn contains(&self, index: usize) -> bool {
        index < MAX_WORKERS && self.0 & (1u64 << index) != 0
    }

    pub fn union(self, other: WorkerSet) -> Self {
        WorkerSet(self.0 | other.0)
    }

    pub fn intersection(self, other: WorkerSet) -> Self {
        WorkerSet(self.0 & other.0)
    }

    pub fn difference(self, other: WorkerSet) -> Self {
        WorkerSet(self.0 & !other.0)
    }

    pub fn is_superset_of(&self, other: WorkerSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_WORKERS).filter(move |i| self.contains(*i))
    }
}

/// Static worker-name to bit-index table
#[derive(Debug, Clone, Default)]
pub struct WorkerRoster {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl WorkerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str) -> OrchestraResult<usize> {
        if self.index.contains_key(name) {
            return Err(OrchestraError::Registration(format!(
                "worker '{}' registered twice",
                name
            )));
        }
        if self.names.len() >= MAX_WORKERS {
            return Err(OrchestraError::Registration(format!(
                "cannot register '{}': roster holds at most {} workers",
                name, MAX_WORKERS
            )));
        }
        let position = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), position);
        Ok(position)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn all(&self) -> WorkerSet {
        (0..self.names.len()).fold(WorkerSet::EMPTY, WorkerSet::with)
    }

    /// Resolve names to a set, rejecting names that were never registered
    pub fn set_of<S: AsRef<str>>(&self, names: &[S]) -> OrchestraResult<WorkerSet> {
        names.iter().try_fold(WorkerSet::EMPTY, |set, name| {
            let name = name.as_ref();
            self.index_of(name)
                .map(|i| set.with(i))
                .ok_or_else(|| OrchestraError::Registration(format!("unknown worker '{}'", name)))
        })
    }

    pub fn names_in(&self, set: WorkerSet) -> Vec<String> {
        set.indices()
            .filter_map(|i| self.names.get(i).cloned())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarrierStatus {
    pub completed: WorkerSet,
    pub missing: WorkerSet,
    pub is_complete: bool,
    pub is_viable: bool,
    /// Share of required workers completed, 0-100
    pub completion_pct: f64,
}

/// Name-resolved barrier view for reports and monitoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierReport {
    pub completed: Vec<String>,
    pub missing: Vec<String>,
    pub failed: Vec<String>,
    pub is_complete: bool,
    pub is_viable: bool,
    pub completion_pct: f64,
    pub timed_out: bool,
}

#[derive(Debug, Clone)]
pub struct CompletionBarrier {
    roster: Arc<WorkerRoster>,
    required: WorkerSet,
    minimum_viable: WorkerSet,
    completed: WorkerSet,
    failed: WorkerSet,
    timeout: Duration,
    started_at: Option<Instant>,
}

impl CompletionBarrier {
    pub fn new(
        roster: Arc<WorkerRoster>,
        required: WorkerSet,
        minimum_viable: WorkerSet,
        timeout: Duration,
    ) -> OrchestraResult<Self> {
        if !required.is_superset_of(minimum_viable) {
            return Err(OrchestraError::config_error(
                "barrier minimum_viable set must be a subset of the required set",
            ));
        }
        Ok(Self {
            roster,
            required,
            minimum_viable,
            completed: WorkerSet::EMPTY,
            failed: WorkerSet::EMPTY,
            timeout,
            started_at: None,
        })
    }

    pub fn required(&self) -> WorkerSet {
        self.required
    }

    pub fn minimum_viable(&self) -> WorkerSet {
        self.minimum_viable
    }

    pub fn start(&mut self) {
        self.completed = WorkerSet::EMPTY;
        self.failed = WorkerSet::EMPTY;
        self.started_at = Some(Instant::now());
    }

    pub fn mark_complete(&mut self, worker: &str) -> BarrierStatus {
        match self.roster.index_of(worker) {
            Some(i) => {
                self.completed = self.completed.with(i);
                self.failed = self.failed.without(i);
            }
            None => warn!("Barrier ignoring completion from unknown worker '{}'", worker),
        }
        self.status()
    }

    /// Record a failure; the worker stays missing
    pub fn mark_failed(&mut self, worker: &str) {
        match self.roster.index_of(worker) {
            Some(i) => {
                self.failed = self.failed.with(i);
                warn!("Barrier: worker '{}' failed", worker);
            }
            None => warn!("Barrier ignoring failure from unknown worker '{}'", worker),
        }
    }

    pub fn status(&self) -> BarrierStatus {
        let done = self.completed.intersection(self.required).len();
        let completion_pct = if self.required.is_empty() {
            100.0
        } else {
            done as f64 / self.required.len() as f64 * 100.0
        };
        BarrierStatus {
            completed: self.completed,
            missing: self.required.difference(self.completed),
            is_complete: self.completed.is_superset_of(self.required),
            is_viable: self.completed.is_superset_of(self.minimum_viable),
            completion_pct,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.map(|at| at.elapsed()).unwrap_or_default()
    }

    /// Advisory; the caller decides whether to keep waiting
    pub fn is_timed_out(&self) -> bool {
        self.started_at.is_some() && self.elapsed() > self.timeout
    }

    pub fn completed_workers(&self) -> Vec<String> {
        self.roster.names_in(self.completed)
    }

    pub fn missing_workers(&self) -> Vec<String> {
        self.roster.names_in(self.status().missing)
    }

    pub fn failed_workers(&self) -> Vec<String> {
        self.roster.names_in(self.failed)
    }

    pub fn report(&self) -> BarrierReport {
        let status = self.status();
        BarrierReport {
            completed: self.roster.names_in(status.completed),
            missing: self.roster.names_in(status.missing),
            failed: self.failed_workers(),
            is_complete: status.is_complete,
            is_viable: status.is_viable,
            completion_pct: status.completion_pct,
            timed_out: self.is_timed_out(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> Arc<WorkerRoster> {
        let mut roster = WorkerRoster::new();
        for name in [
            "ta_rsi",
            "ta_macd",
            "ta_volume",
            "ta_bollinger",
            "llm_sentiment",
            "llm_fundamental",
            "llm_macro",
        ] {
            roster.register(name).unwrap();
        }
        Arc::new(roster)
    }

    fn barrier() -> CompletionBarrier {
        let roster = roster();
        let required = roster.all();
        let viable = roster.set_of(&["ta_rsi", "ta_macd", "llm_sentiment"]).unwrap();
        CompletionBarrier::new(roster, required, viable, Duration::from_secs(120)).unwrap()
    }

    #[test]
    fn test_viable_before_complete() {
        let mut barrier = barrier();
        barrier.start();

        barrier.mark_complete("ta_rsi");
        let status = barrier.mark_complete("ta_macd");
        assert!(!status.is_viable);

        let status = barrier.mark_complete("llm_sentiment");
        assert!(status.is_viable);
        assert!(!status.is_complete);
        assert_eq!(status.missing.len(), 4);
        assert!((status.completion_pct - 3.0 / 7.0 * 100.0).abs() < 1e-9);

        for name in ["ta_volume", "ta_bollinger", "llm_fundamental", "llm_macro"] {
            barrier.mark_complete(name);
        }
        let status = barrier.status();
        assert!(status.is_complete);
        assert!(status.missing.is_empty());
        assert_eq!(status.completion_pct, 100.0);
    }

    #[test]
    fn test_failed_workers_stay_missing() {
        let mut barrier = barrier();
        barrier.start();
        barrier.mark_complete("ta_rsi");
        barrier.mark_failed("llm_macro");

        assert_eq!(barrier.failed_workers(), vec!["llm_macro".to_string()]);
        assert!(barrier.missing_workers().contains(&"llm_macro".to_string()));
        assert_eq!(barrier.completed_workers(), vec!["ta_rsi".to_string()]);
    }

    #[test]
    fn test_unknown_worker_is_ignored() {
        let mut barrier = barrier();
        barrier.start();
        let status = barrier.mark_complete("ghost");
        assert!(status.completed.is_empty());
    }

    #[test]
    fn test_start_resets_state() {
        let mut barrier = barrier();
        barrier.start();
        barrier.mark_complete("ta_rsi");
        barrier.start();
        assert!(barrier.completed_workers().is_empty());
    }

    #[test]
    fn test_minimum_viable_must_be_subset() {
        let roster = roster();
        let required = roster.set_of(&["ta_rsi"]).unwrap();
        let viable = roster.set_of(&["ta_macd"]).unwrap();
        assert!(CompletionBarrier::new(roster, required, viable, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_roster_rejects_duplicates_and_overflow() {
        let mut roster = WorkerRoster::new();
        roster.register("a").unwrap();
        assert!(roster.register("a").is_err());
        for i in 1..MAX_WORKERS {
            roster.register(&format!("w{}", i)).unwrap();
        }
        assert!(roster.register("one_too_many").is_err());
        assert_eq!(roster.all().len(), MAX_WORKERS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_strict() {
        let mut barrier = barrier();
        assert!(!barrier.is_timed_out());
        barrier.start();
        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(!barrier.is_timed_out());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(barrier.is_timed_out());
    }
}
