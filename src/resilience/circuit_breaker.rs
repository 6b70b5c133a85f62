//! Per-Worker Circuit Breakers
//!
//! Each breaker isolates one named worker. After `fail_max` consecutive
//! failures it opens and rejects calls without running them. Once
//! `reset_timeout` has elapsed since the last failure it reports HALF_OPEN
//! and admits a single trial call: success closes it, failure re-opens it
//! and restarts the window.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::CallError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "CLOSED"),
            BreakerState::Open => write!(f, "OPEN"),
            BreakerState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens
    pub fail_max: u32,

    /// Seconds an open breaker waits before admitting a trial call
    pub reset_timeout_secs: f64,

    /// Upper bound on a single call, in seconds
    pub call_timeout_secs: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            fail_max: 3,
            reset_timeout_secs: 60.0,
            call_timeout_secs: 30.0,
        }
    }
}

impl CircuitBreakerConfig {
    /// Settings for breakers wrapping whole sub-orchestrator runs
    pub fn for_sub_orchestrators() -> Self {
        Self {
            fail_max: 3,
            reset_timeout_secs: 120.0,
            call_timeout_secs: 300.0,
        }
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.reset_timeout_secs).unwrap_or_default()
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.call_timeout_secs).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: BreakerState,
    pub to: BreakerState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerCounters {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub consecutive_failures: u32,
}

/// Read-only view of a breaker for monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub fail_max: u32,
    pub counters: BreakerCounters,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub transitions: Vec<StateTransition>,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
    counters: BreakerCounters,
    transitions: Vec<StateTransition>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure: None,
            last_failure_at: None,
            last_success_at: None,
            trial_in_flight: false,
            counters: BreakerCounters::default(),
            transitions: Vec::new(),
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Clears the trial flag if a call future is dropped before it settles
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.inner.lock().trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new<S: Into<String>>(name: S, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state; an OPEN breaker whose reset window has elapsed reads as HALF_OPEN
    pub fn state(&self) -> BreakerState {
        let inner = self.inner.lock();
        self.effective_state(&inner)
    }

    pub fn counters(&self) -> BreakerCounters {
        self.inner.lock().counters.clone()
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: self.effective_state(&inner),
            failure_count: inner.failure_count,
            fail_max: self.config.fail_max,
            counters: inner.counters.clone(),
            last_failure_at: inner.last_failure_at,
            last_success_at: inner.last_success_at,
            transitions: inner.transitions.clone(),
        }
    }

    /// Run `operation` through the breaker.
    ///
    /// The operation runs as its own task bounded by the call timeout. A
    /// timed-out task is abandoned and its result discarded; timeouts and
    /// panics count as failures. Calls rejected by an open breaker never
    /// start the operation.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, CallError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.admit()?;
        let mut guard = CallGuard {
            breaker: self,
            settled: false,
        };

        let timeout = self.config.call_timeout();
        let handle = tokio::spawn(operation());
        let outcome = match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(source))) => Err(CallError::Failed {
                name: self.name.clone(),
                source,
            }),
            Ok(Err(_)) => Err(CallError::Panicked {
                name: self.name.clone(),
            }),
            Err(_) => Err(CallError::Timeout {
                name: self.name.clone(),
                timeout,
            }),
        };

        match &outcome {
            Ok(_) => self.record_success(),
            Err(e) => self.record_failure(e),
        }
        guard.settled = true;
        outcome
    }

    /// Force the breaker closed and clear its failure counters
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        inner.counters.consecutive_failures = 0;
        inner.trial_in_flight = false;
        if inner.state != BreakerState::Closed {
            self.transition(&mut inner, BreakerState::Closed);
        }
        info!("Circuit breaker '{}' manually reset", self.name);
    }

    fn effective_state(&self, inner: &BreakerInner) -> BreakerState {
        match inner.state {
            BreakerState::Open => {
                let elapsed_past_reset = inner
                    .last_failure
                    .map_or(true, |at| at.elapsed() >= self.config.reset_timeout());
                if elapsed_past_reset {
                    BreakerState::HalfOpen
                } else {
                    BreakerState::Open
                }
            }
            state => state,
        }
    }

    fn admit(&self) -> Result<(), CallError> {
        let mut inner = self.inner.lock();
        match self.effective_state(&inner) {
            BreakerState::Closed => {}
            BreakerState::Open => {
                inner.counters.rejected_calls += 1;
                let retry_in = inner
                    .last_failure
                    .map(|at| self.config.reset_timeout().saturating_sub(at.elapsed()))
                    .unwrap_or_default();
                debug!("Circuit breaker '{}' rejected call while OPEN", self.name);
                return Err(CallError::Open {
                    name: self.name.clone(),
                    retry_in,
                });
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    inner.counters.rejected_calls += 1;
                    return Err(CallError::Open {
                        name: self.name.clone(),
                        retry_in: Duration::ZERO,
                    });
                }
                inner.trial_in_flight = true;
                if inner.state != BreakerState::HalfOpen {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                }
            }
        }
        inner.counters.total_calls += 1;
        Ok(())
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        inner.counters.successful_calls += 1;
        inner.counters.consecutive_failures = 0;
        inner.last_success_at = Some(Utc::now());
        inner.trial_in_flight = false;
        if inner.state != BreakerState::Closed {
            self.transition(&mut inner, BreakerState::Closed);
        }
    }

    fn record_failure(&self, error: &CallError) {
        let mut inner = self.inner.lock();
        let was_trial = inner.state == BreakerState::HalfOpen;
        inner.failure_count += 1;
        inner.counters.failed_calls += 1;
        inner.counters.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());
        inner.trial_in_flight = false;

        if (was_trial || inner.failure_count >= self.config.fail_max)
            && inner.state != BreakerState::Open
        {
            self.transition(&mut inner, BreakerState::Open);
            warn!(
                "Circuit breaker '{}' OPEN after {} failures: {}",
                self.name, inner.failure_count, error
            );
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        let from = inner.state;
        inner.state = to;
        inner.transitions.push(StateTransition {
            from,
            to,
            at: Utc::now(),
        });
        info!("Circuit breaker '{}': {} -> {}", self.name, from, to);
    }
}

/// Process-wide map of breakers keyed by worker name.
///
/// Breakers are created lazily on first use and live for the life of the
/// registry. The config passed on first creation wins.
#[derive(Debug)]
pub struct BreakerRegistry {
    defaults: CircuitBreakerConfig,
    breakers: RwLock<BTreeMap<String, Arc<CircuitBreaker>>>,
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl BreakerRegistry {
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            defaults,
            breakers: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn defaults(&self) -> &CircuitBreakerConfig {
        &self.defaults
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, self.defaults.clone())
    }

    pub fn get_or_create_with(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().get(name) {
            return Arc::clone(existing);
        }
        let mut breakers = self.breakers.write();
        Arc::clone(
            breakers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config))),
        )
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }

    pub fn all_states(&self) -> BTreeMap<String, BreakerState> {
        self.breakers
            .read()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state()))
            .collect()
    }

    /// Names of breakers currently rejecting calls
    pub fn open_breakers(&self) -> Vec<String> {
        self.breakers
            .read()
            .iter()
            .filter(|(_, breaker)| breaker.state() == BreakerState::Open)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn stats(&self) -> BTreeMap<String, BreakerSnapshot> {
        self.breakers
            .read()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.snapshot()))
            .collect()
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.read().values() {
            breaker.reset();
        }
    }
}
