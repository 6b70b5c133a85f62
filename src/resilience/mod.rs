//! Failure isolation for worker and sub-orchestrator calls

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    BreakerCounters, BreakerRegistry, BreakerSnapshot, BreakerState, CircuitBreaker,
    CircuitBreakerConfig, StateTransition,
};
pub use retry::{RetryConfig, RetryExecutor};
