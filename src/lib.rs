// Orchestra - regime-aware hierarchical orchestration engine
// Coordinates independent analysis workers per asset-class domain, combines
// their outputs into graded allocation decisions and isolates partial failure.

#![deny(clippy::unwrap_used)]

pub mod config;
pub mod consensus;
pub mod errors;
pub mod guardian;
pub mod orchestrator;
pub mod resilience;
pub mod trading;
pub mod workers;

// Re-export commonly used items
pub use config::Config;
pub use errors::{CallError, OrchestraError, OrchestraResult};
pub use orchestrator::{
    FinalRecommendation, MonitoringSnapshot, PortfolioOrchestrator, PortfolioRequest,
    SubOrchestrator,
};
pub use resilience::{BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, RetryExecutor};
pub use workers::{DataMap, Direction, Worker, WorkerResult};
