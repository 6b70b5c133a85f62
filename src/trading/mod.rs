pub mod allocation;
pub mod domain;
pub mod regime;
pub mod risk_aggregator;
pub mod risk_models;
pub mod signals;

// Re-export commonly used types
pub use allocation::{
    AllocationConstraint, AllocationPlan, AllocationTarget, AllocatorConfig, CapitalAllocator,
    RebalanceUrgency,
};
pub use domain::Domain;
pub use regime::{select_regime, MarketRegime, RegimeClassification, RegimeClassifier, RegimeConfig};
pub use risk_aggregator::{
    LimitStatus, PortfolioRiskSummary, RiskAggregator, RiskConfig, RiskLimit,
};
pub use risk_models::{default_risk_model, DomainRisk, RiskMetrics, RiskModel};
pub use signals::{position_size_for, Signal, SignalBundle};
