//! Hierarchical orchestration: one sub-orchestrator per domain under a
//! portfolio-level DAG

pub mod monitor;
pub mod portfolio;
pub mod sub_orchestrator;

pub use monitor::MonitoringSnapshot;
pub use portfolio::{
    FinalRecommendation, GuardianReport, OrchestratorConfig, PortfolioOrchestrator,
    PortfolioRequest, RunRecord, RunStatus,
};
pub use sub_orchestrator::{
    BarrierConfig, DomainDataSource, ParentContext, ParentSliceSource, SubOrchestrator,
    SubOrchestratorBuilder, SubOrchestratorReport, SubRunSummary,
};
