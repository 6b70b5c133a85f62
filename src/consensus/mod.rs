//! Completion tracking and consensus voting for one sub-orchestrator run

pub mod aggregator;
pub mod barrier;

pub use aggregator::{ConsensusAggregator, ConsensusConfig, ConvictionScore};
pub use barrier::{
    BarrierReport, BarrierStatus, CompletionBarrier, WorkerRoster, WorkerSet, MAX_WORKERS,
};
