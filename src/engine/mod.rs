//! Cycle driver: one orchestrated swap per cycle, repeated by a scheduler.

pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::{
    AmountPolicy, CyclePhase, CycleReport, OrchestratorConfig, SwapOrchestrator, SwapStats,
};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerExit};
