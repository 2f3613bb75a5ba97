/// Sync orchestration engine
///
/// This module coordinates the daily fetch-and-store tasks:
/// - Task contract and result normalisation
/// - Static task registry and dependency partitioning
/// - Bounded-parallel independent stage with per-task timeouts
/// - Sequential dependent stage with dependency-unmet skips
/// - Run lifecycle against the execution history
/// - Periodic triggers via tokio-cron-scheduler

// Collaborator contract and per-task results
pub mod task;

// Task registry and dependency partitioner
pub mod registry;

// Wall-clock deadline around one invocation
pub mod timeout;

// Concurrent executor for the independent stage
pub mod executor;

// Sequential runner for the dependent stage
pub mod dependent;

// Run lifecycle: record, dispatch, finalize
pub mod orchestrator;

// Periodic triggers
pub mod scheduler;

pub use executor::{ExecutorSettings, RunResults, TaskExecutor};
pub use orchestrator::{RunReport, RunRequest, SyncOrchestrator, TriggerError};
pub use registry::{Partition, RegistryError, TaskRegistry};
pub use scheduler::SyncScheduler;
pub use task::{DataHandle, SyncTask, TaskOutcome, TaskResult};
