/// datasync: daily data synchronization orchestrator
///
/// Runs a registry of fetch-and-store tasks for a target date: independent tasks in a
/// bounded worker pool, dependent tasks afterwards in order, each under a hard timeout,
/// with every run persisted as an execution record.

// Core configuration and setup
pub mod config;

// SQLite pool and schema
pub mod storage;

// Execution history - records, status transitions, queries
pub mod history;

// Orchestration engine - registry, executor, dependent stage, triggers
pub mod sync;

// Concrete sync tasks
pub mod collectors;

// HTTP API layer - trigger and history endpoints
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use history::{ExecutionRecord, ExecutionStatus, ExecutionStore, TriggeredBy};
pub use server::start_server;
pub use sync::{RunRequest, SyncOrchestrator, SyncTask, TaskOutcome, TaskRegistry, TaskResult};
