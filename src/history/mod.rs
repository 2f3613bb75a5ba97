/// Execution history
///
/// Persisted run records, their status state machine, and the history queries
/// exposed to the API.

// Record, status and query types
pub mod types;

// Store-boundary JSON coercion
pub mod portable;

// SQLite-backed record store
pub mod store;

pub use store::{ExecutionStore, StoreError};
pub use types::{
    ExecutionPage, ExecutionQuery, ExecutionRecord, ExecutionStatus, NewExecution, TaskTypeStatus,
    TriggeredBy,
};
