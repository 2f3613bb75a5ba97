/// HTTP API Layer
///
/// This module provides the REST API endpoints for the sync service:
/// - On-demand run triggering
/// - Execution history queries and per-task-type status
/// - Registered task and trigger listings

// Sync execution endpoints (POST/GET)
pub mod executions;

// Re-export router builder and shared state
pub use executions::{create_execution_routes, AppState};
