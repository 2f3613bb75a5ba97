/// Sync execution REST API endpoints
///
/// On-demand trigger plus the read side of the execution history: paged listing,
/// single record lookup, latest runs, per-task-type status, registered tasks and
/// configured triggers.

use crate::{
    history::{ExecutionPage, ExecutionQuery, ExecutionRecord, ExecutionStore, TaskTypeStatus},
    sync::{
        orchestrator::{RunRequest, SyncOrchestrator, TriggerError},
        scheduler::{SyncScheduler, TriggerInfo},
    },
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Run lifecycle and on-demand triggering
    pub orchestrator: Arc<SyncOrchestrator>,
    /// Execution history reads
    pub store: ExecutionStore,
    /// Periodic trigger listing and task-type catalogue
    pub scheduler: Arc<SyncScheduler>,
}

/// Request body for an on-demand run
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TriggerSyncRequest {
    /// Subset of task keys; omitted or empty runs everything
    pub task_keys: Option<Vec<String>>,
    /// YYYY-MM-DD; defaults to today in the configured timezone
    pub target_date: Option<NaiveDate>,
}

/// Response for an accepted on-demand run
#[derive(Debug, Serialize)]
pub struct TriggerSyncResponse {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    #[serde(default = "default_latest_limit")]
    pub limit: u32,
}

fn default_latest_limit() -> u32 {
    10
}

/// Create sync execution routes
pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/sync/executions", get(list_executions).post(trigger_sync))
        .route("/api/sync/executions/latest", get(latest_executions))
        .route("/api/sync/executions/{id}", get(get_execution))
        .route("/api/sync/status", get(status_summary))
        .route("/api/sync/tasks", get(list_tasks))
        .route("/api/sync/triggers", get(list_triggers))
}

/// Start a run in the background
///
/// POST /api/sync/executions
/// Body: { "task_keys": ["stock_list"], "target_date": "2026-10-16" }
/// Returns 202 with the execution id as soon as the record exists
async fn trigger_sync(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<TriggerSyncResponse>), StatusCode> {
    let payload = parse_trigger_body(&body)?;
    let request = RunRequest::manual(payload.task_keys, payload.target_date);

    match Arc::clone(&state.orchestrator).trigger(request).await {
        Ok(id) => {
            tracing::info!("🚀 Manual sync accepted: {}", id);
            Ok((
                StatusCode::ACCEPTED,
                Json(TriggerSyncResponse {
                    message: format!("Sync execution {} started", id),
                    id,
                }),
            ))
        }
        Err(e) => Err(trigger_error_status(&e)),
    }
}

/// An empty body runs every task for today
fn parse_trigger_body(body: &[u8]) -> Result<TriggerSyncRequest, StatusCode> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(TriggerSyncRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        tracing::warn!("❌ Malformed sync request: {}", e);
        StatusCode::BAD_REQUEST
    })
}

fn trigger_error_status(error: &TriggerError) -> StatusCode {
    match error {
        TriggerError::Invalid(e) => {
            tracing::warn!("❌ Rejected sync request: {}", e);
            StatusCode::BAD_REQUEST
        }
        TriggerError::Bookkeeping(e) => {
            tracing::error!("❌ Failed to create sync execution: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// GET /api/sync/executions?task_type=&status=&task_name=&page=&page_size=
async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ExecutionQuery>,
) -> Result<Json<ExecutionPage>, StatusCode> {
    state.store.list(&query).await.map(Json).map_err(|e| {
        tracing::error!("Failed to list executions: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// GET /api/sync/executions/latest?limit=N
async fn latest_executions(
    State(state): State<AppState>,
    Query(query): Query<LatestQuery>,
) -> Result<Json<Vec<ExecutionRecord>>, StatusCode> {
    state.store.latest(query.limit.clamp(1, 100)).await.map(Json).map_err(|e| {
        tracing::error!("Failed to load latest executions: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// GET /api/sync/executions/{id}
async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionRecord>, StatusCode> {
    match state.store.get(&id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to get execution {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/sync/status
async fn status_summary(State(state): State<AppState>) -> Result<Json<Vec<TaskTypeStatus>>, StatusCode> {
    let task_types = state.scheduler.task_types();
    state.store.status_summary(&task_types).await.map(Json).map_err(|e| {
        tracing::error!("Failed to build status summary: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// GET /api/sync/tasks
async fn list_tasks(State(state): State<AppState>) -> Json<Value> {
    let tasks: Vec<Value> = state
        .orchestrator
        .registry()
        .definitions()
        .iter()
        .map(|def| json!({ "key": def.key, "depends_on": def.dependencies }))
        .collect();
    Json(json!({ "tasks": tasks }))
}

/// GET /api/sync/triggers
async fn list_triggers(State(state): State<AppState>) -> Json<Vec<TriggerInfo>> {
    Json(state.scheduler.list_triggers().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::StoreError;
    use crate::sync::registry::RegistryError;

    #[test]
    fn invalid_requests_map_to_bad_request() {
        let invalid = TriggerError::Invalid(RegistryError::UnknownTask("bond_list".to_string()));
        assert_eq!(trigger_error_status(&invalid), StatusCode::BAD_REQUEST);

        let broken = TriggerError::Bookkeeping(StoreError::NotFound("x".to_string()));
        assert_eq!(trigger_error_status(&broken), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn trigger_body_fields_are_optional() {
        for body in ["", "  ", "{}"] {
            let empty = parse_trigger_body(body.as_bytes()).unwrap();
            assert!(empty.task_keys.is_none());
            assert!(empty.target_date.is_none());
        }

        let full = parse_trigger_body(br#"{ "task_keys": ["stock_list"], "target_date": "2026-10-16" }"#).unwrap();
        assert_eq!(full.task_keys.unwrap(), vec!["stock_list"]);
        assert_eq!(full.target_date, NaiveDate::from_ymd_opt(2026, 10, 16));
    }

    #[test]
    fn malformed_dates_are_bad_requests() {
        let result = parse_trigger_body(br#"{ "target_date": "16/10/2026" }"#);
        assert_eq!(result.unwrap_err(), StatusCode::BAD_REQUEST);
    }
}
