/// Task contract shared by every sync collaborator
///
/// A collaborator fetches one slice of provider data for a target date and stores
/// it through the exclusive database connection the orchestrator hands it.
/// Whatever it returns is normalised into a `TaskResult` at this boundary.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{pool::PoolConnection, Sqlite};
use std::time::Duration;

/// Exclusive data-access handle owned by one task invocation.
/// Returned to the pool when dropped.
pub type DataHandle = PoolConnection<Sqlite>;

/// Marker carried by results synthesized for tasks whose dependency failed
pub const DEPENDENCY_UNMET: &str = "dependency unmet";

/// Marker carried by results synthesized by the timeout guard
pub const TIMED_OUT: &str = "timed out";

/// A unit of fetch-transform-store work registered under a task key
#[async_trait]
pub trait SyncTask: Send + Sync {
    async fn run(&self, handle: &mut DataHandle, target_date: NaiveDate) -> Result<TaskOutcome>;
}

/// Outcome of one task invocation as folded into the execution record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub message: String,
    pub count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Collaborator-specific extras (table names, timestamps, skipped rows...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl TaskResult {
    pub fn success(message: impl Into<String>, count: i64) -> Self {
        Self {
            success: true,
            message: message.into(),
            count,
            error: None,
            details: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: "failed".to_string(),
            count: 0,
            error: Some(error.into()),
            details: None,
        }
    }

    /// Result for a dependent task that was skipped without being invoked
    pub fn dependency_unmet(unmet: &[String]) -> Self {
        Self {
            success: false,
            message: "skipped".to_string(),
            count: 0,
            error: Some(format!("{}: {}", DEPENDENCY_UNMET, unmet.join(", "))),
            details: None,
        }
    }

    /// Result reported when the guard stopped waiting for a task
    pub fn timed_out(deadline: Duration) -> Self {
        Self {
            success: false,
            message: "abandoned".to_string(),
            count: 0,
            error: Some(format!("{} after {:?}", TIMED_OUT, deadline)),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_dependency_unmet(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|e| e.starts_with(DEPENDENCY_UNMET))
    }

    pub fn is_timed_out(&self) -> bool {
        self.error.as_deref().is_some_and(|e| e.starts_with(TIMED_OUT))
    }
}

/// What a collaborator may hand back: a bare flag or a structured report
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Flag(bool),
    Report(TaskResult),
}

impl From<bool> for TaskOutcome {
    fn from(flag: bool) -> Self {
        TaskOutcome::Flag(flag)
    }
}

impl From<TaskResult> for TaskOutcome {
    fn from(result: TaskResult) -> Self {
        TaskOutcome::Report(result)
    }
}

impl From<TaskOutcome> for TaskResult {
    fn from(outcome: TaskOutcome) -> Self {
        match outcome {
            TaskOutcome::Flag(true) => TaskResult::success("completed", 0),
            TaskOutcome::Flag(false) => TaskResult::failure("task reported failure"),
            TaskOutcome::Report(result) => result,
        }
    }
}
