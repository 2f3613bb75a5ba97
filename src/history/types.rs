/// Execution history type definitions
///
/// One `ExecutionRecord` per run. Status moves PENDING -> RUNNING -> SUCCESS | FAILED,
/// plus PENDING -> FAILED for runs whose bookkeeping broke before dispatch. Terminal
/// records never change again.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    #[serde(alias = "pending")]
    Pending,
    #[serde(alias = "running")]
    Running,
    #[serde(alias = "success")]
    Success,
    #[serde(alias = "failed")]
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Success | ExecutionStatus::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Failed) | (Running, Success) | (Running, Failed)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(ExecutionStatus::Pending),
            "RUNNING" => Ok(ExecutionStatus::Running),
            "SUCCESS" => Ok(ExecutionStatus::Success),
            "FAILED" => Ok(ExecutionStatus::Failed),
            other => Err(format!("unknown execution status: {}", other)),
        }
    }
}

/// Who started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    Manual,
    Scheduler,
}

impl TriggeredBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggeredBy::Manual => "manual",
            TriggeredBy::Scheduler => "scheduler",
        }
    }
}

impl FromStr for TriggeredBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TriggeredBy::Manual),
            "scheduler" => Ok(TriggeredBy::Scheduler),
            other => Err(format!("unknown trigger source: {}", other)),
        }
    }
}

/// A persisted run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub task_name: String,
    /// Requested keys joined with "," or "all"
    pub task_type: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds between start and end
    pub duration: Option<f64>,
    pub triggered_by: TriggeredBy,
    pub target_date: NaiveDate,
    /// Per-task outcomes keyed by task key
    pub result: Option<Value>,
    pub error_message: Option<String>,
}

/// Metadata supplied by a trigger when a run is created
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub task_name: String,
    pub task_type: String,
    pub triggered_by: TriggeredBy,
    pub target_date: NaiveDate,
}

/// Filters and paging for history listing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionQuery {
    pub task_type: Option<String>,
    pub status: Option<ExecutionStatus>,
    /// Substring match on the display name
    pub task_name: Option<String>,
    /// 1-based page number
    pub page: u32,
    pub page_size: u32,
}

impl Default for ExecutionQuery {
    fn default() -> Self {
        Self {
            task_type: None,
            status: None,
            task_name: None,
            page: 1,
            page_size: 20,
        }
    }
}

pub const MAX_PAGE_SIZE: u32 = 100;

impl ExecutionQuery {
    pub fn limit(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u32 {
        self.page.max(1).saturating_sub(1).saturating_mul(self.limit())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPage {
    pub items: Vec<ExecutionRecord>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

/// Latest activity for one task type
#[derive(Debug, Clone, Serialize)]
pub struct TaskTypeStatus {
    pub task_type: String,
    /// Status of the latest run, PENDING when the task type never ran
    pub status: ExecutionStatus,
    pub last_run: Option<ExecutionRecord>,
    pub last_success: Option<ExecutionRecord>,
}
