/// Sync orchestrator
///
/// Turns a trigger into a run: creates the execution record, marks it running,
/// partitions the requested tasks, drives the independent stage and then the dependent
/// stage, and finalizes the record with the aggregated outcomes. Task-level failures are
/// always folded into results; only execution-record bookkeeping can fail a trigger.

use crate::history::{ExecutionStatus, ExecutionStore, NewExecution, StoreError, TriggeredBy};
use crate::sync::{
    dependent::run_dependent_stage,
    executor::{RunResults, TaskExecutor},
    registry::{RegistryError, TaskRegistry},
};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tokio::time::Instant;

/// `task_type` recorded when the full registry was requested
pub const ALL_TASKS: &str = "all";

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    /// The request itself is unusable (unknown task key, ...)
    #[error(transparent)]
    Invalid(#[from] RegistryError),
    /// The execution record could not be created
    #[error(transparent)]
    Bookkeeping(#[from] StoreError),
}

/// What a trigger asks for
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Task keys to run; `None` or empty selects every registered task
    pub task_keys: Option<Vec<String>>,
    /// Defaults to today in the configured timezone
    pub target_date: Option<NaiveDate>,
    pub triggered_by: TriggeredBy,
    /// Display name; derived from the task keys when absent
    pub task_name: Option<String>,
}

impl RunRequest {
    pub fn manual(task_keys: Option<Vec<String>>, target_date: Option<NaiveDate>) -> Self {
        Self {
            task_keys,
            target_date,
            triggered_by: TriggeredBy::Manual,
            task_name: None,
        }
    }

    pub fn scheduled(name: impl Into<String>, task_keys: Vec<String>) -> Self {
        Self {
            task_keys: Some(task_keys),
            target_date: None,
            triggered_by: TriggeredBy::Scheduler,
            task_name: Some(name.into()),
        }
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub results: RunResults,
}

/// A run whose record exists and whose inputs are fixed
#[derive(Debug, Clone)]
struct PreparedRun {
    id: String,
    keys: Vec<String>,
    target_date: NaiveDate,
}

#[derive(Debug)]
pub struct SyncOrchestrator {
    registry: Arc<TaskRegistry>,
    executor: TaskExecutor,
    store: ExecutionStore,
    timezone: Tz,
}

impl SyncOrchestrator {
    pub fn new(registry: Arc<TaskRegistry>, executor: TaskExecutor, store: ExecutionStore, timezone: Tz) -> Self {
        Self {
            registry,
            executor,
            store,
            timezone,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ExecutionStore {
        &self.store
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Today's date in the configured timezone
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    /// `task_type` label for a requested key set
    pub fn task_type_for(&self, task_keys: Option<&[String]>) -> Result<String, RegistryError> {
        match task_keys {
            Some(keys) if !keys.is_empty() => Ok(self.registry.resolve(Some(keys))?.join(",")),
            _ => Ok(ALL_TASKS.to_string()),
        }
    }

    /// Run to completion and report the outcome
    pub async fn run(&self, request: RunRequest) -> Result<RunReport, TriggerError> {
        let prepared = self.prepare(request).await?;
        Ok(self.execute(prepared).await)
    }

    /// Create the record now, run in the background, return the execution id
    pub async fn trigger(self: Arc<Self>, request: RunRequest) -> Result<String, TriggerError> {
        let prepared = self.prepare(request).await?;
        let id = prepared.id.clone();

        tokio::spawn(async move {
            let report = self.execute(prepared).await;
            tracing::info!("📣 Background sync {} ended as {}", report.execution_id, report.status);
        });

        Ok(id)
    }

    /// Validate the request and create its PENDING record
    async fn prepare(&self, request: RunRequest) -> Result<PreparedRun, TriggerError> {
        let requested = request.task_keys.as_deref();
        let keys = self.registry.resolve(requested)?;
        let task_type = self.task_type_for(requested)?;
        let task_name = request.task_name.unwrap_or_else(|| match task_type.as_str() {
            ALL_TASKS => "Daily data sync".to_string(),
            selected => format!("Data sync: {}", selected),
        });
        let target_date = request.target_date.unwrap_or_else(|| self.today());

        let id = self
            .store
            .create(&NewExecution {
                task_name,
                task_type,
                triggered_by: request.triggered_by,
                target_date,
            })
            .await?;

        tracing::info!(
            "🆕 Sync execution {} created: {} tasks for {} ({})",
            id,
            keys.len(),
            target_date,
            request.triggered_by.as_str()
        );

        Ok(PreparedRun { id, keys, target_date })
    }

    /// Drive a prepared run; never fails, bookkeeping errors end as a FAILED record
    /// (or, when even that write fails, only in the log)
    async fn execute(&self, run: PreparedRun) -> RunReport {
        let started = Instant::now();

        let (results, error) = match self.store.mark_running(&run.id).await {
            Ok(()) => {
                let results = self.dispatch(&run).await;
                match self.store.finalize(&run.id, &results, None).await {
                    Ok(status) => {
                        tracing::info!(
                            "🏁 Sync execution {} finished: {} ({} tasks in {:?})",
                            run.id,
                            status,
                            results.len(),
                            started.elapsed()
                        );
                        return RunReport {
                            execution_id: run.id,
                            status,
                            results,
                        };
                    }
                    Err(e) => (results, e),
                }
            }
            Err(e) => (RunResults::new(), e),
        };

        tracing::error!("❌ Bookkeeping failed for sync execution {}: {}", run.id, error);
        let summary = format!("execution bookkeeping failed: {}", error);

        // Results are not re-sent: whatever broke the first write may break this one too.
        let status = match self.store.finalize(&run.id, &RunResults::new(), Some(&summary)).await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!("❌ Could not record failure of sync execution {}: {}", run.id, e);
                ExecutionStatus::Failed
            }
        };

        RunReport {
            execution_id: run.id,
            status,
            results,
        }
    }

    async fn dispatch(&self, run: &PreparedRun) -> RunResults {
        let partition = self.registry.partition(&run.keys);
        tracing::info!(
            "🧭 Sync execution {}: {} independent, {} dependent tasks for {}",
            run.id,
            partition.independent.len(),
            partition.dependent.len(),
            run.target_date
        );

        let mut results = RunResults::new();
        self.executor
            .run_independent(&self.registry, &partition.independent, run.target_date, &mut results)
            .await;
        run_dependent_stage(
            &self.executor,
            &self.registry,
            &partition.dependent,
            &run.keys,
            run.target_date,
            &mut results,
        )
        .await;

        results
    }
}
