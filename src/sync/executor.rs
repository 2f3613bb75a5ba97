/// Concurrent executor for the independent stage
///
/// Fans the independent tasks out over a bounded set of tokio workers. Every task
/// checks out its own pooled connection inside its own unit of work, runs under the
/// timeout guard, and reports back to a single driver loop that owns the results map.

use crate::sync::{
    registry::{TaskDefinition, TaskRegistry},
    task::{SyncTask, TaskResult},
    timeout,
};
use chrono::NaiveDate;
use sqlx::sqlite::SqlitePool;
use std::{collections::BTreeMap, future::Future, sync::Arc, time::Duration};
use tokio::{sync::Semaphore, task::JoinSet, time::Instant};

/// Per-task outcomes of one run, keyed by task key
pub type RunResults = BTreeMap<String, TaskResult>;

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Cap on concurrently running independent tasks
    pub max_workers: usize,
    /// Deadline applied to every task invocation
    pub task_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_workers: 5,
            task_timeout: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskExecutor {
    pool: SqlitePool,
    settings: ExecutorSettings,
}

impl TaskExecutor {
    pub fn new(pool: SqlitePool, settings: ExecutorSettings) -> Self {
        Self { pool, settings }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Worker pool width for a stage of `task_count` tasks
    pub fn pool_width(&self, task_count: usize) -> usize {
        task_count.min(self.settings.max_workers.max(1))
    }

    /// Run the independent group with bounded fan-out.
    ///
    /// Results land in `results` in completion order. A failing, panicking or
    /// timed-out task only affects its own entry.
    pub async fn run_independent(
        &self,
        registry: &TaskRegistry,
        keys: &[String],
        target_date: NaiveDate,
        results: &mut RunResults,
    ) {
        if keys.is_empty() {
            return;
        }

        let width = self.pool_width(keys.len());
        tracing::info!("🚀 Running {} independent tasks with {} workers", keys.len(), width);

        let permits = Arc::new(Semaphore::new(width));
        let mut in_flight = JoinSet::new();

        for key in keys {
            let Some(definition) = registry.get(key) else {
                tracing::error!("❌ Requested task is not registered: {}", key);
                results.insert(key.clone(), TaskResult::failure(format!("task '{}' is not registered", key)));
                continue;
            };

            let permits = Arc::clone(&permits);
            let invocation = self.invocation(definition, target_date);
            let deadline = self.settings.task_timeout;
            let key = key.clone();

            // The permit is released when the guard stops waiting, not when the body
            // returns: an abandoned body keeps running beside the next task, so after a
            // timeout more than `max_workers` bodies may be live. Holding the permit
            // instead would let one hung task stall the whole stage.
            in_flight.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (key, TaskResult::failure("worker pool closed")),
                };
                let result = timeout::guard(&key, deadline, invocation).await;
                (key, result)
            });
        }

        // Single consumer: only this loop writes to `results`.
        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok((key, result)) => {
                    log_outcome(&key, &result);
                    results.insert(key, result);
                }
                Err(e) => tracing::error!("❌ Independent worker failed to report: {}", e),
            }
        }

        for key in keys {
            results
                .entry(key.clone())
                .or_insert_with(|| TaskResult::failure("task did not report a result"));
        }
    }

    /// Invoke one task with connection isolation and the timeout guard
    pub async fn invoke(&self, definition: &TaskDefinition, target_date: NaiveDate) -> TaskResult {
        let result = timeout::guard(
            &definition.key,
            self.settings.task_timeout,
            self.invocation(definition, target_date),
        )
        .await;
        log_outcome(&definition.key, &result);
        result
    }

    /// Build the self-contained unit of work for one task.
    ///
    /// The connection is checked out inside the future and dropped with it, so it is
    /// released on success, on error, on panic, and after an abandoned timeout once
    /// the body finally returns.
    fn invocation(
        &self,
        definition: &TaskDefinition,
        target_date: NaiveDate,
    ) -> impl Future<Output = TaskResult> + Send + 'static {
        let pool = self.pool.clone();
        let task: Arc<dyn SyncTask> = Arc::clone(&definition.task);
        let key = definition.key.clone();

        async move {
            let started = Instant::now();
            tracing::debug!("▶️ Starting sync task: {} for {}", key, target_date);

            let mut handle = match pool.acquire().await {
                Ok(handle) => handle,
                Err(e) => {
                    return TaskResult::failure(format!("failed to acquire database connection: {}", e))
                }
            };

            let outcome = task.run(&mut handle, target_date).await;
            drop(handle);

            tracing::debug!("⏱️ Sync task {} returned after {:?}", key, started.elapsed());
            match outcome {
                Ok(outcome) => outcome.into(),
                Err(e) => TaskResult::failure(format!("{:#}", e)),
            }
        }
    }
}

fn log_outcome(key: &str, result: &TaskResult) {
    if result.success {
        tracing::info!("✅ Sync task completed: {} ({}, count: {})", key, result.message, result.count);
    } else {
        tracing::error!(
            "❌ Sync task failed: {} - {}",
            key,
            result.error.as_deref().unwrap_or(&result.message)
        );
    }
}
