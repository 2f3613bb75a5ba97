/// SQLite persistence for execution records
///
/// Writes follow the status state machine with compare-and-set updates, so a record
/// cannot be moved backwards or rewritten after it reached a terminal state. Reads
/// back the history, the latest runs, and the per-task-type status summary.

use crate::history::{
    portable::to_portable_value,
    types::{
        ExecutionPage, ExecutionQuery, ExecutionRecord, ExecutionStatus, NewExecution,
        TaskTypeStatus, TriggeredBy,
    },
};
use crate::sync::executor::RunResults;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqlitePool, SqliteRow},
    QueryBuilder, Row, Sqlite,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("execution record not found: {0}")]
    NotFound(String),
    #[error("execution {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to encode execution result: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt execution record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

const COLUMNS: &str = "id, task_name, task_type, status, start_time, end_time, duration, \
                       triggered_by, target_date, result, error_message";

/// Execution record store backed by the shared SQLite pool
#[derive(Debug, Clone)]
pub struct ExecutionStore {
    pool: SqlitePool,
}

impl ExecutionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a PENDING record and return its id
    pub async fn create(&self, new: &NewExecution) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO sync_executions
                (id, task_name, task_type, status, start_time, triggered_by, target_date)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&new.task_name)
        .bind(&new.task_type)
        .bind(ExecutionStatus::Pending.as_str())
        .bind(timestamp(Utc::now()))
        .bind(new.triggered_by.as_str())
        .bind(new.target_date.format("%Y-%m-%d").to_string())
        .execute(&self.pool)
        .await?;

        tracing::debug!("📝 Created execution record {} ({})", id, new.task_type);
        Ok(id)
    }

    /// PENDING -> RUNNING
    pub async fn mark_running(&self, id: &str) -> Result<(), StoreError> {
        let updated = sqlx::query("UPDATE sync_executions SET status = ? WHERE id = ? AND status = ?")
            .bind(ExecutionStatus::Running.as_str())
            .bind(id)
            .bind(ExecutionStatus::Pending.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            let (current, _) = self.status_and_start(id).await?;
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: current,
                to: ExecutionStatus::Running,
            });
        }
        Ok(())
    }

    /// Close a run: SUCCESS when every task succeeded and no bookkeeping error was
    /// reported, FAILED otherwise.
    ///
    /// Finalizing a record that is already terminal is a no-op returning the stored
    /// status; the first finalize wins.
    pub async fn finalize(
        &self,
        id: &str,
        results: &RunResults,
        error_summary: Option<&str>,
    ) -> Result<ExecutionStatus, StoreError> {
        let (current, start_time) = self.status_and_start(id).await?;
        if current.is_terminal() {
            tracing::warn!("⚠️ Execution {} already finalized as {}; ignoring", id, current);
            return Ok(current);
        }

        let next = overall_status(results, error_summary);
        if !current.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: current,
                to: next,
            });
        }

        let end_time = Utc::now();
        let duration = (end_time - start_time).num_milliseconds().max(0) as f64 / 1000.0;
        let result_json = serde_json::to_string(&to_portable_value(results)?)?;
        let error_message = aggregate_errors(results, error_summary);

        let updated = sqlx::query(
            r#"
            UPDATE sync_executions
            SET status = ?, end_time = ?, duration = ?, result = ?, error_message = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(next.as_str())
        .bind(timestamp(end_time))
        .bind(duration)
        .bind(result_json)
        .bind(error_message)
        .bind(id)
        .bind(current.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            // Lost a race with another writer; report whatever it stored.
            let (stored, _) = self.status_and_start(id).await?;
            tracing::warn!("⚠️ Execution {} changed concurrently; now {}", id, stored);
            return Ok(stored);
        }

        tracing::info!("🏁 Execution {} finalized as {} in {:.3}s", id, next, duration);
        Ok(next)
    }

    pub async fn get(&self, id: &str) -> Result<Option<ExecutionRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM sync_executions WHERE id = ?", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// Paged history, newest first
    pub async fn list(&self, query: &ExecutionQuery) -> Result<ExecutionPage, StoreError> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM sync_executions WHERE 1 = 1");
        push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM sync_executions WHERE 1 = 1", COLUMNS));
        push_filters(&mut select, query);
        select
            .push(" ORDER BY start_time DESC LIMIT ")
            .push_bind(i64::from(query.limit()))
            .push(" OFFSET ")
            .push_bind(i64::from(query.offset()));

        let rows = select.build().fetch_all(&self.pool).await?;
        let items = rows.iter().map(record_from_row).collect::<Result<Vec<_>, _>>()?;

        Ok(ExecutionPage {
            items,
            total,
            page: query.page.max(1),
            page_size: query.limit(),
        })
    }

    /// The `limit` most recent records
    pub async fn latest(&self, limit: u32) -> Result<Vec<ExecutionRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sync_executions ORDER BY start_time DESC LIMIT ?",
            COLUMNS
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Latest run and latest successful run for each task type
    pub async fn status_summary(&self, task_types: &[String]) -> Result<Vec<TaskTypeStatus>, StoreError> {
        let mut summary = Vec::with_capacity(task_types.len());

        for task_type in task_types {
            let last_run = self.latest_for(task_type, None).await?;
            let last_success = self.latest_for(task_type, Some(ExecutionStatus::Success)).await?;
            summary.push(TaskTypeStatus {
                task_type: task_type.clone(),
                status: last_run.as_ref().map_or(ExecutionStatus::Pending, |r| r.status),
                last_run,
                last_success,
            });
        }

        Ok(summary)
    }

    async fn latest_for(
        &self,
        task_type: &str,
        status: Option<ExecutionStatus>,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM sync_executions WHERE task_type = ", COLUMNS));
        select.push_bind(task_type);
        if let Some(status) = status {
            select.push(" AND status = ").push_bind(status.as_str());
        }
        select.push(" ORDER BY start_time DESC LIMIT 1");

        let row = select.build().fetch_optional(&self.pool).await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn status_and_start(&self, id: &str) -> Result<(ExecutionStatus, DateTime<Utc>), StoreError> {
        let row = sqlx::query("SELECT status, start_time FROM sync_executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let status: String = row.try_get("status")?;
        let start_time: String = row.try_get("start_time")?;
        Ok((parse_field(id, &status)?, parse_timestamp(id, &start_time)?))
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &ExecutionQuery) {
    if let Some(task_type) = &query.task_type {
        builder.push(" AND task_type = ").push_bind(task_type.clone());
    }
    if let Some(status) = query.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(name) = &query.task_name {
        builder
            .push(" AND task_name LIKE ")
            .push_bind(contains_pattern(name))
            .push(" ESCAPE '\\'");
    }
}

/// LIKE pattern matching `needle` literally anywhere in the value
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn overall_status(results: &RunResults, error_summary: Option<&str>) -> ExecutionStatus {
    if error_summary.is_none() && results.values().all(|r| r.success) {
        ExecutionStatus::Success
    } else {
        ExecutionStatus::Failed
    }
}

/// Join every per-task error (and the bookkeeping summary) into one message
fn aggregate_errors(results: &RunResults, error_summary: Option<&str>) -> Option<String> {
    let mut errors: Vec<String> = results
        .iter()
        .filter(|(_, r)| !r.success)
        .map(|(key, r)| format!("{}: {}", key, r.error.as_deref().unwrap_or(&r.message)))
        .collect();
    if let Some(summary) = error_summary {
        errors.push(summary.to_string());
    }

    if errors.is_empty() {
        None
    } else {
        Some(errors.join("; "))
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(id: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(id, format!("bad timestamp '{}': {}", raw, e)))
}

fn parse_field<T>(id: &str, raw: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr<Err = String>,
{
    raw.parse::<T>().map_err(|e| corrupt(id, e))
}

fn corrupt(id: &str, reason: String) -> StoreError {
    StoreError::Corrupt {
        id: id.to_string(),
        reason,
    }
}

fn record_from_row(row: &SqliteRow) -> Result<ExecutionRecord, StoreError> {
    let id: String = row.try_get("id")?;

    let status: String = row.try_get("status")?;
    let triggered_by: String = row.try_get("triggered_by")?;
    let start_time: String = row.try_get("start_time")?;
    let end_time: Option<String> = row.try_get("end_time")?;
    let target_date: String = row.try_get("target_date")?;
    let result: Option<String> = row.try_get("result")?;

    let status: ExecutionStatus = parse_field(&id, &status)?;
    let triggered_by: TriggeredBy = parse_field(&id, &triggered_by)?;
    let start_time = parse_timestamp(&id, &start_time)?;
    let end_time = end_time.map(|t| parse_timestamp(&id, &t)).transpose()?;
    let target_date = NaiveDate::parse_from_str(&target_date, "%Y-%m-%d")
        .map_err(|e| corrupt(&id, format!("bad target date '{}': {}", target_date, e)))?;
    let result: Option<serde_json::Value> = result
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| corrupt(&id, format!("bad result json: {}", e)))?;

    Ok(ExecutionRecord {
        task_name: row.try_get("task_name")?,
        task_type: row.try_get("task_type")?,
        status,
        start_time,
        end_time,
        duration: row.try_get("duration")?,
        triggered_by,
        target_date,
        result,
        error_message: row.try_get("error_message")?,
        id,
    })
}
