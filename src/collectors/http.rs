/// HTTP fetch-and-store collaborator
///
/// Pulls one day of records from a provider endpoint and upserts them into a per-task
/// SQLite table through the connection the orchestrator hands over. Re-running the same
/// date overwrites rather than duplicates, keyed by (record_key, trade_date).

use crate::config::TaskConfig;
use crate::sync::task::{DataHandle, SyncTask, TaskOutcome, TaskResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};
use sqlx::Connection;

#[derive(Debug, Clone)]
pub struct HttpSyncTask {
    url: String,
    table: String,
    record_key_field: String,
    client: reqwest::Client,
}

impl HttpSyncTask {
    pub fn new(config: &TaskConfig, client: reqwest::Client) -> Result<Self> {
        validate_identifier(&config.table)?;
        Ok(Self {
            url: config.url.clone(),
            table: config.table.clone(),
            record_key_field: config.record_key_field.clone(),
            client,
        })
    }

    async fn fetch(&self, target_date: NaiveDate) -> Result<std::result::Result<Vec<Value>, String>> {
        let date = target_date.format("%Y-%m-%d").to_string();
        tracing::debug!("🌍 Fetching {} for {}", self.url, date);

        let response = self
            .client
            .get(&self.url)
            .query(&[("date", date.as_str())])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("HTTP request to {} failed: {}", self.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Ok(Err(format!("provider returned HTTP {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to decode provider response: {}", e))?;
        Ok(Ok(extract_items(body)?))
    }
}

#[async_trait]
impl SyncTask for HttpSyncTask {
    async fn run(&self, handle: &mut DataHandle, target_date: NaiveDate) -> Result<TaskOutcome> {
        let items = match self.fetch(target_date).await? {
            Ok(items) => items,
            Err(reason) => return Ok(TaskResult::failure(reason).into()),
        };

        let (stored, skipped) = store_items(handle, &self.table, &self.record_key_field, target_date, &items).await?;

        tracing::info!("💾 Stored {} rows into {} for {} ({} skipped)", stored, self.table, target_date, skipped);

        Ok(TaskResult::success(format!("stored {} rows for {}", stored, target_date), stored)
            .with_details(json!({
                "table": self.table,
                "fetched": items.len(),
                "skipped": skipped,
                "synced_at": Utc::now(),
            }))
            .into())
    }
}

/// Accept a bare array or an envelope carrying the array under `data`
fn extract_items(body: Value) -> Result<Vec<Value>> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut envelope) => match envelope.remove("data") {
            Some(Value::Array(items)) => Ok(items),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(other) => Err(anyhow::anyhow!("Provider 'data' field is not an array: {}", other)),
        },
        other => Err(anyhow::anyhow!("Unexpected provider payload: {}", other)),
    }
}

fn record_key(item: &Value, field: &str) -> Option<String> {
    match item.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(anyhow::anyhow!("Invalid table name: {}", name));
    }
    Ok(())
}

/// Upsert `items` into `table` inside one transaction; returns (stored, skipped)
pub(crate) async fn store_items(
    handle: &mut DataHandle,
    table: &str,
    record_key_field: &str,
    target_date: NaiveDate,
    items: &[Value],
) -> Result<(i64, usize)> {
    validate_identifier(table)?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            record_key TEXT NOT NULL,
            trade_date TEXT NOT NULL,
            payload JSON NOT NULL,
            synced_at TEXT NOT NULL,
            PRIMARY KEY (record_key, trade_date)
        )",
        table
    ))
    .execute(&mut **handle)
    .await?;

    let upsert = format!(
        "INSERT INTO {} (record_key, trade_date, payload, synced_at) VALUES (?, ?, ?, ?)
         ON CONFLICT(record_key, trade_date) DO UPDATE SET
             payload = excluded.payload,
             synced_at = excluded.synced_at",
        table
    );
    let trade_date = target_date.format("%Y-%m-%d").to_string();
    let synced_at = Utc::now().to_rfc3339();

    let mut tx = handle.begin().await?;
    let mut stored = 0i64;
    let mut skipped = 0usize;

    for item in items {
        let Some(key) = record_key(item, record_key_field) else {
            skipped += 1;
            continue;
        };
        sqlx::query(&upsert)
            .bind(key)
            .bind(&trade_date)
            .bind(item.to_string())
            .bind(&synced_at)
            .execute(&mut *tx)
            .await?;
        stored += 1;
    }

    tx.commit().await?;

    if skipped > 0 {
        tracing::warn!("⚠️ {} items without '{}' skipped for {}", skipped, record_key_field, table);
    }
    Ok((stored, skipped))
}
