#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use datasync::{
    config::DatabaseConfig,
    history::ExecutionStore,
    storage::Database,
    sync::{DataHandle, ExecutorSettings, SyncOrchestrator, SyncTask, TaskExecutor, TaskOutcome, TaskRegistry, TaskResult},
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

pub async fn temp_database() -> (tempfile::TempDir, Database) {
    temp_database_with(16).await
}

pub async fn temp_database_with(max_connections: u32) -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        path: dir.path().join("sync.db").to_string_lossy().into_owned(),
        max_connections,
    };
    let database = Database::connect(&config).await.unwrap();
    (dir, database)
}

pub fn target_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
}

#[derive(Debug, Clone)]
pub enum Behaviour {
    Succeed,
    /// Structured failure report
    Fail,
    /// Returns Err from `run`
    Error,
    Panic,
    /// Sleeps, then succeeds
    Sleep(Duration),
    Flag(bool),
    /// Puts every execution record back to PENDING through the handle, then succeeds
    RewindRecords,
}

/// Scriptable task that counts its invocations and tracks peak concurrency
pub struct StubTask {
    behaviour: Behaviour,
    pub calls: AtomicUsize,
    gauge: Option<Arc<ConcurrencyGauge>>,
}

impl StubTask {
    pub fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicUsize::new(0),
            gauge: None,
        })
    }

    pub fn gauged(behaviour: Behaviour, gauge: Arc<ConcurrencyGauge>) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicUsize::new(0),
            gauge: Some(gauge),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncTask for StubTask {
    async fn run(&self, handle: &mut DataHandle, target_date: NaiveDate) -> Result<TaskOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.gauge.as_ref().map(|p| p.enter());

        match &self.behaviour {
            Behaviour::Succeed => Ok(TaskResult::success(format!("synced {}", target_date), 3).into()),
            Behaviour::Fail => Ok(TaskResult::failure("provider returned HTTP 502").into()),
            Behaviour::Error => Err(anyhow::anyhow!("connection reset")),
            Behaviour::Panic => panic!("stub exploded"),
            Behaviour::Sleep(d) => {
                tokio::time::sleep(*d).await;
                Ok(true.into())
            }
            Behaviour::Flag(flag) => Ok((*flag).into()),
            Behaviour::RewindRecords => {
                sqlx::query("UPDATE sync_executions SET status = 'PENDING'")
                    .execute(&mut **handle)
                    .await?;
                Ok(true.into())
            }
        }
    }
}

/// Records the highest number of tasks inside `run` at once
#[derive(Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    pub peak: AtomicUsize,
}

pub struct GaugeGuard<'a>(&'a ConcurrencyGauge);

impl ConcurrencyGauge {
    pub fn enter(&self) -> GaugeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(self)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn orchestrator(database: &Database, registry: TaskRegistry, settings: ExecutorSettings) -> Arc<SyncOrchestrator> {
    let executor = TaskExecutor::new(database.pool().clone(), settings);
    let store = ExecutionStore::new(database.pool().clone());
    Arc::new(SyncOrchestrator::new(Arc::new(registry), executor, store, chrono_tz::Asia::Shanghai))
}

pub fn keys(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}
