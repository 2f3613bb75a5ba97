/// Periodic sync triggers
///
/// Registers one tokio-cron-scheduler job per configured trigger, evaluated in the
/// orchestrator's timezone. Each firing runs the trigger's task subset to completion;
/// failures are only logged since nobody is waiting on a scheduled run.

use crate::config::TriggerConfig;
use crate::sync::orchestrator::{RunRequest, SyncOrchestrator, ALL_TASKS};
use anyhow::Result;
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// A configured trigger as reported by `list_triggers`
#[derive(Debug, Clone, Serialize)]
pub struct TriggerInfo {
    pub name: String,
    pub schedule: String,
    pub timezone: String,
    pub task_keys: Vec<String>,
    /// `task_type` the trigger's runs are recorded under
    pub task_type: String,
    /// Scheduler job id while the trigger is registered
    pub job_id: Option<Uuid>,
}

/// Scheduler owning the periodic triggers; started and stopped by the composition root
pub struct SyncScheduler {
    scheduler: RwLock<JobScheduler>,
    job_uuid_map: RwLock<HashMap<String, Uuid>>, // trigger name -> job UUID
    triggers: Vec<TriggerConfig>,
    orchestrator: Arc<SyncOrchestrator>,
}

impl SyncScheduler {
    /// Create the scheduler, validating every trigger's task keys up front
    pub async fn new(orchestrator: Arc<SyncOrchestrator>, triggers: Vec<TriggerConfig>) -> Result<Self> {
        for trigger in &triggers {
            orchestrator
                .registry()
                .resolve(Some(&trigger.task_keys))
                .map_err(|e| anyhow::anyhow!("Trigger '{}' is invalid: {}", trigger.name, e))?;
        }

        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: RwLock::new(scheduler),
            job_uuid_map: RwLock::new(HashMap::new()),
            triggers,
            orchestrator,
        })
    }

    /// Register all triggers and start ticking
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting sync scheduler with {} triggers ({})", self.triggers.len(), self.orchestrator.timezone());

        for trigger in &self.triggers {
            self.register_trigger(trigger).await?;
        }

        {
            let scheduler = self.scheduler.read().await;
            scheduler.start().await?;
        }

        tracing::info!("✅ Sync scheduler started");
        Ok(())
    }

    /// Remove every job and shut the scheduler down
    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping sync scheduler");

        {
            let mut job_uuid_map = self.job_uuid_map.write().await;
            let scheduler = self.scheduler.read().await;
            for (name, job_uuid) in job_uuid_map.drain() {
                if let Err(e) = scheduler.remove(&job_uuid).await {
                    tracing::warn!("⚠️ Failed to remove trigger {} from scheduler: {}", name, e);
                }
            }
        }

        {
            let mut scheduler = self.scheduler.write().await;
            scheduler.shutdown().await?;
        }

        tracing::info!("✅ Sync scheduler stopped");
        Ok(())
    }

    /// Configured triggers with their registration state
    pub async fn list_triggers(&self) -> Vec<TriggerInfo> {
        let job_uuid_map = self.job_uuid_map.read().await;
        let timezone = self.orchestrator.timezone().name().to_string();

        self.triggers
            .iter()
            .map(|trigger| TriggerInfo {
                name: trigger.name.clone(),
                schedule: trigger.schedule.clone(),
                timezone: timezone.clone(),
                task_keys: trigger.task_keys.clone(),
                task_type: self.task_type(trigger),
                job_id: job_uuid_map.get(&trigger.name).copied(),
            })
            .collect()
    }

    /// Every task type the status summary should report on: the full run, each
    /// trigger's subset, and each single task
    pub fn task_types(&self) -> Vec<String> {
        let mut task_types = vec![ALL_TASKS.to_string()];
        let candidates = self
            .triggers
            .iter()
            .map(|t| self.task_type(t))
            .chain(self.orchestrator.registry().keys());

        for task_type in candidates {
            if !task_types.contains(&task_type) {
                task_types.push(task_type);
            }
        }
        task_types
    }

    fn task_type(&self, trigger: &TriggerConfig) -> String {
        self.orchestrator
            .task_type_for(Some(&trigger.task_keys))
            .unwrap_or_else(|_| trigger.task_keys.join(","))
    }

    async fn register_trigger(&self, trigger: &TriggerConfig) -> Result<()> {
        let name = trigger.name.clone();
        let task_keys = trigger.task_keys.clone();
        let orchestrator = Arc::clone(&self.orchestrator);

        let job = Job::new_async_tz(trigger.schedule.as_str(), self.orchestrator.timezone(), move |_uuid, _l| {
            let name = name.clone();
            let task_keys = task_keys.clone();
            let orchestrator = Arc::clone(&orchestrator);

            Box::pin(async move {
                tracing::info!("🔔 Sync trigger fired: {}", name);

                match orchestrator.run(RunRequest::scheduled(name.clone(), task_keys)).await {
                    Ok(report) => {
                        tracing::info!("✅ Scheduled sync '{}' finished: {} ({})", name, report.status, report.execution_id);
                    }
                    Err(e) => {
                        tracing::error!("❌ Scheduled sync '{}' could not start: {}", name, e);
                    }
                }
            })
        })?;

        let job_uuid = {
            let scheduler = self.scheduler.write().await;
            scheduler.add(job).await?
        };

        self.job_uuid_map.write().await.insert(trigger.name.clone(), job_uuid);
        tracing::info!("⏰ Registered sync trigger: {} ({})", trigger.name, trigger.schedule);
        Ok(())
    }
}
