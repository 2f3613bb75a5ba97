/// Sync collaborators
///
/// Concrete `SyncTask` implementations and the startup routine that registers the
/// configured ones, in declaration order, into the task registry.

pub mod http;

pub use http::HttpSyncTask;

use crate::config::TaskConfig;
use crate::sync::registry::TaskRegistry;
use anyhow::Result;
use std::{sync::Arc, time::Duration};

/// Build the registry from configured HTTP tasks
pub fn build_registry(tasks: &[TaskConfig]) -> Result<TaskRegistry> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

    let mut registry = TaskRegistry::new();
    for task in tasks {
        let collaborator = HttpSyncTask::new(task, client.clone())
            .map_err(|e| anyhow::anyhow!("Task '{}' is misconfigured: {}", task.key, e))?;
        registry.register(task.key.clone(), Arc::new(collaborator), task.depends_on.clone())?;
    }

    tracing::info!("📊 Registered {} sync tasks", registry.len());
    Ok(registry)
}
