/// Configuration management for the datasync service
///
/// Handles server configuration, the execution history database, and the sync
/// orchestrator parameters (worker cap, task timeout, timezone, triggers, tasks).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Sync orchestrator configuration
    pub sync: SyncConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// SQLite database holding the execution history and the synced tables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file path (default: "data/datasync.db")
    pub path: String,
    /// Upper bound on pooled connections shared by the store and running tasks
    pub max_connections: u32,
}

/// Orchestrator parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Cap on the width of the independent-stage worker pool
    pub max_workers: usize,
    /// Hard wall-clock deadline for a single task invocation, in seconds
    pub task_timeout_secs: u64,
    /// IANA timezone the periodic triggers and the default target date use
    pub timezone: String,
    /// Periodic triggers
    pub triggers: Vec<TriggerConfig>,
    /// HTTP-backed fetch-and-store tasks, in registration order
    pub tasks: Vec<TaskConfig>,
}

/// A periodic trigger bound to a fixed task-key subset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Display name, also used as the execution record's task name
    pub name: String,
    /// Six-field cron expression (seconds first), e.g. "0 30 17 * * *"
    pub schedule: String,
    /// Task keys to run; empty means every registered task
    #[serde(default)]
    pub task_keys: Vec<String>,
}

/// Declaration of one fetch-and-store task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Unique task key
    pub key: String,
    /// Provider endpoint; the target date is appended as `?date=YYYY-MM-DD`
    pub url: String,
    /// Destination table (alphanumeric and underscores only)
    pub table: String,
    /// Field of each provider item that identifies the record
    #[serde(default = "default_record_key_field")]
    pub record_key_field: String,
    /// Keys of tasks that must succeed before this one runs
    #[serde(default)]
    pub depends_on: Vec<String>,
}

fn default_record_key_field() -> String {
    "code".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("DATASYNC_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("DATASYNC_PORT")
                .unwrap_or_else(|_| "3004".to_string())
                .parse()
                .unwrap_or(3004),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: std::env::var("DATASYNC_DB_PATH")
                .unwrap_or_else(|_| "data/datasync.db".to_string()),
            max_connections: 16,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_workers: std::env::var("DATASYNC_MAX_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            task_timeout_secs: std::env::var("DATASYNC_TASK_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),
            timezone: std::env::var("DATASYNC_TIMEZONE")
                .unwrap_or_else(|_| "Asia/Shanghai".to_string()),
            triggers: vec![TriggerConfig {
                name: "Daily full sync".to_string(),
                schedule: "0 30 17 * * *".to_string(),
                task_keys: Vec::new(),
            }],
            tasks: Vec::new(),
        }
    }
}

impl SyncConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    /// Parse the configured timezone name
    pub fn timezone(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid timezone '{}': {}", self.timezone, e))
    }
}

impl Config {
    /// Load configuration from the JSON file named by `DATASYNC_CONFIG`,
    /// falling back to env-var backed defaults when it is unset
    pub fn load() -> Result<Self> {
        match std::env::var("DATASYNC_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path, e))?;
                Self::from_json(&raw)
            }
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
        config.sync.timezone()?;
        if config.sync.max_workers == 0 {
            return Err(anyhow::anyhow!("sync.max_workers must be at least 1"));
        }
        Ok(config)
    }
}
