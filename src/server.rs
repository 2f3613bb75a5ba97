/// Server setup and initialization
///
/// Wires together all components: storage, task registry, executor, history store,
/// orchestrator, scheduler, and HTTP routes.

use crate::{
    api::{create_execution_routes, AppState},
    collectors,
    config::Config,
    history::ExecutionStore,
    storage::Database,
    sync::{ExecutorSettings, SyncOrchestrator, SyncScheduler, TaskExecutor},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// The assembled service: HTTP router plus the running scheduler
pub struct Application {
    pub router: Router,
    pub scheduler: Arc<SyncScheduler>,
}

/// Create the main Axum application with all routes
///
/// Connects the database, registers the configured tasks, builds the orchestrator,
/// and starts the periodic triggers before returning the router.
pub async fn create_app(config: Config) -> Result<Application> {
    let database = Database::connect(&config.database)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open sync database: {}", e))?;

    tracing::info!("📊 Building task registry");
    let registry = Arc::new(collectors::build_registry(&config.sync.tasks)?);

    tracing::info!(
        "⚙️ Initializing task executor (max_workers={}, task_timeout={}s)",
        config.sync.max_workers,
        config.sync.task_timeout_secs
    );
    let executor = TaskExecutor::new(
        database.pool().clone(),
        ExecutorSettings {
            max_workers: config.sync.max_workers,
            task_timeout: config.sync.task_timeout(),
        },
    );

    let store = ExecutionStore::new(database.pool().clone());
    let orchestrator = Arc::new(SyncOrchestrator::new(
        registry,
        executor,
        store.clone(),
        config.sync.timezone()?,
    ));

    tracing::info!("⏰ Initializing sync scheduler");
    let scheduler = Arc::new(
        SyncScheduler::new(Arc::clone(&orchestrator), config.sync.triggers.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize sync scheduler: {}", e))?,
    );
    scheduler
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start sync scheduler: {}", e))?;

    let app_state = AppState {
        orchestrator,
        store,
        scheduler: Arc::clone(&scheduler),
    };

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let router = Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        // Sync execution API routes
        .merge(create_execution_routes().with_state(app_state));

    tracing::info!("✅ Application initialized successfully");

    Ok(Application { router, scheduler })
}

/// Start the HTTP server with the given configuration
///
/// Serves until ctrl-c, then stops the periodic triggers. Runs already in flight
/// are not awaited.
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting datasync server...");

    let Application { router, scheduler } = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("🛑 Shutdown signal received");
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
