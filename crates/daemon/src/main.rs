//! Courier daemon - main entry point
//!
//! Wires the SQLite job store, HTTP collaborators, worker pool, delivery,
//! crash recovery, maintenance and the JSON-RPC server into one process.

mod config;
mod telemetry;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use courier_api_rpc::{RpcHandler, RpcServer};
use courier_core::application::{
    shutdown_channel, DeliveryService, MaintenanceScheduler, RecoveryService, RetryPolicy,
    TaskDispatcher, Worker, WorkerPool,
};
use courier_core::port::id_provider::UuidProvider;
use courier_core::port::time_provider::SystemTimeProvider;
use courier_core::port::{JobRepository, LanguageModel, RetrievalTool, TimeProvider};
use courier_infra_http::{HttpLanguageModel, HttpRetrievalTool, ReqwestWebhookSender};
use courier_infra_sqlite::{create_pool, run_migrations, SqliteJobRepository, SqliteMaintenance};

const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Bound on waiting for workers to finish their current job at shutdown
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(30);

/// `--config <path>`, else `COURIER_CONFIG`
fn config_path() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    std::env::var("COURIER_CONFIG").ok().map(PathBuf::from)
}

/// Create the parent directory of a file-backed SQLite url
fn ensure_db_dir(url: &str) -> Result<()> {
    if url.contains(":memory:") {
        return Ok(());
    }
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or(path);
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Logging
    let _telemetry = telemetry::init()?;
    info!("Courier daemon v{} starting...", VERSION);

    // 2. Configuration
    let path = config_path()
        .map(|p| PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).into_owned()));
    let cfg = config::load_config(path).context("Failed to load configuration")?;
    cfg.validate().context("Invalid configuration")?;
    let engine_config = cfg.engine_config();

    // 3. Database
    let db_url = cfg.database_url();
    ensure_db_dir(&db_url)?;
    info!(database = %db_url, "Initializing database...");
    let pool = create_pool(&db_url)
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 4. Dependencies (DI wiring)
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let job_repo: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::new(
        pool.clone(),
        time_provider.clone(),
    ));
    let maintenance = Arc::new(SqliteMaintenance::new(pool.clone(), time_provider.clone()));

    let model: Arc<dyn LanguageModel> = Arc::new(
        HttpLanguageModel::new(&cfg.model.endpoint, engine_config.model_timeout)
            .map_err(|e| anyhow::anyhow!("Model client: {}", e))?,
    );
    let retrieval: Arc<dyn RetrievalTool> = Arc::new(
        HttpRetrievalTool::new(&cfg.retrieval.endpoint, engine_config.retrieval_timeout)
            .map_err(|e| anyhow::anyhow!("Retrieval client: {}", e))?,
    );
    let delivery_policy = cfg.delivery_policy();
    let sender = Arc::new(
        ReqwestWebhookSender::new(delivery_policy.request_timeout)
            .map_err(|e| anyhow::anyhow!("Webhook client: {}", e))?,
    );

    let (shutdown_tx, shutdown) = shutdown_channel();
    let delivery = Arc::new(
        DeliveryService::new(
            job_repo.clone(),
            sender,
            time_provider.clone(),
            delivery_policy,
        )
        .with_shutdown(shutdown.clone()),
    );
    let retry_policy = Arc::new(RetryPolicy::new(
        time_provider.clone(),
        engine_config.retry_base_delay_ms,
    ));

    // 5. Crash recovery before any worker leases
    let recovery = RecoveryService::new(
        format!("recovery-{}", std::process::id()),
        job_repo.clone(),
        delivery.clone(),
        retry_policy.clone(),
    )
    .with_lease_ms(engine_config.lease_ms)
    .with_interval(std::time::Duration::from_secs(
        cfg.recovery.interval_secs.max(1),
    ));
    info!("Running crash recovery...");
    match recovery.recover().await {
        Ok(report) => info!(
            requeued = report.requeued,
            failed = report.failed,
            redelivered = report.redelivered,
            "Crash recovery completed"
        ),
        Err(e) => error!(error = %e, "Crash recovery failed"),
    }

    // 6. JSON-RPC server
    let dispatcher = Arc::new(TaskDispatcher::new(
        job_repo.clone(),
        Arc::new(UuidProvider),
        time_provider.clone(),
        engine_config.max_attempts,
    ));
    let rpc_config = cfg.rpc_config();
    let handler = Arc::new(RpcHandler::new(
        dispatcher,
        maintenance.clone(),
        cfg.maintenance_config(),
        rpc_config.rate_limit_burst,
        rpc_config.rate_limit_per_sec,
    ));
    let (rpc_addr, rpc_handle) = RpcServer::new(rpc_config, handler)
        .start()
        .await
        .context("RPC server start failed")?;

    // 7. Worker pool
    let workers = (0..engine_config.workers)
        .map(|i| {
            Worker::new(
                format!("worker-{}-{}", std::process::id(), i),
                job_repo.clone(),
                model.clone(),
                retrieval.clone(),
                delivery.clone(),
                retry_policy.clone(),
                engine_config.clone(),
            )
        })
        .collect();
    let pool_handle = WorkerPool::new(workers).spawn(shutdown.clone());

    // 8. Background loops
    let recovery_handle = tokio::spawn(recovery.run(shutdown.clone()));
    let maintenance_scheduler = MaintenanceScheduler::new(
        maintenance,
        cfg.maintenance_config(),
        cfg.maintenance.interval_hours,
    );
    let maintenance_handle = tokio::spawn(maintenance_scheduler.run(shutdown.clone()));

    info!(
        rpc = %rpc_addr,
        workers = engine_config.workers,
        "System ready. Waiting for tasks..."
    );
    info!("Press Ctrl+C to shutdown");

    // 9. Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 10. Graceful shutdown: stop intake, let running jobs finish their round
    shutdown_tx.shutdown();
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    if tokio::time::timeout(SHUTDOWN_GRACE, pool_handle.join())
        .await
        .is_err()
    {
        error!("Workers did not stop in time; leases will be recovered on next start");
    }
    let _ = recovery_handle.await;
    let _ = maintenance_handle.await;
    pool.close().await;

    info!("Shutdown complete.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_db_dir_creates_parent() {
        let dir = std::env::temp_dir().join(format!("courier-db-dir-{}", std::process::id()));
        let url = format!("sqlite://{}/nested/courier.db", dir.display());

        ensure_db_dir(&url).unwrap();
        assert!(dir.join("nested").is_dir());
        std::fs::remove_dir_all(dir).ok();

        ensure_db_dir("sqlite::memory:").unwrap();
    }
}
