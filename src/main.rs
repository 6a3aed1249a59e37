//! # Order Sync Main Entry Point
//!
//! Runs the API server, the background worker, migrations, or a single job.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use order_sync::{
    app::build_controller,
    config::ConfigLoader,
    db,
    server::{AppState, run_server},
    sync::SyncWorker,
    telemetry::init_tracing,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Staged order synchronization into the ERP.
#[derive(Parser)]
#[command(name = "order-sync", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API and run the worker in the same process (default)
    Serve,
    /// Run only the background worker
    Worker,
    /// Apply pending database migrations and exit
    Migrate,
    /// Claim one pending job and run it to a stop in the foreground
    RunJob {
        /// Id of a pending sync job
        job_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration from layered env files and variables
    let config = ConfigLoader::new().load()?;
    init_tracing(&config)?;

    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        debug!(config = %redacted_json, "Effective configuration");
    }

    let db = db::init_pool(&config).await?;
    let config = Arc::new(config);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            db::run_migrations(&db).await?;
        }
        Command::RunJob { job_id } => {
            let controller = build_controller(&config, &db)?;
            let report = controller.execute(job_id).await?;
            info!(
                job_id = %report.job_id,
                status = report.status.as_str(),
                processed = report.progress.processed,
                successful = report.progress.successful,
                failed = report.progress.failed,
                "Job stopped"
            );
        }
        Command::Worker => {
            let controller = build_controller(&config, &db)?;
            let shutdown = shutdown_on_ctrl_c();
            SyncWorker::new(controller, config.worker.clone())
                .run(shutdown)
                .await?;
        }
        Command::Serve => {
            let controller = build_controller(&config, &db)?;
            let shutdown = shutdown_on_ctrl_c();

            let worker = SyncWorker::new(controller.clone(), config.worker.clone());
            let worker_shutdown = shutdown.clone();
            let worker_handle = tokio::spawn(async move { worker.run(worker_shutdown).await });

            let state = AppState::new(config.clone(), db.clone(), controller);
            let served = run_server(config.clone(), state, shutdown.clone()).await;
            // Stop the worker as well when the server exits on its own
            shutdown.cancel();

            match worker_handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Worker stopped with error: {}", e),
                Err(e) => error!("Worker task failed: {}", e),
            }
            served?;
        }
    }

    Ok(())
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                trigger.cancel();
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });
    token
}
