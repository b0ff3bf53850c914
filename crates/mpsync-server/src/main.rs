//! mpsync Server - Main entry point

use anyhow::Result;
use mpsync_common::logging::{init_logging, LogConfig};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tracing::info;

use mpsync_server::{
    api::{self, AppState},
    config::Config,
    ingest::{ImportOrchestrator, JobRegistry, LiveResourceProvider},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .log_file_prefix("mpsync-server")
        .filter_directives("mpsync_server=debug,tower_http=debug,sqlx=warn")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting mpsync server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    // Used for migrations only; import workers open their own pools
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
        .connect(&config.database.url)
        .await?;

    info!("Database connection pool established");

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
    db_pool.close().await;

    info!("Database migrations completed");

    let provider = LiveResourceProvider::new(
        config.database.url.clone(),
        Duration::from_secs(config.database.connect_timeout_secs),
        config.import.source.clone(),
    );
    let orchestrator = Arc::new(ImportOrchestrator::new(
        Arc::new(JobRegistry::new()),
        Arc::new(provider),
        config.import.clone(),
    ));

    let _reaper = match config.import.job_retention {
        Some(retention) => {
            info!(
                "Finished import jobs are kept for {}s",
                retention.as_secs()
            );
            Some(orchestrator.spawn_reaper(retention, config.import.reap_interval))
        }
        None => {
            info!("Import job retention not configured, finished jobs are kept until restart");
            None
        }
    };

    let app = api::create_router(AppState::new(orchestrator), &config.cors);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    info!("Server shut down gracefully");

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
///
/// Running imports are not awaited; their jobs are lost with the process.
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
