//! Lipsync Server: talking-head video generation over HTTP.
//!
//! Main entry point that wires the crates together and starts the server.

use std::net::SocketAddr;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};

use lipsync_api::{AppState, build_router};
use lipsync_core::config::AppConfig;
use lipsync_core::{AppError, AppResult};
use lipsync_pipeline::PipelineOrchestrator;

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e.chain());
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e.chain(), "Server error");
        std::process::exit(1);
    }
}

/// Load `config/default.toml`, the `LIPSYNC_ENV` overlay and `LIPSYNC__*`
/// variables.
fn load_configuration() -> AppResult<AppConfig> {
    let env = std::env::var("LIPSYNC_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> AppResult<()> {
    tracing::info!("Starting lipsync-server v{}", env!("CARGO_PKG_VERSION"));

    let shutdown = CancellationToken::new();

    let orchestrator = PipelineOrchestrator::from_config(&config.scratch, &config.inference)
        .await?
        .with_shutdown(shutdown.clone());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| AppError::configuration(format!("Invalid bind address: {e}")))?;
    let grace = Duration::from_secs(config.server.shutdown_grace_seconds);

    let app = build_router(AppState::new(config, orchestrator));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind {addr}: {e}")))?;

    tracing::info!("Lipsync server listening on {}", addr);

    let stop_accepting = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(stop_accepting.cancelled_owned())
            .await
    });

    tokio::select! {
        result = &mut server => return server_result(result),
        _ = shutdown_signal() => {}
    }

    // Cancelling kills running inference processes; their jobs release
    // scratch and answer with an error before connections drain.
    tracing::info!("Shutdown signal received, cancelling in-flight jobs...");
    shutdown.cancel();

    match tokio::time::timeout(grace, &mut server).await {
        Ok(result) => server_result(result)?,
        Err(_) => {
            tracing::warn!(grace_s = grace.as_secs(), "Grace period elapsed, forcing shutdown");
            server.abort();
        }
    }

    tracing::info!("Lipsync server shut down");
    Ok(())
}

fn server_result(
    result: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> AppResult<()> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(AppError::internal(format!("Server error: {e}"))),
        Err(e) => Err(AppError::internal(format!("Server task failed: {e}"))),
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
