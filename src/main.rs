//! # Dispatch Gateway - Main Entry Point
//!
//! Loads configuration, initialises logging and metrics, then serves the gateway
//! until SIGINT or SIGTERM.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use dispatch_gateway::observability::{init_logging, install_prometheus_recorder};
use dispatch_gateway::{GatewayConfig, GatewayResult, GatewayServer};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // Logging may not be up yet when configuration fails
        eprintln!("dispatch-gateway failed: {}", e);
        error!(error = %e, "Gateway terminated with an error");
        std::process::exit(1);
    }
}

async fn run() -> GatewayResult<()> {
    let config = GatewayConfig::load_from_env().await?;
    init_logging(&config.observability.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting dispatch gateway");

    let mut server = GatewayServer::new(config.clone()).await?;

    if config.observability.metrics.prometheus_enabled {
        let handle = install_prometheus_recorder(&config.observability.metrics)?;
        server = server.with_metrics(handle);
        info!("Prometheus metrics available at /admin/metrics");
    }

    let shutdown = CancellationToken::new();
    let mut server_task = tokio::spawn(server.start(shutdown.clone()));

    tokio::select! {
        result = &mut server_task => {
            return flatten(result);
        }
        _ = shutdown_signal() => {}
    }

    info!("Shutdown signal received, draining in-flight requests");
    shutdown.cancel();

    match tokio::time::timeout(config.server.shutdown_timeout, &mut server_task).await {
        Ok(result) => flatten(result)?,
        Err(_) => {
            warn!(
                timeout = %humantime::format_duration(config.server.shutdown_timeout),
                "Graceful shutdown timed out, aborting server"
            );
            server_task.abort();
        }
    }

    info!("Dispatch gateway shutdown complete");
    Ok(())
}

fn flatten(result: Result<GatewayResult<()>, tokio::task::JoinError>) -> GatewayResult<()> {
    match result {
        Ok(inner) => inner,
        Err(e) => Err(dispatch_gateway::GatewayError::internal(format!("Server task failed: {}", e))),
    }
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
