//! Tether - Entry Point
//!
//! Starts the pool refresher and the proxy supervisor with graceful shutdown support.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tether::config::{Config, LogConfig};
use tether::provider::SubscriptionProvider;
use tether::services::{PoolRefreshHandle, PoolRefresher};
use tether::supervisor::{CommandLauncher, ReachabilityMonitor, Supervisor, TunnelHealthCheck};
use tether::ServerPool;

#[tokio::main]
async fn main() -> tether::Result<()> {
    init_tracing(&LogConfig::from_env());

    info!("Starting Tether");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;
    info!(
        "Configuration loaded - subscription host: {}, local endpoint: {}",
        config.subscription.url.host_str().unwrap_or("-"),
        config.local_addr()
    );

    let pool = Arc::new(ServerPool::new());

    // Provider and refresher
    let provider = Arc::new(SubscriptionProvider::new(
        config.subscription.url.clone(),
        config.provider_config(),
    ));
    let refresher = PoolRefresher::new(provider, pool.clone(), config.refresh_config());

    // Populate the pool once before supervising; an empty pool is retried
    match refresher.refresh_once().await {
        Ok(count) => info!("Initial pool holds {} servers", count),
        Err(e) => warn!("Initial refresh failed, starting with an empty pool: {}", e),
    }

    // Supervisor
    let monitor_config = config.monitor_config();
    let monitor = Arc::new(ReachabilityMonitor::new(
        Arc::new(TunnelHealthCheck::from_config(&monitor_config)),
        &monitor_config,
    ));
    let launcher = Arc::new(CommandLauncher::new(config.proxy.bin.clone()));
    let supervisor = Supervisor::new(
        pool.clone(),
        launcher,
        monitor,
        config.supervisor_config(),
    );

    // Create shutdown channels
    let (shutdown_tx, supervisor_shutdown) = watch::channel(false);
    let (refresh_handle, refresh_shutdown) = PoolRefreshHandle::new();

    let refresh_task = tokio::spawn(async move {
        refresher.run(refresh_shutdown).await;
    });

    let supervisor_task = tokio::spawn(async move {
        supervisor.run(supervisor_shutdown).await;
    });

    info!(
        "Supervising {} on {}",
        config.proxy.bin.display(),
        config.local_addr()
    );

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    refresh_handle.shutdown();

    let (refresh_result, supervisor_result) = tokio::join!(refresh_task, supervisor_task);
    if let Err(e) = refresh_result {
        error!("Pool refresher task failed: {}", e);
    }
    if let Err(e) = supervisor_result {
        error!("Supervisor task failed: {}", e);
    }

    info!("Tether stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tether={}", log.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if log.is_json() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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
