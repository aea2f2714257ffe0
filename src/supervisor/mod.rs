//! Proxy process supervision
//!
//! The supervisor loop:
//! - picks the first server in the pool
//! - writes its configuration file and launches the proxy process
//! - runs a reachability monitor for the session
//! - on exit or failed check, demotes the server and starts over

pub mod artifact;
pub mod monitor;
pub mod process;

pub use monitor::{HealthCheck, MonitorConfig, MonitorExit, ReachabilityMonitor, TunnelHealthCheck};
pub use process::{CommandLauncher, ManagedProcess, ProcessLauncher};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, instrument, warn};

use crate::error::Result;
use crate::models::ServerDescriptor;
use crate::pool::ServerPool;

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Where the proxy configuration file is written
    pub config_path: PathBuf,
    /// Wait before re-checking an empty pool
    pub empty_pool_backoff: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/tmp/ss.json"),
            empty_pool_backoff: Duration::from_secs(10),
        }
    }
}

/// How one pass through the supervisor loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Pool was empty; nothing launched
    NoCandidate,
    /// Configuration write or process launch failed; server demoted
    LaunchFailed,
    /// Process exited on its own; server demoted
    Exited { code: Option<i32> },
    /// End-to-end check failed and the process was killed; server demoted
    Unhealthy,
    /// Shutdown requested; process killed, pool untouched
    Shutdown,
}

/// Owns the proxy process and drives failover
pub struct Supervisor {
    pool: Arc<ServerPool>,
    launcher: Arc<dyn ProcessLauncher>,
    monitor: Arc<ReachabilityMonitor>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(
        pool: Arc<ServerPool>,
        launcher: Arc<dyn ProcessLauncher>,
        monitor: Arc<ReachabilityMonitor>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            pool,
            launcher,
            monitor,
            config,
        }
    }

    /// Run sessions back to back until shutdown
    #[instrument(skip_all)]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting supervisor (config file: {})",
            self.config.config_path.display()
        );

        loop {
            match self.run_session(&mut shutdown).await {
                SessionOutcome::NoCandidate => {
                    warn!(
                        "No available server to select, retrying in {}s",
                        self.config.empty_pool_backoff.as_secs()
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.empty_pool_backoff) => {}
                        _ = shutdown_requested(&mut shutdown) => break,
                    }
                }
                SessionOutcome::Shutdown => break,
                outcome => debug!(?outcome, "Session finished"),
            }
        }

        info!("Supervisor stopped");
    }

    /// One select → launch → monitor → failover pass
    pub async fn run_session(&self, shutdown: &mut watch::Receiver<bool>) -> SessionOutcome {
        if *shutdown.borrow() {
            return SessionOutcome::Shutdown;
        }

        let Some(server) = self.pool.peek_first() else {
            return SessionOutcome::NoCandidate;
        };
        info!(
            latency_ms = server.latency_ms,
            remaining = self.pool.len(),
            "Selected server: {}",
            server
        );

        let mut process = match self.start(&server).await {
            Ok(process) => process,
            Err(e) => {
                if e.is_per_candidate() {
                    warn!("Server {} could not be started: {}", server, e);
                } else {
                    error!("Failed to set up server {}: {}", server, e);
                }
                self.demote(&server);
                return SessionOutcome::LaunchFailed;
            }
        };
        info!(
            pid = ?process.id(),
            "Proxy running with server {} on {}",
            server,
            server.local_endpoint()
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let (kill_tx, kill_rx) = oneshot::channel();
        let monitor = self.monitor.clone();
        let watched = server.clone();
        let monitor_task =
            tokio::spawn(async move { monitor.run(watched, stop_rx, kill_tx).await });

        let outcome = tokio::select! {
            status = process.wait() => match status {
                Ok(code) => {
                    warn!(?code, "Proxy process for {} exited", server);
                    SessionOutcome::Exited { code }
                }
                Err(e) => {
                    error!("Failed waiting on proxy process for {}: {}", server, e);
                    SessionOutcome::Exited { code: None }
                }
            },
            Ok(reason) = kill_rx => {
                warn!("Terminating proxy for {}: {}", server, reason);
                SessionOutcome::Unhealthy
            }
            _ = shutdown_requested(shutdown) => {
                info!("Shutdown requested, stopping proxy for {}", server);
                SessionOutcome::Shutdown
            }
        };

        // Monitor is stopped before the process is touched.
        let _ = stop_tx.send(true);
        if let Err(e) = monitor_task.await {
            error!("Monitor task for {} failed: {}", server, e);
        }

        if !matches!(outcome, SessionOutcome::Exited { .. }) {
            if let Err(e) = terminate(process.as_mut()).await {
                error!("Failed to terminate proxy for {}: {}", server, e);
            }
        }

        if outcome != SessionOutcome::Shutdown {
            self.demote(&server);
        }

        outcome
    }

    fn demote(&self, server: &Arc<ServerDescriptor>) {
        if self.pool.demote_if_first(server) {
            debug!("Demoted {}, {} servers left", server, self.pool.len());
        } else {
            debug!("Pool was refreshed during the session, {} not demoted", server);
        }
    }

    async fn start(&self, server: &ServerDescriptor) -> Result<Box<dyn ManagedProcess>> {
        artifact::write_artifact(&self.config.config_path, server).await?;
        self.launcher.launch(&self.config.config_path)
    }
}

/// Kill and reap
async fn terminate(process: &mut dyn ManagedProcess) -> Result<()> {
    process.kill().await?;
    process.wait().await?;
    Ok(())
}

/// Resolves once shutdown is flagged; never resolves if the sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
