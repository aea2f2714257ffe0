//! End-to-end reachability monitoring for the active proxy
//!
//! A live process is not enough: the monitor pushes a real HTTPS request
//! through the local SOCKS5 endpoint and asks the supervisor to kill the
//! process the first time that fails.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, instrument};
use url::Url;

use crate::error::{Result, TetherError};
use crate::models::ServerDescriptor;
use crate::net::{self, Route};

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Delay before the first check, while the process binds its listener
    pub grace_period: Duration,
    /// Delay between checks
    pub check_interval: Duration,
    /// Bound on one end-to-end check
    pub check_timeout: Duration,
    /// Target fetched through the tunnel
    pub check_url: Url,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            check_interval: Duration::from_secs(60),
            check_timeout: Duration::from_secs(10),
            check_url: Url::parse("https://www.google.com").expect("static URL is valid"),
        }
    }
}

/// One end-to-end check against a running server
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, server: &ServerDescriptor) -> Result<()>;
}

/// GET `check_url` through the server's local SOCKS5 endpoint and drain the body
pub struct TunnelHealthCheck {
    check_url: Url,
    check_timeout: Duration,
}

impl TunnelHealthCheck {
    pub fn new(check_url: Url, check_timeout: Duration) -> Self {
        Self {
            check_url,
            check_timeout,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.check_url.clone(), config.check_timeout)
    }
}

#[async_trait]
impl HealthCheck for TunnelHealthCheck {
    async fn check(&self, server: &ServerDescriptor) -> Result<()> {
        let endpoint = server.local_endpoint();
        let response = net::get(&self.check_url, Route::Socks5(&endpoint), self.check_timeout)
            .await
            .map_err(|e| TetherError::Probe(format!("{} via {}: {}", self.check_url, endpoint, e)))?;

        debug!(
            status = %response.status,
            bytes = response.body.len(),
            "Check request completed"
        );
        Ok(())
    }
}

/// Why a monitor stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// Stop signal received; the process was left alone
    Cancelled,
    /// A check failed and termination was requested
    KillRequested,
}

/// Periodic end-to-end checker bound to one proxy session
pub struct ReachabilityMonitor {
    check: Arc<dyn HealthCheck>,
    grace_period: Duration,
    check_interval: Duration,
}

impl ReachabilityMonitor {
    pub fn new(check: Arc<dyn HealthCheck>, config: &MonitorConfig) -> Self {
        Self {
            check,
            grace_period: config.grace_period,
            check_interval: config.check_interval,
        }
    }

    /// Check `server` until stopped or until a check fails
    ///
    /// The monitor never touches the process. On failure it sends the
    /// error on `kill` and returns; the supervisor owns the termination.
    #[instrument(skip_all, fields(server = %server))]
    pub async fn run(
        &self,
        server: Arc<ServerDescriptor>,
        mut stop: watch::Receiver<bool>,
        kill: oneshot::Sender<TetherError>,
    ) -> MonitorExit {
        if sleep_or_stop(self.grace_period, &mut stop).await {
            return MonitorExit::Cancelled;
        }

        loop {
            let result = tokio::select! {
                result = self.check.check(&server) => result,
                _ = stopped(&mut stop) => return MonitorExit::Cancelled,
            };

            match result {
                Ok(()) => info!("Server {} check OK", server),
                Err(e) => {
                    error!("Server {} failed end-to-end check: {}", server, e);
                    let _ = kill.send(e);
                    return MonitorExit::KillRequested;
                }
            }

            if sleep_or_stop(self.check_interval, &mut stop).await {
                return MonitorExit::Cancelled;
            }
        }
    }
}

/// Sleep for `duration`; true if stopped first
async fn sleep_or_stop(duration: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = stopped(stop) => true,
    }
}

/// Resolves once the stop flag is set or its sender is gone
async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}
