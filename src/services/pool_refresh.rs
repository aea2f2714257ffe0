//! Pool refresh service
//!
//! Periodically asks the provider for a fresh server list and swaps it
//! into the shared pool. A failed fetch keeps the stale pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::pool::ServerPool;
use crate::provider::ServerProvider;

/// Pool refresh configuration
#[derive(Debug, Clone)]
pub struct PoolRefreshConfig {
    /// Time between fetches
    pub refresh_interval: Duration,
}

impl Default for PoolRefreshConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
        }
    }
}

/// Keeps the shared pool in step with the provider
///
/// Never touches the running proxy process: a new list only matters for
/// the next selection.
pub struct PoolRefresher {
    provider: Arc<dyn ServerProvider>,
    pool: Arc<ServerPool>,
    config: PoolRefreshConfig,
}

impl PoolRefresher {
    pub fn new(
        provider: Arc<dyn ServerProvider>,
        pool: Arc<ServerPool>,
        config: PoolRefreshConfig,
    ) -> Self {
        Self {
            provider,
            pool,
            config,
        }
    }

    /// Fetch once and replace the pool on success
    ///
    /// Returns the new pool size. On error the pool is left as it was.
    pub async fn refresh_once(&self) -> Result<usize> {
        let servers = self.provider.fetch_available().await?;
        let count = servers.len();
        self.pool.replace(servers);

        if count == 0 {
            warn!("Server list refreshed but no server is reachable");
        } else {
            info!("Server list updated: {} servers available", count);
        }

        Ok(count)
    }

    /// Run the refresh loop until shutdown
    #[instrument(skip(self, shutdown), fields(provider = self.provider.name()))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting pool refresh with {}s interval",
            self.config.refresh_interval.as_secs()
        );

        let mut refresh_interval = interval(self.config.refresh_interval);
        refresh_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        refresh_interval.tick().await; // Skip immediate tick; startup does its own fetch

        loop {
            tokio::select! {
                _ = refresh_interval.tick() => {
                    if let Err(e) = self.refresh_once().await {
                        error!(
                            "Failed to refresh server list, keeping {} known servers: {}",
                            self.pool.len(),
                            e
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Pool refresh shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Handle for stopping the refresh loop
pub struct PoolRefreshHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl PoolRefreshHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TetherError;
    use crate::models::{ServerDefaults, ServerDescriptor};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    fn server(host: &str) -> ServerDescriptor {
        ServerDescriptor::new(host, 443, "aes-256-cfb", "pw", &ServerDefaults::default())
    }

    /// Replays queued fetch results, then fails
    struct ScriptedProvider {
        results: Mutex<VecDeque<Result<Vec<ServerDescriptor>>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(results: Vec<Result<Vec<ServerDescriptor>>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ServerProvider for ScriptedProvider {
        async fn fetch_available(&self) -> Result<Vec<ServerDescriptor>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(TetherError::Fetch("script exhausted".to_string())))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn test_refresh_replaces_pool() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(vec![
            server("a"),
            server("b"),
        ])]));
        let pool = Arc::new(ServerPool::with_servers(vec![server("old")]));
        let refresher = PoolRefresher::new(provider, pool.clone(), PoolRefreshConfig::default());

        assert_eq!(assert_ok!(refresher.refresh_once().await), 2);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.peek_first().unwrap().host, "a");
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_stale_pool() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(TetherError::Timeout)]));
        let pool = Arc::new(ServerPool::with_servers(vec![server("a"), server("b")]));
        let refresher = PoolRefresher::new(provider, pool.clone(), PoolRefreshConfig::default());

        assert_err!(refresher.refresh_once().await);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.peek_first().unwrap().host, "a");
    }

    #[tokio::test]
    async fn test_failed_startup_fetch_leaves_empty_pool() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(TetherError::Fetch(
            "unreachable".to_string(),
        ))]));
        let pool = Arc::new(ServerPool::new());
        let refresher = PoolRefresher::new(provider, pool.clone(), PoolRefreshConfig::default());

        assert_err!(refresher.refresh_once().await);
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_run_refreshes_periodically_and_stops() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(vec![server("first")]),
            Err(TetherError::Timeout),
        ]));
        let pool = Arc::new(ServerPool::new());
        let refresher = PoolRefresher::new(
            provider.clone(),
            pool.clone(),
            PoolRefreshConfig {
                refresh_interval: Duration::from_millis(20),
            },
        );

        let (handle, shutdown) = PoolRefreshHandle::new();
        let task = tokio::spawn(async move { refresher.run(shutdown).await });

        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        assert!(provider.calls.load(Ordering::SeqCst) >= 2);
        // The later failure did not wipe the list from the first success.
        assert_eq!(pool.peek_first().unwrap().host, "first");
    }

    #[tokio::test]
    async fn test_stalled_subscription_keeps_pool() {
        use crate::provider::{SubscriptionProvider, SubscriptionProviderConfig};
        use tokio::net::TcpListener;

        // Accepts the connection and never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let stall = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let url = url::Url::parse(&format!("http://127.0.0.1:{}/sub", port)).unwrap();
        let provider = Arc::new(SubscriptionProvider::new(
            url,
            SubscriptionProviderConfig {
                fetch_timeout: Duration::from_millis(200),
                ..Default::default()
            },
        ));
        let pool = Arc::new(ServerPool::with_servers(vec![server("a"), server("b")]));
        let refresher = PoolRefresher::new(provider, pool.clone(), PoolRefreshConfig::default());

        let err = tokio::time::timeout(Duration::from_secs(5), refresher.refresh_once())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, TetherError::Fetch(_)));

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.peek_first().unwrap().host, "a");
        stall.abort();
    }
}
