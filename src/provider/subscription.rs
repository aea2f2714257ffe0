//! Subscription-feed provider
//!
//! Fetches the feed over HTTP(S), decodes it, and probes every entry.

use std::time::Duration;

use async_trait::async_trait;
use http::header::LOCATION;
use http::{HeaderMap, StatusCode};
use tracing::{debug, info, instrument};
use url::Url;

use super::{feed, probe, ServerProvider};
use crate::error::{Result, TetherError};
use crate::models::{ServerDefaults, ServerDescriptor};
use crate::net::{self, Route};

/// Redirect hops followed before the download gives up
const MAX_REDIRECTS: usize = 10;

/// Subscription provider configuration
#[derive(Debug, Clone)]
pub struct SubscriptionProviderConfig {
    /// Bound on the whole feed download
    pub fetch_timeout: Duration,
    /// Bound on each TCP liveness probe
    pub probe_timeout: Duration,
    /// Maximum probes in flight
    pub probe_concurrency: usize,
    /// Local listener and hints applied to every server
    pub defaults: ServerDefaults,
}

impl Default for SubscriptionProviderConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_millis(1500),
            probe_concurrency: 64,
            defaults: ServerDefaults::default(),
        }
    }
}

/// Provider backed by an `ssr://` subscription URL
pub struct SubscriptionProvider {
    url: Url,
    config: SubscriptionProviderConfig,
}

impl SubscriptionProvider {
    pub fn new(url: Url, config: SubscriptionProviderConfig) -> Self {
        Self { url, config }
    }

    async fn download(&self) -> Result<bytes::Bytes> {
        tokio::time::timeout(self.config.fetch_timeout, self.follow_redirects())
            .await
            .map_err(|_| {
                TetherError::Fetch(format!(
                    "subscription not received within {}s",
                    self.config.fetch_timeout.as_secs_f64()
                ))
            })?
    }

    /// GET the feed, following up to `MAX_REDIRECTS` redirects
    async fn follow_redirects(&self) -> Result<bytes::Bytes> {
        let mut url = self.url.clone();

        for _ in 0..=MAX_REDIRECTS {
            let response = net::get(&url, Route::Direct, self.config.fetch_timeout)
                .await
                .map_err(|e| match e {
                    TetherError::Fetch(_) => e,
                    other => TetherError::Fetch(other.to_string()),
                })?;

            if is_redirect(response.status) {
                url = redirect_target(&url, &response.headers)?;
                debug!(
                    status = %response.status,
                    host = url.host_str().unwrap_or_default(),
                    "Following subscription redirect"
                );
                continue;
            }

            if !response.status.is_success() {
                return Err(TetherError::Fetch(format!(
                    "subscription returned status {}",
                    response.status
                )));
            }

            return Ok(response.body);
        }

        Err(TetherError::Fetch(format!(
            "subscription exceeded {} redirects",
            MAX_REDIRECTS
        )))
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Resolve `Location` against the URL that answered with it
fn redirect_target(current: &Url, headers: &HeaderMap) -> Result<Url> {
    let location = headers
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| TetherError::Fetch("redirect without a usable Location".to_string()))?;

    let next = current
        .join(location)
        .map_err(|e| TetherError::Fetch(format!("invalid redirect target: {}", e)))?;

    match next.scheme() {
        "http" | "https" => Ok(next),
        other => Err(TetherError::Fetch(format!(
            "redirect to unsupported scheme: {}",
            other
        ))),
    }
}

#[async_trait]
impl ServerProvider for SubscriptionProvider {
    #[instrument(skip(self), fields(provider = self.name()))]
    async fn fetch_available(&self) -> Result<Vec<ServerDescriptor>> {
        let payload = self.download().await?;

        let candidates = feed::parse_feed(&payload, &self.config.defaults)?;
        info!("Retrieved {} servers from subscription", candidates.len());

        let reachable = probe::probe_all(
            candidates,
            self.config.probe_timeout,
            self.config.probe_concurrency,
        )
        .await;

        Ok(reachable)
    }

    fn name(&self) -> &'static str {
        "subscription"
    }
}
