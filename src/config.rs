use crate::error::{Result, TetherError};
use crate::models::ServerDefaults;
use crate::provider::SubscriptionProviderConfig;
use crate::services::PoolRefreshConfig;
use crate::supervisor::{MonitorConfig, SupervisorConfig};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Subscription source configuration
    pub subscription: SubscriptionConfig,
    /// Proxy process configuration
    pub proxy: ProxyProcessConfig,
    /// End-to-end check configuration
    pub check: CheckConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Subscription feed URL (required)
    pub url: Url,
    /// Feed download timeout in seconds
    pub fetch_timeout_secs: u64,
    /// TCP probe timeout in milliseconds
    pub probe_timeout_ms: u64,
    /// Maximum concurrent probes
    pub probe_concurrency: usize,
    /// Seconds between refreshes
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ProxyProcessConfig {
    /// Path of the external proxy executable
    pub bin: PathBuf,
    /// Where the configuration file for the executable is written
    pub config_path: PathBuf,
    /// Address the proxy process listens on
    pub local_address: String,
    /// Port the proxy process listens on
    pub local_port: u16,
    /// Timeout hint handed to the proxy process
    pub server_timeout_ms: u32,
    /// Worker hint handed to the proxy process
    pub server_workers: u32,
    /// Seconds to wait when no server is available
    pub empty_pool_backoff_secs: u64,
}

#[derive(Debug, Clone)]
pub struct CheckConfig {
    /// URL fetched through the local proxy
    pub url: Url,
    /// Seconds before the first check of a session
    pub grace_secs: u64,
    /// Seconds between checks
    pub interval_secs: u64,
    /// Check timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl LogConfig {
    /// Logging settings alone, readable before the rest of the configuration
    pub fn from_env() -> Self {
        Self {
            level: get_env_or("LOG_LEVEL", "info"),
            format: get_env_or("LOG_FORMAT", "pretty"),
        }
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let subscription_url = env::var("TETHER_SUBSCRIPTION_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| TetherError::MissingEnvVar("TETHER_SUBSCRIPTION_URL".into()))?;

        Ok(Config {
            subscription: SubscriptionConfig {
                url: parse_http_url("TETHER_SUBSCRIPTION_URL", &subscription_url)?,
                fetch_timeout_secs: parse_env("TETHER_FETCH_TIMEOUT_SECS", "10")?,
                probe_timeout_ms: parse_env("TETHER_PROBE_TIMEOUT_MS", "1500")?,
                probe_concurrency: parse_env("TETHER_PROBE_CONCURRENCY", "64")?,
                refresh_interval_secs: parse_env("TETHER_REFRESH_INTERVAL_SECS", "60")?,
            },
            proxy: ProxyProcessConfig {
                bin: PathBuf::from(get_env_or(
                    "TETHER_PROXY_BIN",
                    "/usr/local/opt/shadowsocks-libev/bin/ss-local",
                )),
                config_path: PathBuf::from(get_env_or("TETHER_CONFIG_PATH", "/tmp/ss.json")),
                local_address: get_env_or("TETHER_LOCAL_ADDRESS", "127.0.0.1"),
                local_port: parse_port("TETHER_LOCAL_PORT", "1080")?,
                server_timeout_ms: parse_env("TETHER_SERVER_TIMEOUT_MS", "5000")?,
                server_workers: parse_env("TETHER_SERVER_WORKERS", "5")?,
                empty_pool_backoff_secs: parse_env("TETHER_EMPTY_POOL_BACKOFF_SECS", "10")?,
            },
            check: CheckConfig {
                url: parse_http_url(
                    "TETHER_CHECK_URL",
                    &get_env_or("TETHER_CHECK_URL", "https://www.google.com"),
                )?,
                grace_secs: parse_env("TETHER_CHECK_GRACE_SECS", "5")?,
                interval_secs: parse_env("TETHER_CHECK_INTERVAL_SECS", "60")?,
                timeout_secs: parse_env("TETHER_CHECK_TIMEOUT_SECS", "10")?,
            },
            log: LogConfig::from_env(),
        })
    }

    /// Local listener and hints applied to every fetched server
    pub fn server_defaults(&self) -> ServerDefaults {
        ServerDefaults {
            local_address: self.proxy.local_address.clone(),
            local_port: self.proxy.local_port,
            timeout_ms: self.proxy.server_timeout_ms,
            workers: self.proxy.server_workers,
        }
    }

    pub fn provider_config(&self) -> SubscriptionProviderConfig {
        SubscriptionProviderConfig {
            fetch_timeout: Duration::from_secs(self.subscription.fetch_timeout_secs),
            probe_timeout: Duration::from_millis(self.subscription.probe_timeout_ms),
            probe_concurrency: self.subscription.probe_concurrency.max(1),
            defaults: self.server_defaults(),
        }
    }

    pub fn refresh_config(&self) -> PoolRefreshConfig {
        PoolRefreshConfig {
            refresh_interval: Duration::from_secs(self.subscription.refresh_interval_secs.max(1)),
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            config_path: self.proxy.config_path.clone(),
            empty_pool_backoff: Duration::from_secs(self.proxy.empty_pool_backoff_secs),
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            grace_period: Duration::from_secs(self.check.grace_secs),
            check_interval: Duration::from_secs(self.check.interval_secs.max(1)),
            check_timeout: Duration::from_secs(self.check.timeout_secs.max(1)),
            check_url: self.check.url.clone(),
        }
    }

    /// Get the local proxy endpoint address
    pub fn local_addr(&self) -> String {
        crate::models::format_tcp_addr(&self.proxy.local_address, self.proxy.local_port)
    }
}

fn parse_http_url(key: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| TetherError::InvalidConfig(format!("{} must be a valid URL: {}", key, e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(TetherError::InvalidConfig(format!(
                "{} has unsupported scheme: {}",
                key, other
            )))
        }
    }

    if url.host_str().is_none() {
        return Err(TetherError::InvalidConfig(format!(
            "{} must include a host",
            key
        )));
    }

    Ok(url)
}

fn parse_port(key: &str, default: &str) -> Result<u16> {
    match parse_env::<u16>(key, default)? {
        0 => Err(TetherError::InvalidConfig(format!(
            "{} must be a valid port number",
            key
        ))),
        port => Ok(port),
    }
}

fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| TetherError::InvalidConfig(format!("{} must be a valid number", key)))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
