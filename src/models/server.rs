use std::fmt;

use serde::{Deserialize, Serialize};

/// Local listener and tuning hints stamped onto every parsed server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDefaults {
    pub local_address: String,
    pub local_port: u16,
    pub timeout_ms: u32,
    pub workers: u32,
}

impl Default for ServerDefaults {
    fn default() -> Self {
        Self {
            local_address: "127.0.0.1".to_string(),
            local_port: 1080,
            timeout_ms: 5000,
            workers: 5,
        }
    }
}

/// One upstream proxy candidate
///
/// Serializes to the JSON configuration the external proxy process reads.
/// Fields the process does not understand (`protocol`, `obfs`,
/// `latency_ms`) are skipped.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    #[serde(rename = "server")]
    pub host: String,
    #[serde(rename = "server_port")]
    pub port: u16,
    pub local_address: String,
    pub local_port: u16,
    #[serde(rename = "timeout")]
    pub timeout_ms: u32,
    pub workers: u32,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    pub password: String,
    #[serde(skip)]
    pub protocol: String,
    #[serde(skip)]
    pub obfs: String,
    /// TCP connect latency measured when the server was fetched
    #[serde(skip)]
    pub latency_ms: f64,
}

impl ServerDescriptor {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        method: impl Into<String>,
        password: impl Into<String>,
        defaults: &ServerDefaults,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            local_address: defaults.local_address.clone(),
            local_port: defaults.local_port,
            timeout_ms: defaults.timeout_ms,
            workers: defaults.workers,
            method: method.into(),
            plugin: None,
            password: password.into(),
            protocol: String::new(),
            obfs: String::new(),
            latency_ms: 0.0,
        }
    }

    /// Upstream address suitable for `TcpStream::connect`
    pub fn address(&self) -> String {
        format_tcp_addr(&self.host, self.port)
    }

    /// Address the external process listens on for client traffic
    pub fn local_endpoint(&self) -> String {
        format_tcp_addr(&self.local_address, self.local_port)
    }

    pub fn with_latency(mut self, latency_ms: f64) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}

impl fmt::Display for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

// Hand-written so the password never reaches a log line.
impl fmt::Debug for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("local_address", &self.local_address)
            .field("local_port", &self.local_port)
            .field("timeout_ms", &self.timeout_ms)
            .field("workers", &self.workers)
            .field("method", &self.method)
            .field("plugin", &self.plugin)
            .field("password", &"<redacted>")
            .field("protocol", &self.protocol)
            .field("obfs", &self.obfs)
            .field("latency_ms", &self.latency_ms)
            .finish()
    }
}

/// Join host and port, bracketing bare IPv6 literals
pub fn format_tcp_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
