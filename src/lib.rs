//! Tether - Proxy Failover Supervisor
//!
//! Keeps a local SOCKS5 endpoint usable by running an external proxy
//! process against the best server from a subscription feed, and moving
//! on to the next server whenever the current one stops working.
//!
//! ## Features
//!
//! - Subscription feed decoding (base64 list of `ssr://` links)
//! - Concurrent TCP reachability probes with latency ordering
//! - Shared, periodically refreshed server pool
//! - Process supervision with end-to-end checks through the tunnel
//! - Automatic failover by demoting failed servers

pub mod config;
pub mod error;
pub mod models;
pub mod net;
pub mod pool;
pub mod provider;
pub mod services;
pub mod supervisor;

pub use config::Config;
pub use error::{Result, TetherError};
pub use pool::ServerPool;
pub use supervisor::Supervisor;
