//! Outbound networking
//!
//! - Direct and SOCKS5-tunnelled TCP connections
//! - Client TLS with bundled web PKI roots
//! - A small HTTP/1.1 GET used for feeds and end-to-end checks

pub mod http;
pub mod transport;

pub use self::http::{get, HttpResponse, Route};
pub use transport::{connect_direct, connect_via_socks5, Connection};
