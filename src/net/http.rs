//! Minimal HTTP/1.1 GET client
//!
//! Used for the subscription fetch (direct) and the end-to-end
//! reachability check (through the local SOCKS5 endpoint).

use std::time::Duration;

use bytes::Bytes;
use http::header::{CONNECTION, HOST, USER_AGENT};
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use tracing::{debug, instrument};
use url::{Position, Url};

use super::transport::{self, Connection};
use crate::error::{Result, TetherError};
use crate::models::format_tcp_addr;

const USER_AGENT_VALUE: &str = concat!("tether/", env!("CARGO_PKG_VERSION"));

/// How the request reaches the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Direct,
    /// Through a SOCKS5 proxy listening at the given `host:port`
    Socks5(&'a str),
}

/// Fully-read response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Perform a GET and drain the whole body, bounded by `timeout`
#[instrument(skip(url, timeout), fields(host = url.host_str().unwrap_or_default()))]
pub async fn get(url: &Url, route: Route<'_>, timeout: Duration) -> Result<HttpResponse> {
    tokio::time::timeout(timeout, get_inner(url, route)).await?
}

async fn get_inner(url: &Url, route: Route<'_>) -> Result<HttpResponse> {
    let (host, port) = target_of(url)?;

    let tcp = match route {
        Route::Direct => transport::connect_direct(&host, port).await?,
        Route::Socks5(proxy_addr) => transport::connect_via_socks5(proxy_addr, &host, port).await?,
    };

    let io: Box<dyn Connection> = match url.scheme() {
        "https" => Box::new(transport::wrap_tls(tcp, &host).await?),
        _ => Box::new(tcp),
    };

    let (mut sender, conn) = hyper::client::conn::http1::handshake::<_, Empty<Bytes>>(
        TokioIo::new(io),
    )
    .await
    .map_err(|e| TetherError::Http(format!("Handshake failed: {}", e)))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Connection ended: {}", e);
        }
    });

    let request = Request::builder()
        .method(Method::GET)
        .uri(&url[Position::BeforePath..Position::AfterQuery])
        .header(HOST, host_header(&host, url.port()))
        .header(USER_AGENT, USER_AGENT_VALUE)
        .header(CONNECTION, "close")
        .body(Empty::<Bytes>::new())?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| TetherError::Http(format!("Request failed: {}", e)))?;

    let (parts, body) = response.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| TetherError::Http(format!("Failed to read response: {}", e)))?
        .to_bytes();

    debug!(status = %parts.status, bytes = body.len(), "Response received");

    Ok(HttpResponse {
        status: parts.status,
        headers: parts.headers,
        body,
    })
}

/// `Host` value; bare IPv6 literals are bracketed, default ports omitted
fn host_header(host: &str, port: Option<u16>) -> String {
    match port {
        Some(p) => format_tcp_addr(host, p),
        None if host.contains(':') => format!("[{}]", host),
        None => host.to_string(),
    }
}

/// Extract the dial target from an http/https URL
pub fn target_of(url: &Url) -> Result<(String, u16)> {
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(TetherError::Http(format!("unsupported scheme: {}", other)));
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| TetherError::Http(format!("missing host in {}", url)))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();

    let port = url
        .port_or_known_default()
        .ok_or_else(|| TetherError::Http(format!("missing port in {}", url)))?;

    Ok((host, port))
}
