//! Connection establishment for outbound checks and fetches
//!
//! Handles direct dials, SOCKS5 tunnels through the local proxy
//! endpoint, and client-side TLS on top of either.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_socks::tcp::Socks5Stream;
use tracing::debug;

use crate::error::{Result, TetherError};
use crate::models::format_tcp_addr;

/// Byte stream usable as an HTTP transport
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Open a plain TCP connection to `host:port`
pub async fn connect_direct(host: &str, port: u16) -> Result<TcpStream> {
    let addr = format_tcp_addr(host, port);
    debug!("Connecting directly to {}", addr);

    TcpStream::connect(&addr)
        .await
        .map_err(|e| TetherError::Tunnel(format!("TCP connect to {} failed: {}", addr, e)))
}

/// Open a tunnel to `host:port` through a SOCKS5 proxy at `proxy_addr`
///
/// The target hostname is handed to the proxy unresolved so DNS happens
/// on the far side of the tunnel.
pub async fn connect_via_socks5(proxy_addr: &str, host: &str, port: u16) -> Result<TcpStream> {
    debug!("Connecting to {}:{} via SOCKS5 proxy at {}", host, port, proxy_addr);

    let socket = TcpStream::connect(proxy_addr).await.map_err(|e| {
        TetherError::Tunnel(format!("SOCKS5 proxy {} unreachable: {}", proxy_addr, e))
    })?;

    let stream = Socks5Stream::connect_with_socket(socket, (host, port))
        .await
        .map_err(|e| {
            TetherError::Tunnel(format!(
                "SOCKS5 connect via {} to {}:{} failed: {}",
                proxy_addr, host, port, e
            ))
        })?;

    debug!("SOCKS5 tunnel established");
    Ok(stream.into_inner())
}

/// Wrap an established stream in client TLS for `host`
pub async fn wrap_tls<S>(stream: S, host: &str) -> Result<TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| TetherError::Tls(format!("invalid server name {}: {}", host, e)))?;

    let connector = TlsConnector::from(client_config()?);
    connector
        .connect(server_name, stream)
        .await
        .map_err(|e| TetherError::Tls(format!("handshake with {} failed: {}", host, e)))
}

/// Client TLS configuration trusting the bundled web PKI roots
fn client_config() -> Result<Arc<rustls::ClientConfig>> {
    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| TetherError::Tls(format!("unsupported protocol versions: {}", e)))?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_direct() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"hi").await.unwrap();
        });

        let mut stream = connect_direct("127.0.0.1", port).await.unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_direct_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect_direct("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, TetherError::Tunnel(_)));
    }

    #[tokio::test]
    async fn test_socks5_proxy_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = connect_via_socks5(&addr, "example.com", 443)
            .await
            .unwrap_err();
        assert!(matches!(err, TetherError::Tunnel(_)));
    }

    #[tokio::test]
    async fn test_socks5_handshake_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // Speaks something that is not SOCKS5, then hangs up.
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
        });

        let err = connect_via_socks5(&addr, "example.com", 443)
            .await
            .unwrap_err();
        assert!(matches!(err, TetherError::Tunnel(_)));
    }
}
