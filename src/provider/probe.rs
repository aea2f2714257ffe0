//! TCP liveness probing for freshly parsed servers

use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

use crate::error::{Result, TetherError};
use crate::models::ServerDescriptor;

/// Time a bounded TCP connect to the server; returns latency in ms
#[instrument(skip(server), fields(server = %server))]
pub async fn probe(server: &ServerDescriptor, probe_timeout: Duration) -> Result<f64> {
    let start = Instant::now();

    match timeout(probe_timeout, TcpStream::connect(server.address())).await {
        Ok(Ok(_stream)) => {
            let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
            debug!("Server {} reachable in {:.1}ms", server, latency_ms);
            Ok(latency_ms)
        }
        Ok(Err(e)) => Err(TetherError::Probe(format!("{}: {}", server, e))),
        Err(_) => Err(TetherError::Probe(format!("{}: connect timed out", server))),
    }
}

/// Probe every server concurrently and keep the reachable ones
///
/// Survivors carry their measured latency and come back sorted fastest
/// first; ties keep discovery order.
pub async fn probe_all(
    servers: Vec<ServerDescriptor>,
    probe_timeout: Duration,
    concurrency: usize,
) -> Vec<ServerDescriptor> {
    let total = servers.len();

    let mut reachable: Vec<(usize, ServerDescriptor)> =
        futures::stream::iter(servers.into_iter().enumerate())
            .map(|(index, server)| async move {
                match probe(&server, probe_timeout).await {
                    Ok(latency_ms) => Some((index, server.with_latency(latency_ms))),
                    Err(e) => {
                        debug!("Dropping unreachable server: {}", e);
                        None
                    }
                }
            })
            .buffer_unordered(concurrency.max(1))
            .filter_map(|result| async move { result })
            .collect()
            .await;

    reachable.sort_by(|(ia, a), (ib, b)| {
        a.latency_ms
            .total_cmp(&b.latency_ms)
            .then_with(|| ia.cmp(ib))
    });

    info!(
        "Probe complete: {} of {} servers reachable",
        reachable.len(),
        total
    );

    reachable.into_iter().map(|(_, server)| server).collect()
}
