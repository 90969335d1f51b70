//! Connected UDP sockets for the secure bindings.

use std::net::SocketAddr;

use tokio::net::{UdpSocket, lookup_host};
use tracing::debug;

use super::error::{TransportError, TransportResult};

/// Resolve `endpoint` (`host:port`), bind an ephemeral socket of the same
/// address family and connect it to the first resolved address.
pub(crate) async fn connect(endpoint: &str) -> TransportResult<(UdpSocket, SocketAddr)> {
    let peer = lookup_host(endpoint)
        .await
        .map_err(|source| TransportError::Resolve {
            endpoint: endpoint.to_string(),
            source,
        })?
        .next()
        .ok_or_else(|| TransportError::NoAddress(endpoint.to_string()))?;

    let bind: SocketAddr = if peer.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(peer).await?;
    debug!(%peer, local = ?socket.local_addr().ok(), "socket connected");

    Ok((socket, peer))
}

/// Host part of `host:port`, without IPv6 brackets.
pub(crate) fn host(endpoint: &str) -> &str {
    let host = endpoint
        .rsplit_once(':')
        .map_or(endpoint, |(host, _)| host);
    host.trim_start_matches('[').trim_end_matches(']')
}
