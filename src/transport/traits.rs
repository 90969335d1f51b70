//! Seams between the protocol client and the secure transport.

use async_trait::async_trait;

use super::error::TransportResult;
use crate::coap::{Request, Response};

/// Options for establishing a secure session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionConfig {
    /// Accept any server identity.
    pub insecure_skip_verify: bool,
    /// Ask for a connection id where the binding supports one.
    pub connection_id: bool,
    /// SHA-256 fingerprint of the server's DTLS certificate. Required by the
    /// DTLS binding unless `insecure_skip_verify` is set.
    pub server_certificate: Option<[u8; 32]>,
    /// Server static key. Required by the Noise binding unless
    /// `insecure_skip_verify` is set.
    pub server_public_key: Option<[u8; 32]>,
}

/// One live request/response session over a secure channel.
///
/// Exchanges are strictly sequential; `close` is idempotent.
#[async_trait]
pub trait Session: Send {
    /// Send a request and wait for its complete response.
    async fn exchange(&mut self, request: Request) -> TransportResult<Response>;

    /// Tear the session down.
    async fn close(&mut self) -> TransportResult<()>;
}

/// Establishes sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Session type produced.
    type Session: Session + 'static;

    /// Resolve `endpoint` (`host:port`) and complete the secure handshake.
    ///
    /// No deadline is applied here; callers bound the future.
    async fn connect(&self, endpoint: &str, config: &SessionConfig)
    -> TransportResult<Self::Session>;
}

/// A secured, connected datagram pipe carrying opaque payloads.
#[async_trait]
pub trait DatagramLink: Send {
    /// Send one payload.
    async fn send(&mut self, payload: &[u8]) -> TransportResult<()>;

    /// Receive the next authenticated payload.
    async fn recv(&mut self) -> TransportResult<Vec<u8>>;

    /// Close the link.
    async fn close(&mut self) -> TransportResult<()>;
}
