//! Loopback [`Connector`]: CoAP over the Noise-secured UDP channel.

use async_trait::async_trait;
use tracing::debug;

use super::channel::SecureChannel;
use super::error::TransportResult;
use super::traits::{Connector, SessionConfig};
use crate::coap::CoapSession;

/// Connects CoAP sessions over [`SecureChannel`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoiseConnector;

impl NoiseConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for NoiseConnector {
    type Session = CoapSession<SecureChannel>;

    async fn connect(
        &self,
        endpoint: &str,
        config: &SessionConfig,
    ) -> TransportResult<Self::Session> {
        debug!(endpoint, ?config, "connecting");
        let channel = SecureChannel::connect(endpoint, config).await?;
        Ok(CoapSession::new(channel))
    }
}
