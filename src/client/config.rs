//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use super::bootstrap::{DeviceIdentity, KeySource};
use crate::core::{CLOSE_TIMEOUT, CredentialError, DEFAULT_ENDPOINT, PHASE_TIMEOUT};
use crate::transport::SessionConfig;

/// Everything a device session needs besides its telemetry.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Device identity.
    pub identity: DeviceIdentity,

    /// Where to find the signing key.
    pub key_source: KeySource,

    /// Ingestion endpoint, `host:port`.
    pub endpoint: String,

    /// Secure session options.
    pub session: SessionConfig,

    /// Deadline for connect, authenticate, state fetch and publish, each.
    pub phase_timeout: Duration,

    /// Deadline for closing the session.
    pub close_timeout: Duration,
}

impl ClientConfig {
    /// Start building a configuration.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    device_id: Option<String>,
    key_source: KeySource,
    endpoint: String,
    session: SessionConfig,
    phase_timeout: Duration,
    close_timeout: Duration,
}

impl ClientConfigBuilder {
    /// Defaults: conventional key lookup, the public endpoint, connection id
    /// requested, 30 s phases, 5 s close.
    pub fn new() -> Self {
        Self {
            device_id: None,
            key_source: KeySource::default(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            session: SessionConfig {
                connection_id: true,
                ..SessionConfig::default()
            },
            phase_timeout: PHASE_TIMEOUT,
            close_timeout: CLOSE_TIMEOUT,
        }
    }

    /// Set the device identity (required).
    pub fn device_id(mut self, id: impl Into<String>) -> Self {
        self.device_id = Some(id.into());
        self
    }

    /// Read the key from an explicit file instead of `certificates/<id>.key`.
    pub fn key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_source = KeySource::Path(path.into());
        self
    }

    /// Set the key source.
    pub fn key_source(mut self, source: KeySource) -> Self {
        self.key_source = source;
        self
    }

    /// Set the endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Skip server identity verification.
    pub fn insecure_skip_verify(mut self, skip: bool) -> Self {
        self.session.insecure_skip_verify = skip;
        self
    }

    /// Request a connection id (on by default).
    pub fn connection_id(mut self, enabled: bool) -> Self {
        self.session.connection_id = enabled;
        self
    }

    /// Pin the SHA-256 fingerprint of the server's DTLS certificate.
    pub fn server_certificate(mut self, fingerprint: [u8; 32]) -> Self {
        self.session.server_certificate = Some(fingerprint);
        self
    }

    /// Pin the server's static key (Noise binding).
    pub fn server_public_key(mut self, key: [u8; 32]) -> Self {
        self.session.server_public_key = Some(key);
        self
    }

    /// Set the per-phase deadline.
    pub fn phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    /// Set the close deadline.
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<ClientConfig, CredentialError> {
        let identity = DeviceIdentity::new(self.device_id.unwrap_or_default())?;
        Ok(ClientConfig {
            identity,
            key_source: self.key_source,
            endpoint: self.endpoint,
            session: self.session,
            phase_timeout: self.phase_timeout,
            close_timeout: self.close_timeout,
        })
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
