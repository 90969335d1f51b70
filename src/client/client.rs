//! The device protocol client.
//!
//! One run walks a fixed sequence of states:
//!
//! ```text
//! Disconnected ─connect─▶ Connected ─POST /auth/jwt─▶ Authenticated
//!      ─GET /state─▶ Ready ─POST /msg/d2c/raw─▶ Published ─close─▶ Closed
//! ```
//!
//! Any failure moves to `Error`, after which the session is still closed.
//! Each network phase is bounded by the phase deadline and aborts promptly
//! on cancellation.

use std::fmt;
use std::future::Future;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::ClientConfig;
use super::error::{ClientError, Phase};
use super::manager::{SessionGuard, SessionManager};
use crate::coap::{Code, ContentFormat, Request, Response};
use crate::core::{AUTH_PATH, PUBLISH_PATH, STATE_PATH, TelemetryError};
use crate::crypto::{AuthToken, TokenIssuer};
use crate::senml;
use crate::telemetry::TelemetrySource;
use crate::transport::{Connector, Session, TransportResult};

/// Client lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// No session.
    Disconnected,
    /// Secure session established.
    Connected,
    /// Token accepted.
    Authenticated,
    /// Server state retrieved.
    Ready,
    /// Telemetry accepted.
    Published,
    /// Session closed.
    Closed,
    /// A phase failed.
    Error,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The device's server-side state, surfaced as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerState {
    bytes: Vec<u8>,
    content_format: Option<ContentFormat>,
}

impl ServerState {
    fn from_response(response: Response) -> Self {
        Self {
            bytes: response.payload,
            content_format: response.content_format,
        }
    }

    /// Raw body.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Content-Format reported by the server.
    pub fn content_format(&self) -> Option<ContentFormat> {
        self.content_format
    }

    /// Body length.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the body is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Take the body.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Outcome of a successful run.
#[derive(Debug)]
pub struct SessionReport {
    /// State fetched from `/state`.
    pub server_state: ServerState,
    /// Records published after normalization.
    pub records: usize,
    /// Size of the CBOR payload.
    pub payload_len: usize,
    /// Teardown failure after a successful publish, if any.
    pub close_error: Option<ClientError>,
}

/// Runs device sessions.
pub struct DeviceClient<C: Connector> {
    config: ClientConfig,
    manager: SessionManager<C>,
    issuer: TokenIssuer,
    cancel: CancellationToken,
    state: DeviceState,
    history: Vec<DeviceState>,
}

#[cfg(feature = "dtls")]
impl DeviceClient<crate::transport::DtlsConnector> {
    /// Client speaking CoAP over DTLS.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, crate::transport::DtlsConnector::new())
    }
}

impl<C: Connector> DeviceClient<C> {
    /// Client using a custom connector.
    pub fn with_connector(config: ClientConfig, connector: C) -> Self {
        let manager = SessionManager::new(
            connector,
            config.endpoint.clone(),
            config.session.clone(),
            config.close_timeout,
        );
        Self {
            config,
            manager,
            issuer: TokenIssuer::new(),
            cancel: CancellationToken::new(),
            state: DeviceState::Disconnected,
            history: vec![DeviceState::Disconnected],
        }
    }

    /// Abort in-flight phases when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// States visited by the last run, in order.
    pub fn history(&self) -> &[DeviceState] {
        &self.history
    }

    /// Load the key, issue a token and run a session.
    ///
    /// Credentials are resolved before any network activity.
    pub async fn simulate<S>(&mut self, source: &mut S) -> Result<SessionReport, ClientError>
    where
        S: TelemetrySource + ?Sized,
    {
        let identity = &self.config.identity;
        let key = self.config.key_source.load(identity).await?;
        let token = self.issuer.issue(identity.as_str(), &key, Utc::now())?;
        drop(key);

        info!(
            subject = token.subject(),
            expires_at = %token.expires_at(),
            "issued auth token"
        );

        self.run_with_token(token, source).await
    }

    /// Run a session with an already issued token.
    pub async fn run_with_token<S>(
        &mut self,
        token: AuthToken,
        source: &mut S,
    ) -> Result<SessionReport, ClientError>
    where
        S: TelemetrySource + ?Sized,
    {
        self.state = DeviceState::Disconnected;
        self.history = vec![DeviceState::Disconnected];

        info!(endpoint = %self.config.endpoint, "connecting");
        let mut guard = match self.bounded(Phase::Connect, self.manager.connect()).await {
            Ok(guard) => guard,
            Err(e) => {
                self.transition(DeviceState::Error);
                return Err(e);
            }
        };
        self.transition(DeviceState::Connected);

        let result = self.drive(&mut guard, token, source).await;
        if let Err(e) = &result {
            warn!(phase = %e.phase(), error = %e, "session failed");
            self.transition(DeviceState::Error);
        }

        let closed = guard.close().await;
        self.transition(DeviceState::Closed);

        match (result, closed) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(mut report), Err(close_error)) => {
                warn!(error = %close_error, "close failed after publish");
                report.close_error = Some(close_error);
                Ok(report)
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_error)) => {
                warn!(error = %close_error, "close failed");
                Err(e)
            }
        }
    }

    async fn drive<X, S>(
        &mut self,
        guard: &mut SessionGuard<X>,
        token: AuthToken,
        source: &mut S,
    ) -> Result<SessionReport, ClientError>
    where
        X: Session,
        S: TelemetrySource + ?Sized,
    {
        // Authenticate
        let request = Request::post(AUTH_PATH, ContentFormat::TEXT_PLAIN, token.into_body());
        let response = self.bounded(Phase::Authenticate, guard.exchange(request)).await?;
        if response.code != Code::CREATED {
            return Err(ClientError::Auth {
                status: response.code,
                body: response.body_text(),
            });
        }
        debug!(max_age = ?response.max_age, body = %response.body_text(), "authenticated");
        self.transition(DeviceState::Authenticated);

        // Fetch state
        let response = self
            .bounded(Phase::FetchState, guard.exchange(Request::get(STATE_PATH)))
            .await?;
        if response.code != Code::CONTENT {
            return Err(ClientError::Protocol {
                status: response.code,
                body: response.body_text(),
            });
        }
        let server_state = ServerState::from_response(response);
        info!(bytes = server_state.len(), "fetched device state");
        debug!(state = %String::from_utf8_lossy(server_state.as_bytes()), "device state");
        self.transition(DeviceState::Ready);

        // Publish
        let pack = source.produce()?;
        let normalized = pack.normalize().map_err(TelemetryError::from)?;
        let payload = senml::encode_cbor(normalized.pack()).map_err(TelemetryError::from)?;
        let records = normalized.records().len();
        let payload_len = payload.len();
        debug!(records, payload = %hex::encode(&payload), "encoded telemetry");

        let request = Request::post(PUBLISH_PATH, ContentFormat::CBOR, payload);
        let response = self.bounded(Phase::Publish, guard.exchange(request)).await?;
        if response.code != Code::CREATED {
            return Err(ClientError::Publish {
                status: response.code,
                body: response.body_text(),
            });
        }
        info!(records, bytes = payload_len, "published telemetry");
        self.transition(DeviceState::Published);

        Ok(SessionReport {
            server_state,
            records,
            payload_len,
            close_error: None,
        })
    }

    /// Apply the phase deadline and cancellation to a transport future.
    async fn bounded<T, F>(&self, phase: Phase, future: F) -> Result<T, ClientError>
    where
        F: Future<Output = TransportResult<T>>,
    {
        let after = self.config.phase_timeout;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ClientError::Cancelled { phase }),
            result = tokio::time::timeout(after, future) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(source)) => Err(ClientError::Transport { phase, source }),
                Err(_) => Err(ClientError::Timeout { phase, after }),
            },
        }
    }

    fn transition(&mut self, next: DeviceState) {
        debug!(from = %self.state, to = %next, "state transition");
        self.state = next;
        self.history.push(next);
    }
}
