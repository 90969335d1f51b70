//! Session-level error taxonomy.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::coap::Code;
use crate::core::{CredentialError, TelemetryError};
use crate::transport::TransportError;

/// Step of a device session, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Loading the key and issuing the token.
    Credentials,
    /// Establishing the secure session.
    Connect,
    /// `POST /auth/jwt`.
    Authenticate,
    /// `GET /state`.
    FetchState,
    /// `POST /msg/d2c/raw`.
    Publish,
    /// Tearing the session down.
    Close,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Credentials => "credentials",
            Self::Connect => "connect",
            Self::Authenticate => "authenticate",
            Self::FetchState => "state fetch",
            Self::Publish => "publish",
            Self::Close => "close",
        })
    }
}

/// Why a device session failed. Every variant is fatal for the run.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Key could not be loaded or the token could not be signed.
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// The transport failed during a phase.
    #[error("transport error during {phase}: {source}")]
    Transport {
        /// Phase in flight.
        phase: Phase,
        /// Underlying error.
        #[source]
        source: TransportError,
    },

    /// A phase exceeded its deadline.
    #[error("{phase} timed out after {after:?}")]
    Timeout {
        /// Phase in flight.
        phase: Phase,
        /// Deadline that expired.
        after: Duration,
    },

    /// The run was cancelled.
    #[error("{phase} cancelled")]
    Cancelled {
        /// Phase in flight.
        phase: Phase,
    },

    /// The server rejected the token.
    #[error("authentication failed: expected {}, got {status}{}", Code::CREATED, body_suffix(.body))]
    Auth {
        /// Response code received.
        status: Code,
        /// Response body, lossy UTF-8.
        body: String,
    },

    /// The state fetch did not return content.
    #[error("state fetch failed: expected {}, got {status}{}", Code::CONTENT, body_suffix(.body))]
    Protocol {
        /// Response code received.
        status: Code,
        /// Response body, lossy UTF-8.
        body: String,
    },

    /// The server did not accept the telemetry.
    #[error("publish failed: expected {}, got {status}{}", Code::CREATED, body_suffix(.body))]
    Publish {
        /// Response code received.
        status: Code,
        /// Response body, lossy UTF-8.
        body: String,
    },

    /// Telemetry could not be decoded, validated or encoded. Nothing was
    /// sent.
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}

/// `: <body>` for a non-empty response body.
fn body_suffix(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        String::new()
    } else {
        format!(": {body}")
    }
}

impl ClientError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Credential(_) => 2,
            Self::Transport { .. } => 3,
            Self::Timeout { .. } => 4,
            Self::Auth { .. } => 5,
            Self::Protocol { .. } => 6,
            Self::Publish { .. } => 7,
            Self::Telemetry(_) => 8,
            Self::Cancelled { .. } => 130,
        }
    }

    /// Phase the failure is attributed to.
    pub fn phase(&self) -> Phase {
        match self {
            Self::Credential(_) => Phase::Credentials,
            Self::Transport { phase, .. }
            | Self::Timeout { phase, .. }
            | Self::Cancelled { phase } => *phase,
            Self::Auth { .. } => Phase::Authenticate,
            Self::Protocol { .. } => Phase::FetchState,
            Self::Publish { .. } | Self::Telemetry(_) => Phase::Publish,
        }
    }

    /// Response code, for server rejections.
    pub fn status(&self) -> Option<Code> {
        match self {
            Self::Auth { status, .. } | Self::Protocol { status, .. } | Self::Publish { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}
