//! Transport layer error types.
//!
//! Inbound frames of the Noise binding that fail parsing, authentication or
//! the replay check are dropped without a reply;
//! [`TransportError::is_silent_drop`] identifies them.

use std::io;

use thiserror::Error;

#[cfg(feature = "noise")]
use super::frame::FrameError;
use crate::coap::MessageError;
use crate::core::CryptoError;

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint could not be resolved.
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        /// `host:port` as configured.
        endpoint: String,
        /// Resolver error.
        #[source]
        source: io::Error,
    },

    /// The endpoint resolved to no addresses.
    #[error("{0} resolved to no addresses")]
    NoAddress(String),

    /// I/O error (socket operations).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Frame parsing error.
    #[cfg(feature = "noise")]
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// DTLS handshake or record layer failure.
    #[cfg(feature = "dtls")]
    #[error("DTLS error: {0}")]
    Dtls(#[from] webrtc_dtls::Error),

    /// Handshake, verification or AEAD failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Frame for a different connection id.
    #[error("unknown connection id")]
    UnknownConnection,

    /// The peer closed the channel.
    #[error("channel closed by peer")]
    ClosedByPeer,

    /// The session was already closed locally.
    #[error("session closed")]
    SessionClosed,

    /// Malformed or unencodable CoAP message.
    #[error("CoAP message error: {0}")]
    Message(#[from] MessageError),

    /// The peer rejected our message with a CoAP Reset.
    #[error("request {message_id} reset by peer")]
    Reset {
        /// Message id of the rejected request.
        message_id: u16,
    },

    /// A block-wise response grew past the body limit.
    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge {
        /// Configured limit.
        limit: usize,
    },

    /// A Block2 continuation did not carry the requested block.
    #[error("expected block {expected}, got {actual:?}")]
    BlockOutOfOrder {
        /// Requested block number.
        expected: u32,
        /// Block number received, if any.
        actual: Option<u32>,
    },
}

impl TransportError {
    /// Check if this error should result in silent drop (no response sent).
    pub fn is_silent_drop(&self) -> bool {
        #[cfg(feature = "noise")]
        if matches!(self, TransportError::Frame(_)) {
            return true;
        }
        matches!(
            self,
            TransportError::UnknownConnection
                | TransportError::Crypto(CryptoError::DecryptionFailed)
                | TransportError::Crypto(CryptoError::ReplayDetected)
        )
    }

    /// Check if this error is fatal to the channel.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::Io(_)
                | TransportError::ClosedByPeer
                | TransportError::SessionClosed
                | TransportError::Crypto(CryptoError::CounterExhaustion)
        )
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
