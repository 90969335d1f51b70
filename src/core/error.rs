//! Leaf error types for credentials, the secure channel and telemetry.
//!
//! Transport errors live in [`crate::transport`]; the session-level taxonomy
//! that wraps all of these lives in [`crate::client`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors loading key material or producing a signed token.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The device identity is empty.
    #[error("device identity must not be empty")]
    EmptyIdentity,

    /// The device identity cannot be turned into a key file name.
    #[error("device identity {0:?} cannot be used to locate a key file")]
    UnsafeIdentity(String),

    /// No key file at the resolved location.
    #[error("signing key not found at {}", path.display())]
    KeyNotFound {
        /// Resolved key path.
        path: PathBuf,
    },

    /// The key file exists but could not be read.
    #[error("failed to read signing key at {}: {source}", path.display())]
    KeyRead {
        /// Resolved key path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The key material is not a PEM-encoded P-256 key (PKCS#8 or SEC1).
    #[error("signing key is not a PEM-encoded P-256 key: {0}")]
    InvalidKey(String),

    /// Signing the claims failed.
    #[error("token signing failed: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    /// The expiry timestamp does not fit the claim type.
    #[error("token expiry out of range")]
    ExpiryOutOfRange,
}

/// Errors in the secure channel's cryptographic layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The server's certificate or static key does not match the pin.
    #[error("server identity does not match the pinned value")]
    PeerMismatch,

    /// Verification is enabled but nothing is pinned.
    #[error("peer verification requested but no server certificate or key is pinned")]
    MissingTrustAnchor,

    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (invalid tag or corrupted).
    #[error("AEAD decryption failed (invalid tag or corrupted)")]
    DecryptionFailed,

    /// Nonce counter exhausted - session must terminate.
    #[error("nonce counter exhausted - session must terminate")]
    CounterExhaustion,

    /// Replay detected.
    #[error("replay detected")]
    ReplayDetected,

    /// Key generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// A pinned server key could not be parsed.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// A pinned certificate fingerprint could not be parsed.
    #[error("invalid certificate fingerprint: {0}")]
    InvalidFingerprint(String),
}

/// Errors decoding telemetry from its text or binary form.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The text input could not be read.
    #[error("failed to read telemetry input: {0}")]
    Io(#[from] io::Error),

    /// Malformed SenML JSON.
    #[error("malformed SenML JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed CBOR.
    #[error("malformed SenML CBOR: {0}")]
    Cbor(String),

    /// Well-formed data that is not a SenML pack.
    #[error("unexpected SenML structure: {0}")]
    Structure(String),
}

/// A pack that violates SenML record rules.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// Nothing to publish.
    #[error("pack contains no records")]
    EmptyPack,

    /// Base name + name resolves to the empty string.
    #[error("record {index}: name must not be empty")]
    EmptyName {
        /// Record position in the pack.
        index: usize,
    },

    /// Resolved name has a bad first character or a disallowed character.
    #[error("record {index}: invalid name {name:?}")]
    InvalidName {
        /// Record position in the pack.
        index: usize,
        /// Resolved name.
        name: String,
    },

    /// Neither a value nor a sum.
    #[error("record {index}: no value or sum")]
    MissingValue {
        /// Record position in the pack.
        index: usize,
    },

    /// More than one of `v`, `vs`, `vb`, `vd`.
    #[error("record {index}: more than one value field")]
    MultipleValues {
        /// Record position in the pack.
        index: usize,
    },

    /// Records disagree on the base version.
    #[error("record {index}: base version {actual} differs from {expected}")]
    VersionMismatch {
        /// Record position in the pack.
        index: usize,
        /// Version seen first.
        expected: i64,
        /// Conflicting version.
        actual: i64,
    },

    /// NaN or infinity in a numeric field.
    #[error("record {index}: {field} is not a finite number")]
    NonFinite {
        /// Record position in the pack.
        index: usize,
        /// SenML label of the offending field.
        field: &'static str,
    },
}

/// Errors serializing a pack.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// CBOR serialization failed.
    #[error("CBOR encoding failed: {0}")]
    Cbor(String),

    /// JSON serialization failed.
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Any failure turning a telemetry source into a publishable payload.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Text input could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The batch failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The normalized batch could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
}
