//! Protocol constants for the device session.
//!
//! Paths and content formats are fixed by the ingestion endpoint and MUST NOT
//! be changed; timing values are defaults that configuration may override.

use std::time::Duration;

// =============================================================================
// ENDPOINT
// =============================================================================

/// Default ingestion endpoint (`host:port`).
pub const DEFAULT_ENDPOINT: &str = "coap.nrfcloud.com:5684";

/// Authentication resource; body is the signed token.
pub const AUTH_PATH: &str = "/auth/jwt";

/// Device state resource.
pub const STATE_PATH: &str = "/state";

/// Raw device-to-cloud telemetry resource.
pub const PUBLISH_PATH: &str = "/msg/d2c/raw";

// =============================================================================
// TIMING
// =============================================================================

/// Deadline applied to every network-facing phase.
pub const PHASE_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline applied to session teardown.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Validity window of an authentication token, in minutes.
pub const TOKEN_VALIDITY_MINUTES: i64 = 10;

// =============================================================================
// CREDENTIALS
// =============================================================================

/// Directory searched for `<device id>.key` when no explicit path is given.
pub const DEFAULT_KEY_DIR: &str = "certificates";

/// Extension of conventionally located key files.
pub const KEY_FILE_EXTENSION: &str = "key";

// =============================================================================
// SECURE DATAGRAM TRANSPORT
// =============================================================================

/// Noise pattern of the loopback channel (`noise` feature).
///
/// NX authenticates the responder only; the device authenticates itself with
/// its token once the channel is up.
pub const NOISE_PATTERN: &str = "Noise_NX_25519_ChaChaPoly_BLAKE2s";

/// Secure channel wire version.
pub const PROTOCOL_VERSION: u16 = 0x0001;

/// X25519 public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Connection identifier size (48-bit).
pub const CONNECTION_ID_SIZE: usize = 6;

/// ChaCha20-Poly1305 tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// Largest datagram, DTLS record or Noise message.
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// Anti-replay window size in bits.
pub const REPLAY_WINDOW_SIZE: usize = 2048;

// =============================================================================
// COAP (RFC 7252 / RFC 7959)
// =============================================================================

/// CoAP protocol version.
pub const COAP_VERSION: u8 = 1;

/// Length of the token attached to each exchange.
pub const COAP_TOKEN_LENGTH: usize = 4;

/// Block size exponent used when requesting Block2 continuations (1024 bytes).
pub const DEFAULT_BLOCK_SZX: u8 = 6;

/// Upper bound on a reassembled response body.
pub const MAX_BODY_SIZE: usize = 1 << 20;
