//! Credentials and the secure channel handshake.
//!
//! - [`TokenIssuer`] signs the ES256 token presented during authentication.
//! - [`parse_fingerprint`] reads the pinned DTLS server certificate
//!   fingerprint.
//! - `noise` runs the Noise_NX handshake of the loopback binding (requires
//!   the `noise` feature).

mod keys;
#[cfg(feature = "noise")]
#[cfg_attr(docsrs, doc(cfg(feature = "noise")))]
pub mod noise;
mod token;

#[cfg(feature = "noise")]
pub use keys::StaticKeypair;
pub use keys::{SigningKey, parse_fingerprint, parse_public_key};
pub use token::{AuthToken, Claims, TokenIssuer};
