//! Noise_NX handshake for the secure datagram channel.
//!
//! ```text
//! Noise_NX(rs):
//!   -> e                    # Initiator sends ephemeral
//!   <- e, ee, s, es         # Responder sends ephemeral + encrypted static
//! ```
//!
//! Only the responder is authenticated. The initiator checks the responder's
//! static key against a pinned key unless verification is skipped. Both sides
//! then switch to stateless transport mode, where every frame carries its
//! own nonce.

use snow::params::NoiseParams;
use snow::{Builder, HandshakeState, StatelessTransportState};
use tracing::warn;

use super::keys::StaticKeypair;
use crate::core::{CryptoError, MAX_DATAGRAM_SIZE, NOISE_PATTERN, PUBLIC_KEY_SIZE};

pub(crate) fn params() -> Result<NoiseParams, CryptoError> {
    NOISE_PATTERN
        .parse()
        .map_err(|e: snow::Error| CryptoError::HandshakeFailed(e.to_string()))
}

fn handshake_error(e: snow::Error) -> CryptoError {
    CryptoError::HandshakeFailed(e.to_string())
}

/// How the initiator treats the responder's static key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerVerification {
    /// Require the key to equal this value.
    Pinned([u8; PUBLIC_KEY_SIZE]),
    /// Accept any key.
    Skip,
}

/// Keys and peer identity produced by a completed handshake.
pub struct Established {
    /// Transport cipher state, nonces supplied per frame.
    pub transport: StatelessTransportState,
    /// Responder's static public key.
    pub remote_static: [u8; PUBLIC_KEY_SIZE],
}

/// Handshake state machine for the initiator (device).
pub struct InitiatorHandshake {
    state: HandshakeState,
    verification: PeerVerification,
}

impl InitiatorHandshake {
    /// Create a new initiator handshake.
    pub fn new(verification: PeerVerification) -> Result<Self, CryptoError> {
        let state = Builder::new(params()?)
            .build_initiator()
            .map_err(handshake_error)?;

        Ok(Self {
            state,
            verification,
        })
    }

    /// Generate the first handshake message (-> e).
    pub fn write_message(&mut self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let len = self
            .state
            .write_message(payload, &mut buf)
            .map_err(handshake_error)?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Process the response (<- e, ee, s, es) and verify the responder.
    pub fn read_message(mut self, message: &[u8]) -> Result<(Vec<u8>, Established), CryptoError> {
        let mut payload = vec![0u8; MAX_DATAGRAM_SIZE];
        let len = self
            .state
            .read_message(message, &mut payload)
            .map_err(handshake_error)?;
        payload.truncate(len);

        let remote_static = remote_static(&self.state)?;
        match self.verification {
            PeerVerification::Pinned(expected) if expected != remote_static => {
                return Err(CryptoError::PeerMismatch);
            }
            PeerVerification::Pinned(_) => {}
            PeerVerification::Skip => {
                warn!(
                    server_key = %hex::encode(remote_static),
                    "server identity not verified"
                );
            }
        }

        let transport = self
            .state
            .into_stateless_transport_mode()
            .map_err(handshake_error)?;

        Ok((
            payload,
            Established {
                transport,
                remote_static,
            },
        ))
    }
}

/// Handshake state machine for the responder (server) side, for loopback
/// endpoints of the Noise binding.
pub struct ResponderHandshake {
    state: HandshakeState,
}

impl ResponderHandshake {
    /// Create a new responder handshake.
    pub fn new(local_keypair: &StaticKeypair) -> Result<Self, CryptoError> {
        let state = Builder::new(params()?)
            .local_private_key(local_keypair.private_key())
            .build_responder()
            .map_err(handshake_error)?;

        Ok(Self { state })
    }

    /// Process the initiator's message (-> e).
    pub fn read_message(&mut self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut payload = vec![0u8; MAX_DATAGRAM_SIZE];
        let len = self
            .state
            .read_message(message, &mut payload)
            .map_err(handshake_error)?;
        payload.truncate(len);
        Ok(payload)
    }

    /// Generate the response (<- e, ee, s, es) and switch to transport mode.
    pub fn write_message(
        mut self,
        payload: &[u8],
    ) -> Result<(Vec<u8>, StatelessTransportState), CryptoError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let len = self
            .state
            .write_message(payload, &mut buf)
            .map_err(handshake_error)?;
        buf.truncate(len);

        let transport = self
            .state
            .into_stateless_transport_mode()
            .map_err(handshake_error)?;

        Ok((buf, transport))
    }
}

fn remote_static(state: &HandshakeState) -> Result<[u8; PUBLIC_KEY_SIZE], CryptoError> {
    let key = state
        .get_remote_static()
        .ok_or_else(|| CryptoError::HandshakeFailed("no remote static key".into()))?;
    <[u8; PUBLIC_KEY_SIZE]>::try_from(key)
        .map_err(|_| CryptoError::HandshakeFailed("remote static key has wrong size".into()))
}

/// Encrypt `plaintext` under `nonce`.
pub fn seal(
    transport: &StatelessTransportState,
    nonce: u64,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let mut buf = vec![0u8; plaintext.len() + crate::core::AEAD_TAG_SIZE];
    let len = transport
        .write_message(nonce, plaintext, &mut buf)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    buf.truncate(len);
    Ok(buf)
}

/// Decrypt and authenticate `ciphertext` under `nonce`.
pub fn open(
    transport: &StatelessTransportState,
    nonce: u64,
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let mut buf = vec![0u8; ciphertext.len()];
    let len = transport
        .read_message(nonce, ciphertext, &mut buf)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    buf.truncate(len);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake(
        server: &StaticKeypair,
        verification: PeerVerification,
    ) -> Result<(Established, StatelessTransportState), CryptoError> {
        let mut initiator = InitiatorHandshake::new(verification)?;
        let mut responder = ResponderHandshake::new(server)?;

        let msg1 = initiator.write_message(&[])?;
        responder.read_message(&msg1)?;
        let (msg2, server_transport) = responder.write_message(b"cid")?;
        let (payload, established) = initiator.read_message(&msg2)?;
        assert_eq!(payload, b"cid");

        Ok((established, server_transport))
    }

    #[test]
    fn test_handshake_with_pinned_key() {
        let server = StaticKeypair::generate().unwrap();
        let (client, server_transport) =
            handshake(&server, PeerVerification::Pinned(*server.public_key())).unwrap();
        assert_eq!(&client.remote_static, server.public_key());

        let sealed = seal(&client.transport, 1, b"hello").unwrap();
        assert_eq!(open(&server_transport, 1, &sealed).unwrap(), b"hello");

        let sealed = seal(&server_transport, 1, b"world").unwrap();
        assert_eq!(open(&client.transport, 1, &sealed).unwrap(), b"world");
    }

    #[test]
    fn test_handshake_rejects_wrong_pin() {
        let server = StaticKeypair::generate().unwrap();
        let other = StaticKeypair::generate().unwrap();
        let result = handshake(&server, PeerVerification::Pinned(*other.public_key()));
        assert!(matches!(result, Err(CryptoError::PeerMismatch)));
    }

    #[test]
    fn test_handshake_skip_verification() {
        let server = StaticKeypair::generate().unwrap();
        let (client, _) = handshake(&server, PeerVerification::Skip).unwrap();
        assert_eq!(&client.remote_static, server.public_key());
    }

    #[test]
    fn test_open_rejects_wrong_nonce_and_tamper() {
        let server = StaticKeypair::generate().unwrap();
        let (client, server_transport) = handshake(&server, PeerVerification::Skip).unwrap();

        let mut sealed = seal(&client.transport, 7, b"payload").unwrap();
        assert!(matches!(
            open(&server_transport, 8, &sealed),
            Err(CryptoError::DecryptionFailed)
        ));

        sealed[0] ^= 0xff;
        assert!(matches!(
            open(&server_transport, 7, &sealed),
            Err(CryptoError::DecryptionFailed)
        ));
    }
}
