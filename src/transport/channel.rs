//! Noise-secured UDP channel.
//!
//! The device sends `HandshakeInit`, waits for `HandshakeResp`, then
//! exchanges Data frames carrying CoAP messages. Every frame has its own
//! nonce, so loss and reordering never desynchronize the ciphers.

use std::net::SocketAddr;

use async_trait::async_trait;
use snow::StatelessTransportState;
use tokio::net::UdpSocket;
use tracing::{debug, info, trace};

use super::error::{TransportError, TransportResult};
use super::frame::{
    ConnectionId, DataFrameHeader, FrameError, FrameFlags, FrameType, HandshakeInit,
    HandshakeResp, parse_frame_header, sealed_len, sizes,
};
use super::replay::NonceWindow;
use super::traits::{DatagramLink, SessionConfig};
use super::udp;
use crate::core::{CryptoError, MAX_DATAGRAM_SIZE, PROTOCOL_VERSION, PUBLIC_KEY_SIZE};
use crate::crypto::noise::{self, InitiatorHandshake, PeerVerification};

/// What an authenticated inbound frame carried.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// Application payload.
    Data(Vec<u8>),
    /// The peer is closing.
    Close,
}

/// Seal `payload` into a complete Data/Close frame.
pub fn seal_frame(
    transport: &StatelessTransportState,
    header: DataFrameHeader,
    payload: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let clear = header.to_bytes();
    let mut plaintext = Vec::with_capacity(clear.len() + payload.len());
    plaintext.extend_from_slice(&clear);
    plaintext.extend_from_slice(payload);

    let ciphertext = noise::seal(transport, header.nonce, &plaintext)?;
    let mut frame = Vec::with_capacity(clear.len() + sealed_len(payload.len()));
    frame.extend_from_slice(&clear);
    frame.extend_from_slice(&ciphertext);
    Ok(frame)
}

/// Authenticate and decrypt a Data/Close frame.
///
/// Returns the header and payload. Replay checking is left to the caller.
pub fn open_frame(
    transport: &StatelessTransportState,
    datagram: &[u8],
) -> TransportResult<(DataFrameHeader, Vec<u8>)> {
    let header = parse_frame_header(datagram)?;
    let mut plaintext = noise::open(
        transport,
        header.nonce,
        &datagram[sizes::DATA_FRAME_HEADER_SIZE..],
    )?;

    if plaintext.len() < sizes::DATA_FRAME_HEADER_SIZE
        || plaintext[..sizes::DATA_FRAME_HEADER_SIZE] != datagram[..sizes::DATA_FRAME_HEADER_SIZE]
    {
        return Err(FrameError::HeaderMismatch.into());
    }
    let payload = plaintext.split_off(sizes::DATA_FRAME_HEADER_SIZE);
    Ok((header, payload))
}

/// A connected, Noise-secured UDP channel to one server.
pub struct SecureChannel {
    socket: UdpSocket,
    peer: SocketAddr,
    transport: StatelessTransportState,
    remote_static: [u8; PUBLIC_KEY_SIZE],
    connection_id: Option<ConnectionId>,
    send_nonce: u64,
    window: NonceWindow,
    closed: bool,
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("peer", &self.peer)
            .field("connection_id", &self.connection_id)
            .field("send_nonce", &self.send_nonce)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl SecureChannel {
    /// Resolve `endpoint` and run the handshake.
    ///
    /// Handshake responses that fail to parse are ignored; the caller bounds
    /// the wait.
    pub async fn connect(endpoint: &str, config: &SessionConfig) -> TransportResult<Self> {
        let verification = if config.insecure_skip_verify {
            PeerVerification::Skip
        } else {
            PeerVerification::Pinned(
                config
                    .server_public_key
                    .ok_or(CryptoError::MissingTrustAnchor)?,
            )
        };

        let (socket, peer) = udp::connect(endpoint).await?;

        let mut initiator = InitiatorHandshake::new(verification)?;
        let init = HandshakeInit {
            flags: if config.connection_id {
                FrameFlags::CONNECTION_ID
            } else {
                FrameFlags::NONE
            },
            version: PROTOCOL_VERSION,
            noise: initiator.write_message(&[])?,
        };
        socket.send(&init.encode()).await?;

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let resp = loop {
            let len = socket.recv(&mut buf).await?;
            match HandshakeResp::decode(&buf[..len]) {
                Ok(resp) => break resp,
                Err(e) => trace!(error = %e, "dropping datagram during handshake"),
            }
        };

        let (_, established) = initiator.read_message(&resp.noise)?;

        let connection_id = if resp.flags.has_connection_id() {
            Some(resp.connection_id)
        } else {
            if config.connection_id {
                info!("server did not grant a connection id");
            }
            None
        };

        debug!(
            %peer,
            connection_id = ?connection_id.map(|id| id.to_string()),
            "secure channel established"
        );

        Ok(Self {
            socket,
            peer,
            transport: established.transport,
            remote_static: established.remote_static,
            connection_id,
            send_nonce: 0,
            window: NonceWindow::new(),
            closed: false,
        })
    }

    /// Server address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Negotiated connection id, if any.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id
    }

    /// Server static key presented during the handshake.
    pub fn remote_static(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.remote_static
    }

    /// Whether the channel has been closed by either side.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn next_nonce(&mut self) -> TransportResult<u64> {
        // snow reserves u64::MAX
        let nonce = self
            .send_nonce
            .checked_add(1)
            .filter(|n| *n < u64::MAX)
            .ok_or(CryptoError::CounterExhaustion)?;
        self.send_nonce = nonce;
        Ok(nonce)
    }

    fn seal(&mut self, frame_type: FrameType, payload: &[u8]) -> TransportResult<Vec<u8>> {
        let nonce = self.next_nonce()?;
        let header = match frame_type {
            FrameType::Close => DataFrameHeader::close(self.connection_id, nonce),
            _ => DataFrameHeader::data(self.connection_id, nonce),
        };
        Ok(seal_frame(&self.transport, header, payload)?)
    }

    /// Authenticate one inbound datagram.
    pub fn open(&mut self, datagram: &[u8]) -> TransportResult<Inbound> {
        let header = parse_frame_header(datagram)?;
        if let Some(id) = self.connection_id {
            if header.connection_id != id {
                return Err(TransportError::UnknownConnection);
            }
        }
        if !self.window.check(header.nonce) {
            return Err(CryptoError::ReplayDetected.into());
        }

        let (header, payload) = open_frame(&self.transport, datagram)?;
        self.window.check_and_mark(header.nonce);

        match header.frame_type {
            FrameType::Close => Ok(Inbound::Close),
            _ => Ok(Inbound::Data(payload)),
        }
    }
}

#[async_trait]
impl DatagramLink for SecureChannel {
    async fn send(&mut self, payload: &[u8]) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::SessionClosed);
        }
        let frame = self.seal(FrameType::Data, payload)?;
        self.socket.send(&frame).await?;
        Ok(())
    }

    async fn recv(&mut self) -> TransportResult<Vec<u8>> {
        if self.closed {
            return Err(TransportError::SessionClosed);
        }
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let len = self.socket.recv(&mut buf).await?;
            match self.open(&buf[..len]) {
                Ok(Inbound::Data(payload)) => return Ok(payload),
                Ok(Inbound::Close) => {
                    self.closed = true;
                    return Err(TransportError::ClosedByPeer);
                }
                Err(e) if e.is_silent_drop() => {
                    trace!(error = %e, len, "dropping inbound frame");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn close(&mut self) -> TransportResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let frame = self.seal(FrameType::Close, &[])?;
        self.socket.send(&frame).await?;
        debug!(peer = %self.peer, "secure channel closed");
        Ok(())
    }
}

impl Drop for SecureChannel {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Best effort: never block in drop.
        if let Ok(frame) = self.seal(FrameType::Close, &[]) {
            let _ = self.socket.try_send(&frame);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crypto::StaticKeypair;
    use crate::crypto::noise::ResponderHandshake;

    /// Loopback server: completes the handshake, then echoes each Data
    /// payload back (twice when `replay` is set) until it sees Close.
    pub(crate) async fn spawn_echo(keypair: StaticKeypair, replay: bool) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            let init = HandshakeInit::decode(&buf[..len]).unwrap();
            assert_eq!(init.version, PROTOCOL_VERSION);

            let mut responder = ResponderHandshake::new(&keypair).unwrap();
            responder.read_message(&init.noise).unwrap();
            let (noise, transport) = responder.write_message(&[]).unwrap();

            let connection_id = init.flags.has_connection_id().then(ConnectionId::generate);
            let resp = HandshakeResp {
                flags: init.flags,
                connection_id: connection_id.unwrap_or_default(),
                noise,
            };
            socket.send_to(&resp.encode(), peer).await.unwrap();

            let mut nonce = 0;
            loop {
                let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
                let (header, payload) = open_frame(&transport, &buf[..len]).unwrap();
                if header.frame_type == FrameType::Close {
                    break;
                }
                nonce += 1;
                let frame =
                    seal_frame(&transport, DataFrameHeader::data(connection_id, nonce), &payload)
                        .unwrap();
                socket.send_to(&frame, peer).await.unwrap();
                if replay {
                    socket.send_to(&frame, peer).await.unwrap();
                }
            }
        });

        addr
    }

    fn pinned(keypair: &StaticKeypair) -> SessionConfig {
        SessionConfig {
            server_public_key: Some(*keypair.public_key()),
            ..SessionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_pinned_handshake_and_echo() {
        let server = StaticKeypair::generate().unwrap();
        let config = SessionConfig {
            connection_id: true,
            ..pinned(&server)
        };
        let addr = spawn_echo(server.clone(), false).await;

        let mut channel = SecureChannel::connect(&addr.to_string(), &config).await.unwrap();
        assert_eq!(channel.remote_static(), server.public_key());
        assert!(channel.connection_id().is_some());

        channel.send(b"ping").await.unwrap();
        assert_eq!(channel.recv().await.unwrap(), b"ping");

        channel.close().await.unwrap();
        assert!(channel.is_closed());
        assert!(matches!(
            channel.send(b"late").await,
            Err(TransportError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_mismatched_pin_fails() {
        let server = StaticKeypair::generate().unwrap();
        let other = StaticKeypair::generate().unwrap();
        let addr = spawn_echo(server, false).await;

        let result = SecureChannel::connect(&addr.to_string(), &pinned(&other)).await;
        assert!(matches!(
            result,
            Err(TransportError::Crypto(CryptoError::PeerMismatch))
        ));
    }

    #[tokio::test]
    async fn test_verification_without_pin_fails_before_io() {
        let result = SecureChannel::connect("127.0.0.1:9", &SessionConfig::default()).await;
        assert!(matches!(
            result,
            Err(TransportError::Crypto(CryptoError::MissingTrustAnchor))
        ));
    }

    #[tokio::test]
    async fn test_skip_verification() {
        let server = StaticKeypair::generate().unwrap();
        let addr = spawn_echo(server, false).await;
        let config = SessionConfig {
            insecure_skip_verify: true,
            ..SessionConfig::default()
        };

        let mut channel = SecureChannel::connect(&addr.to_string(), &config).await.unwrap();
        assert_eq!(channel.connection_id(), None);
        channel.send(b"x").await.unwrap();
        assert_eq!(channel.recv().await.unwrap(), b"x");
        channel.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_replayed_frames_are_dropped() {
        let server = StaticKeypair::generate().unwrap();
        let addr = spawn_echo(server.clone(), true).await;

        let mut channel = SecureChannel::connect(&addr.to_string(), &pinned(&server))
            .await
            .unwrap();

        channel.send(b"one").await.unwrap();
        assert_eq!(channel.recv().await.unwrap(), b"one");

        // The duplicate of "one" is already queued and must be skipped
        channel.send(b"two").await.unwrap();
        assert_eq!(channel.recv().await.unwrap(), b"two");

        channel.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unresolvable_endpoint() {
        let result = SecureChannel::connect(
            "no-such-host.invalid:5684",
            &SessionConfig {
                insecure_skip_verify: true,
                ..SessionConfig::default()
            },
        )
        .await;
        assert!(matches!(result, Err(TransportError::Resolve { .. })));
    }
}
