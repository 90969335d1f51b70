//! DTLS binding: CoAP over DTLS 1.2 (`coaps://`), the transport the
//! ingestion endpoint speaks.
//!
//! The handshake is run by `webrtc-dtls`. The device presents no client
//! certificate; it authenticates later with its token. The server is
//! verified by pinning the SHA-256 fingerprint of its leaf certificate, or
//! not at all when verification is skipped.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use webrtc_dtls::config::Config;
use webrtc_dtls::conn::DTLSConn;

use super::error::{TransportError, TransportResult};
use super::traits::{Connector, DatagramLink, SessionConfig};
use super::udp;
use crate::coap::CoapSession;
use crate::core::{CryptoError, MAX_DATAGRAM_SIZE};

/// SHA-256 fingerprint of a DER certificate.
pub fn certificate_fingerprint(der: &[u8]) -> [u8; 32] {
    Sha256::digest(der).into()
}

/// A connected DTLS client association.
pub struct DtlsLink {
    conn: DTLSConn,
    peer: SocketAddr,
    fingerprint: Option<[u8; 32]>,
    closed: bool,
}

impl std::fmt::Debug for DtlsLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DtlsLink")
            .field("peer", &self.peer)
            .field("fingerprint", &self.fingerprint.map(hex::encode))
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl DtlsLink {
    /// Resolve `endpoint` and complete the DTLS handshake.
    ///
    /// Retransmission of handshake flights is left to the DTLS library; the
    /// caller bounds the wait.
    pub async fn connect(endpoint: &str, config: &SessionConfig) -> TransportResult<Self> {
        let pinned = if config.insecure_skip_verify {
            None
        } else {
            Some(
                config
                    .server_certificate
                    .ok_or(CryptoError::MissingTrustAnchor)?,
            )
        };
        if config.connection_id {
            info!("DTLS connection ids are not supported by this binding; continuing without");
        }

        let (socket, peer) = udp::connect(endpoint).await?;

        let host = udp::host(endpoint);
        let dtls_config = Config {
            // Chain validation is replaced by the fingerprint check below
            insecure_skip_verify: true,
            server_name: if host.parse::<IpAddr>().is_ok() {
                String::new()
            } else {
                host.to_string()
            },
            ..Config::default()
        };

        let conn = DTLSConn::new(Arc::new(socket), dtls_config, true, None).await?;
        let state = conn.connection_state().await;
        let fingerprint = state
            .peer_certificates
            .first()
            .map(|der| certificate_fingerprint(der));

        match pinned {
            Some(expected) if fingerprint != Some(expected) => {
                let _ = conn.close().await;
                return Err(CryptoError::PeerMismatch.into());
            }
            Some(_) => debug!(%peer, "server certificate matches pinned fingerprint"),
            None => warn!(
                %peer,
                fingerprint = ?fingerprint.map(hex::encode),
                "server certificate not verified"
            ),
        }

        debug!(%peer, "DTLS association established");
        Ok(Self {
            conn,
            peer,
            fingerprint,
            closed: false,
        })
    }

    /// Server address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Fingerprint of the certificate the server presented.
    pub fn server_fingerprint(&self) -> Option<[u8; 32]> {
        self.fingerprint
    }

    /// Whether the link has been closed by either side.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

fn link_error(e: webrtc_dtls::Error) -> TransportError {
    match e {
        webrtc_dtls::Error::ErrConnClosed => TransportError::ClosedByPeer,
        e => TransportError::Dtls(e),
    }
}

#[async_trait]
impl DatagramLink for DtlsLink {
    async fn send(&mut self, payload: &[u8]) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::SessionClosed);
        }
        self.conn.write(payload, None).await.map_err(link_error)?;
        Ok(())
    }

    async fn recv(&mut self) -> TransportResult<Vec<u8>> {
        if self.closed {
            return Err(TransportError::SessionClosed);
        }
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        match self.conn.read(&mut buf, None).await {
            Ok(len) => {
                buf.truncate(len);
                Ok(buf)
            }
            Err(e) => {
                let e = link_error(e);
                if matches!(e, TransportError::ClosedByPeer) {
                    self.closed = true;
                }
                Err(e)
            }
        }
    }

    async fn close(&mut self) -> TransportResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.conn.close().await?;
        debug!(peer = %self.peer, "DTLS association closed");
        Ok(())
    }
}

/// Connects CoAP sessions over DTLS.
#[derive(Debug, Clone, Copy, Default)]
pub struct DtlsConnector;

impl DtlsConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for DtlsConnector {
    type Session = CoapSession<DtlsLink>;

    async fn connect(
        &self,
        endpoint: &str,
        config: &SessionConfig,
    ) -> TransportResult<Self::Session> {
        debug!(endpoint, ?config, "connecting");
        let link = DtlsLink::connect(endpoint, config).await?;
        Ok(CoapSession::new(link))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap::{Code, ContentFormat, Message, MessageType, Request};
    use crate::transport::Session;
    use std::time::Duration;
    use tokio::net::UdpSocket;
    use webrtc_dtls::crypto::Certificate;
    use webrtc_util::conn::{Conn, Listener};

    /// DTLS server on loopback. Answers each CON request with a piggybacked
    /// `2.05 Content` echoing the request payload.
    async fn spawn_coaps() -> (SocketAddr, [u8; 32]) {
        let certificate = Certificate::generate_self_signed(vec!["localhost".to_owned()]).unwrap();
        let fingerprint = certificate_fingerprint(certificate.certificate[0].as_ref());
        let config = Config {
            certificates: vec![certificate],
            ..Config::default()
        };

        let listener = webrtc_dtls::listener::listen("127.0.0.1:0", config)
            .await
            .unwrap();
        let addr = listener.addr().await.unwrap();

        tokio::spawn(async move {
            let (conn, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            while let Ok(len) = conn.recv(&mut buf).await {
                let Ok(request) = Message::decode(&buf[..len]) else {
                    continue;
                };
                if request.message_type != MessageType::Confirmable {
                    continue;
                }
                let mut reply = Message::new(
                    MessageType::Acknowledgement,
                    Code::CONTENT,
                    request.message_id,
                );
                reply.token = request.token.clone();
                reply.payload = request.payload.clone();
                if conn.send(&reply.encode().unwrap()).await.is_err() {
                    break;
                }
            }
        });

        (addr, fingerprint)
    }

    fn pinned(fingerprint: [u8; 32]) -> SessionConfig {
        SessionConfig {
            server_certificate: Some(fingerprint),
            ..SessionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_pinned_exchange_and_close() {
        let (addr, fingerprint) = spawn_coaps().await;

        let mut session = DtlsConnector::new()
            .connect(&addr.to_string(), &pinned(fingerprint))
            .await
            .unwrap();
        assert_eq!(session.link().server_fingerprint(), Some(fingerprint));

        let response = session
            .exchange(Request::post(
                "/auth/jwt",
                ContentFormat::TEXT_PLAIN,
                b"token".to_vec(),
            ))
            .await
            .unwrap();
        assert_eq!(response.code, Code::CONTENT);
        assert_eq!(response.payload, b"token");

        session.close().await.unwrap();
        assert!(session.link().is_closed());
    }

    #[tokio::test]
    async fn test_skip_verification_with_connection_id_requested() {
        let (addr, _) = spawn_coaps().await;
        let config = SessionConfig {
            insecure_skip_verify: true,
            connection_id: true,
            ..SessionConfig::default()
        };

        let mut link = DtlsLink::connect(&addr.to_string(), &config).await.unwrap();
        assert!(link.server_fingerprint().is_some());
        link.close().await.unwrap();
        assert!(matches!(
            link.send(b"late").await,
            Err(TransportError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_mismatched_fingerprint_fails() {
        let (addr, fingerprint) = spawn_coaps().await;
        let mut wrong = fingerprint;
        wrong[0] ^= 0xff;

        let result = DtlsLink::connect(&addr.to_string(), &pinned(wrong)).await;
        assert!(matches!(
            result,
            Err(TransportError::Crypto(CryptoError::PeerMismatch))
        ));
    }

    #[tokio::test]
    async fn test_verification_without_pin_fails_before_io() {
        let result = DtlsLink::connect("127.0.0.1:9", &SessionConfig::default()).await;
        assert!(matches!(
            result,
            Err(TransportError::Crypto(CryptoError::MissingTrustAnchor))
        ));
    }

    #[tokio::test]
    async fn test_handshake_waits_for_a_dtls_server() {
        // A peer that never answers: the handshake is bounded by the caller
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = SessionConfig {
            insecure_skip_verify: true,
            ..SessionConfig::default()
        };

        let result = tokio::time::timeout(
            Duration::from_millis(300),
            DtlsLink::connect(&silent.local_addr().unwrap().to_string(), &config),
        )
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_fingerprint_is_sha256() {
        assert_eq!(
            hex::encode(certificate_fingerprint(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
