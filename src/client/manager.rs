//! Secure session lifecycle.
//!
//! [`SessionManager::connect`] hands out a [`SessionGuard`] that the client
//! owns for the whole run. [`SessionGuard::close`] consumes the guard, so a
//! session is closed at most once; a guard dropped without closing is logged.

use std::time::Duration;

use tracing::{debug, warn};

use super::error::{ClientError, Phase};
use crate::coap::{Request, Response};
use crate::transport::{Connector, Session, SessionConfig, TransportResult};

/// Establishes sessions against one endpoint.
#[derive(Debug)]
pub struct SessionManager<C> {
    connector: C,
    endpoint: String,
    config: SessionConfig,
    close_timeout: Duration,
}

impl<C: Connector> SessionManager<C> {
    /// Create a manager.
    pub fn new(
        connector: C,
        endpoint: impl Into<String>,
        config: SessionConfig,
        close_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            endpoint: endpoint.into(),
            config,
            close_timeout,
        }
    }

    /// Endpoint sessions connect to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Connect. The caller applies the deadline.
    pub async fn connect(&self) -> TransportResult<SessionGuard<C::Session>> {
        let session = self.connector.connect(&self.endpoint, &self.config).await?;
        debug!(endpoint = %self.endpoint, "session established");
        Ok(SessionGuard {
            session,
            close_timeout: self.close_timeout,
            closed: false,
        })
    }
}

/// Exclusive handle on one live session.
pub struct SessionGuard<S: Session> {
    session: S,
    close_timeout: Duration,
    closed: bool,
}

impl<S: Session> SessionGuard<S> {
    /// Run one request/response exchange.
    pub async fn exchange(&mut self, request: Request) -> TransportResult<Response> {
        self.session.exchange(request).await
    }

    /// Close the session, bounded by the close deadline.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.closed = true;
        match tokio::time::timeout(self.close_timeout, self.session.close()).await {
            Ok(Ok(())) => {
                debug!("session closed");
                Ok(())
            }
            Ok(Err(source)) => Err(ClientError::Transport {
                phase: Phase::Close,
                source,
            }),
            Err(_) => Err(ClientError::Timeout {
                phase: Phase::Close,
                after: self.close_timeout,
            }),
        }
    }
}

impl<S: Session> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        if !self.closed {
            warn!("session dropped without close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap::Code;
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSession {
        closes: Arc<AtomicUsize>,
        hang_on_close: bool,
    }

    #[async_trait]
    impl Session for StubSession {
        async fn exchange(&mut self, _request: Request) -> TransportResult<Response> {
            Ok(Response::new(Code::CONTENT, b"ok".to_vec()))
        }

        async fn close(&mut self) -> TransportResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.hang_on_close {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    struct StubConnector {
        closes: Arc<AtomicUsize>,
        hang_on_close: bool,
        fail: bool,
    }

    #[async_trait]
    impl Connector for StubConnector {
        type Session = StubSession;

        async fn connect(
            &self,
            endpoint: &str,
            _config: &SessionConfig,
        ) -> TransportResult<StubSession> {
            if self.fail {
                return Err(TransportError::NoAddress(endpoint.to_string()));
            }
            Ok(StubSession {
                closes: self.closes.clone(),
                hang_on_close: self.hang_on_close,
            })
        }
    }

    fn manager(hang_on_close: bool, fail: bool) -> (SessionManager<StubConnector>, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let connector = StubConnector {
            closes: closes.clone(),
            hang_on_close,
            fail,
        };
        (
            SessionManager::new(
                connector,
                "localhost:5684",
                SessionConfig::default(),
                Duration::from_secs(5),
            ),
            closes,
        )
    }

    #[tokio::test]
    async fn test_guard_exchange_and_close() {
        let (manager, closes) = manager(false, false);
        let mut guard = manager.connect().await.unwrap();

        let response = guard.exchange(Request::get("/state")).await.unwrap();
        assert_eq!(response.payload, b"ok");

        guard.close().await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_bounded() {
        let (manager, closes) = manager(true, false);
        let guard = manager.connect().await.unwrap();

        match guard.close().await {
            Err(ClientError::Timeout { phase, after }) => {
                assert_eq!(phase, Phase::Close);
                assert_eq!(after, Duration::from_secs(5));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let (manager, closes) = manager(false, true);
        assert!(matches!(
            manager.connect().await,
            Err(TransportError::NoAddress(_))
        ));
        assert_eq!(manager.endpoint(), "localhost:5684");
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }
}
