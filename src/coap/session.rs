//! Confirmable request/response exchanges over a [`DatagramLink`].

use async_trait::async_trait;
use rand::{Rng, RngCore, rngs::OsRng};
use tracing::{debug, trace};

use super::message::{BlockOption, Code, Message, MessageType};
use super::request::{Request, Response};
use crate::core::{COAP_TOKEN_LENGTH, DEFAULT_BLOCK_SZX, MAX_BODY_SIZE};
use crate::transport::{DatagramLink, Session, TransportError, TransportResult};

/// A CoAP client session.
///
/// Sends each request as CON with a fresh message id and random token and
/// accepts piggybacked or separate responses. Block2 bodies are reassembled
/// before [`Session::exchange`] returns.
#[derive(Debug)]
pub struct CoapSession<L> {
    link: L,
    next_message_id: u16,
    closed: bool,
}

impl<L: DatagramLink> CoapSession<L> {
    /// Wrap an established link.
    pub fn new(link: L) -> Self {
        Self {
            link,
            next_message_id: OsRng.r#gen(),
            closed: false,
        }
    }

    /// The underlying link.
    pub fn link(&self) -> &L {
        &self.link
    }

    fn message_id(&mut self) -> u16 {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);
        id
    }

    async fn send_message(&mut self, message: &Message) -> TransportResult<()> {
        self.link.send(&message.encode()?).await
    }

    async fn transact(
        &mut self,
        request: &Request,
        block2: Option<BlockOption>,
    ) -> TransportResult<Response> {
        let message_id = self.message_id();
        let mut token = [0u8; COAP_TOKEN_LENGTH];
        OsRng.fill_bytes(&mut token);

        let message = request.to_message(message_id, &token, block2);
        trace!(
            method = ?request.method,
            path = %request.path,
            message_id,
            token = %hex::encode(token),
            "sending request"
        );
        self.send_message(&message).await?;

        loop {
            let datagram = self.link.recv().await?;
            let reply = match Message::decode(&datagram) {
                Ok(reply) => reply,
                Err(e) => {
                    debug!(error = %e, "dropping malformed CoAP message");
                    continue;
                }
            };

            match reply.message_type {
                MessageType::Reset if reply.message_id == message_id => {
                    return Err(TransportError::Reset { message_id });
                }
                MessageType::Acknowledgement if reply.message_id == message_id => {
                    if reply.code == Code::EMPTY {
                        trace!(message_id, "empty ACK, awaiting separate response");
                        continue;
                    }
                    if reply.token != token {
                        debug!(message_id, "piggybacked response with foreign token");
                        continue;
                    }
                    return Ok(Response::from_message(&reply)?);
                }
                MessageType::Confirmable | MessageType::NonConfirmable
                    if reply.token == token && reply.code.is_response() =>
                {
                    if reply.message_type == MessageType::Confirmable {
                        self.send_message(&Message::empty_ack(reply.message_id)).await?;
                    }
                    return Ok(Response::from_message(&reply)?);
                }
                MessageType::Confirmable => {
                    debug!(message_id = reply.message_id, "rejecting unexpected CON");
                    self.send_message(&Message::reset(reply.message_id)).await?;
                }
                _ => {
                    trace!(message_id = reply.message_id, "ignoring unrelated message");
                }
            }
        }
    }
}

#[async_trait]
impl<L: DatagramLink> Session for CoapSession<L> {
    async fn exchange(&mut self, request: Request) -> TransportResult<Response> {
        if self.closed {
            return Err(TransportError::SessionClosed);
        }

        let mut response = self.transact(&request, None).await?;
        let mut current = response.block2;

        while let Some(block) = current.filter(|b| b.more && response.code.is_success()) {
            if response.payload.len() > MAX_BODY_SIZE {
                return Err(TransportError::BodyTooLarge {
                    limit: MAX_BODY_SIZE,
                });
            }
            let szx = block.szx.min(DEFAULT_BLOCK_SZX);
            let next = BlockOption {
                num: u32::try_from(response.payload.len() >> (usize::from(szx) + 4))
                    .map_err(|_| TransportError::BodyTooLarge {
                        limit: MAX_BODY_SIZE,
                    })?,
                more: false,
                szx,
            };
            trace!(num = next.num, szx, "requesting next block");

            let part = self.transact(&request, Some(next)).await?;
            if part.code != response.code {
                debug!(code = %part.code, "block-wise transfer ended with a different code");
                return Ok(part);
            }
            let received = part.block2.ok_or(TransportError::BlockOutOfOrder {
                expected: next.num,
                actual: None,
            })?;
            if received.offset() != next.offset() {
                return Err(TransportError::BlockOutOfOrder {
                    expected: next.num,
                    actual: Some(received.num),
                });
            }

            response.payload.extend_from_slice(&part.payload);
            current = Some(received);
        }

        if response.payload.len() > MAX_BODY_SIZE {
            return Err(TransportError::BodyTooLarge {
                limit: MAX_BODY_SIZE,
            });
        }
        response.block2 = None;
        Ok(response)
    }

    async fn close(&mut self) -> TransportResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.link.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap::{ContentFormat, option};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    type Script = Box<dyn FnMut(&Message) -> Vec<Message> + Send>;

    /// Link that answers each sent message with scripted replies.
    struct ScriptedLink {
        sent: Arc<Mutex<Vec<Message>>>,
        inbox: VecDeque<Vec<u8>>,
        script: Script,
        closes: usize,
    }

    impl ScriptedLink {
        fn new(script: impl FnMut(&Message) -> Vec<Message> + Send + 'static) -> Self {
            Self {
                sent: Arc::default(),
                inbox: VecDeque::new(),
                script: Box::new(script),
                closes: 0,
            }
        }
    }

    #[async_trait]
    impl DatagramLink for ScriptedLink {
        async fn send(&mut self, payload: &[u8]) -> TransportResult<()> {
            let message = Message::decode(payload)?;
            for reply in (self.script)(&message) {
                self.inbox.push_back(reply.encode()?);
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> TransportResult<Vec<u8>> {
            self.inbox.pop_front().ok_or(TransportError::ClosedByPeer)
        }

        async fn close(&mut self) -> TransportResult<()> {
            self.closes += 1;
            Ok(())
        }
    }

    fn piggybacked(request: &Message, code: Code, payload: &[u8]) -> Message {
        let mut reply = Message::new(MessageType::Acknowledgement, code, request.message_id);
        reply.token = request.token.clone();
        reply.payload = payload.to_vec();
        reply
    }

    #[tokio::test]
    async fn test_piggybacked_response() {
        let link = ScriptedLink::new(|req| {
            if req.message_type == MessageType::Confirmable {
                vec![piggybacked(req, Code::CREATED, b"")]
            } else {
                vec![]
            }
        });
        let sent = link.sent.clone();
        let mut session = CoapSession::new(link);

        let response = session
            .exchange(Request::post("/auth/jwt", ContentFormat::TEXT_PLAIN, b"tok".to_vec()))
            .await
            .unwrap();
        assert_eq!(response.code, Code::CREATED);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].token.len(), COAP_TOKEN_LENGTH);
        assert_eq!(sent[0].payload, b"tok");
    }

    #[tokio::test]
    async fn test_message_ids_increment() {
        let link = ScriptedLink::new(|req| vec![piggybacked(req, Code::CONTENT, b"")]);
        let sent = link.sent.clone();
        let mut session = CoapSession::new(link);

        session.exchange(Request::get("/state")).await.unwrap();
        session.exchange(Request::get("/state")).await.unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent[1].message_id, sent[0].message_id.wrapping_add(1));
        assert_ne!(sent[0].token, sent[1].token);
    }

    #[tokio::test]
    async fn test_separate_response_is_acknowledged() {
        let link = ScriptedLink::new(|req| {
            if req.message_type != MessageType::Confirmable {
                return vec![];
            }
            let mut separate = Message::new(MessageType::Confirmable, Code::CONTENT, 0x7777);
            separate.token = req.token.clone();
            separate.payload = b"state".to_vec();
            vec![Message::empty_ack(req.message_id), separate]
        });
        let sent = link.sent.clone();
        let mut session = CoapSession::new(link);

        let response = session.exchange(Request::get("/state")).await.unwrap();
        assert_eq!(response.payload, b"state");

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1], Message::empty_ack(0x7777));
    }

    #[tokio::test]
    async fn test_reset_is_an_error() {
        let link = ScriptedLink::new(|req| vec![Message::reset(req.message_id)]);
        let mut session = CoapSession::new(link);
        assert!(matches!(
            session.exchange(Request::get("/state")).await,
            Err(TransportError::Reset { .. })
        ));
    }

    #[tokio::test]
    async fn test_stray_messages_are_skipped() {
        let link = ScriptedLink::new(|req| {
            let mut stale = piggybacked(req, Code::CONTENT, b"old");
            stale.message_id = req.message_id.wrapping_sub(1);
            vec![
                Message::empty_ack(req.message_id.wrapping_add(9)),
                stale,
                piggybacked(req, Code::CONTENT, b"new"),
            ]
        });
        let mut session = CoapSession::new(link);

        let response = session.exchange(Request::get("/state")).await.unwrap();
        assert_eq!(response.payload, b"new");
    }

    #[tokio::test]
    async fn test_block2_reassembly() {
        let body: Vec<u8> = (0..40u8).collect();
        let block_body = body.clone();
        let link = ScriptedLink::new(move |req| {
            // 16-byte blocks
            let num = req
                .uint_option(option::BLOCK2)
                .unwrap()
                .map(|v| BlockOption::from_value(v).unwrap().num)
                .unwrap_or(0);
            let start = num as usize * 16;
            let end = (start + 16).min(block_body.len());
            let block = BlockOption {
                num,
                more: end < block_body.len(),
                szx: 0,
            };
            let mut reply = piggybacked(req, Code::CONTENT, &block_body[start..end]);
            reply.add_uint_option(option::BLOCK2, block.to_value());
            vec![reply]
        });
        let sent = link.sent.clone();
        let mut session = CoapSession::new(link);

        let response = session.exchange(Request::get("/state")).await.unwrap();
        assert_eq!(response.payload, body);
        assert_eq!(response.block2, None);
        assert_eq!(sent.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_block2_out_of_order() {
        let link = ScriptedLink::new(|req| {
            let mut reply = piggybacked(req, Code::CONTENT, &[0u8; 16]);
            let block = BlockOption {
                num: 0,
                more: true,
                szx: 0,
            };
            reply.add_uint_option(option::BLOCK2, block.to_value());
            vec![reply]
        });
        let mut session = CoapSession::new(link);

        assert!(matches!(
            session.exchange(Request::get("/state")).await,
            Err(TransportError::BlockOutOfOrder {
                expected: 1,
                actual: Some(0)
            })
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let link = ScriptedLink::new(|_| vec![]);
        let mut session = CoapSession::new(link);

        session.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(session.link().closes, 1);
        assert!(matches!(
            session.exchange(Request::get("/state")).await,
            Err(TransportError::SessionClosed)
        ));
    }
}
