//! CoAP (RFC 7252) with block-wise responses (RFC 7959).
//!
//! Only the client side needed by a device session is implemented:
//! confirmable requests, piggybacked and separate responses, and Block2
//! reassembly. There is no retransmission; a lost exchange is bounded by the
//! caller's deadline.

mod message;
mod request;
mod session;

pub use message::{
    BlockOption, CoapOption, Code, ContentFormat, Message, MessageError, MessageType, decode_uint,
    encode_uint, option,
};
pub use request::{Method, Request, Response};
pub use session::CoapSession;
