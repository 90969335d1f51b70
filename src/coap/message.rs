//! CoAP message encoding and decoding (RFC 7252 section 3).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Ver| T |  TKL  |      Code     |          Message ID           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Token (if any, TKL bytes) ...
//! |   Options (if any) ...
//! |1 1 1 1 1 1 1 1|    Payload (if any) ...
//! ```

use std::fmt;

use thiserror::Error;

use crate::core::COAP_VERSION;

const PAYLOAD_MARKER: u8 = 0xFF;
const MAX_TOKEN_LENGTH: usize = 8;

/// Option numbers used by this crate.
pub mod option {
    /// Uri-Host.
    pub const URI_HOST: u16 = 3;
    /// Uri-Path, one per segment.
    pub const URI_PATH: u16 = 11;
    /// Content-Format.
    pub const CONTENT_FORMAT: u16 = 12;
    /// Max-Age, seconds.
    pub const MAX_AGE: u16 = 14;
    /// Uri-Query.
    pub const URI_QUERY: u16 = 15;
    /// Accept.
    pub const ACCEPT: u16 = 17;
    /// Block2 (RFC 7959).
    pub const BLOCK2: u16 = 23;
    /// Size2 (RFC 7959).
    pub const SIZE2: u16 = 28;
}

/// Message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Requires an acknowledgement.
    Confirmable = 0,
    /// Fire and forget.
    NonConfirmable = 1,
    /// Acknowledges a confirmable message.
    Acknowledgement = 2,
    /// Rejects a message.
    Reset = 3,
}

impl MessageType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::Confirmable,
            1 => Self::NonConfirmable,
            2 => Self::Acknowledgement,
            _ => Self::Reset,
        }
    }
}

/// Request method or response code, `class.detail` packed as `ccc ddddd`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code(u8);

impl Code {
    /// Empty message.
    pub const EMPTY: Self = Self(0x00);
    /// GET.
    pub const GET: Self = Self(0x01);
    /// POST.
    pub const POST: Self = Self(0x02);
    /// PUT.
    pub const PUT: Self = Self(0x03);
    /// DELETE.
    pub const DELETE: Self = Self(0x04);
    /// 2.01 Created.
    pub const CREATED: Self = Self::new(2, 1);
    /// 2.02 Deleted.
    pub const DELETED: Self = Self::new(2, 2);
    /// 2.03 Valid.
    pub const VALID: Self = Self::new(2, 3);
    /// 2.04 Changed.
    pub const CHANGED: Self = Self::new(2, 4);
    /// 2.05 Content.
    pub const CONTENT: Self = Self::new(2, 5);
    /// 4.00 Bad Request.
    pub const BAD_REQUEST: Self = Self::new(4, 0);
    /// 4.01 Unauthorized.
    pub const UNAUTHORIZED: Self = Self::new(4, 1);
    /// 4.03 Forbidden.
    pub const FORBIDDEN: Self = Self::new(4, 3);
    /// 4.04 Not Found.
    pub const NOT_FOUND: Self = Self::new(4, 4);
    /// 4.05 Method Not Allowed.
    pub const METHOD_NOT_ALLOWED: Self = Self::new(4, 5);
    /// 4.13 Request Entity Too Large.
    pub const REQUEST_ENTITY_TOO_LARGE: Self = Self::new(4, 13);
    /// 4.15 Unsupported Content-Format.
    pub const UNSUPPORTED_CONTENT_FORMAT: Self = Self::new(4, 15);
    /// 5.00 Internal Server Error.
    pub const INTERNAL_SERVER_ERROR: Self = Self::new(5, 0);
    /// 5.03 Service Unavailable.
    pub const SERVICE_UNAVAILABLE: Self = Self::new(5, 3);

    /// Build from class and detail.
    pub const fn new(class: u8, detail: u8) -> Self {
        Self((class << 5) | (detail & 0x1F))
    }

    /// Raw byte.
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Raw byte.
    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// Class (0 request, 2 success, 4 client error, 5 server error).
    pub fn class(self) -> u8 {
        self.0 >> 5
    }

    /// Detail.
    pub fn detail(self) -> u8 {
        self.0 & 0x1F
    }

    /// Whether this is a response code.
    pub fn is_response(self) -> bool {
        (2..=5).contains(&self.class())
    }

    /// Whether this is a 2.xx code.
    pub fn is_success(self) -> bool {
        self.class() == 2
    }

    /// Numeric form used in HTTP-style reporting, e.g. 201 for 2.01.
    pub fn as_number(self) -> u16 {
        u16::from(self.class()) * 100 + u16::from(self.detail())
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::EMPTY => "Empty",
            Self::GET => "GET",
            Self::POST => "POST",
            Self::PUT => "PUT",
            Self::DELETE => "DELETE",
            Self::CREATED => "Created",
            Self::DELETED => "Deleted",
            Self::VALID => "Valid",
            Self::CHANGED => "Changed",
            Self::CONTENT => "Content",
            Self::BAD_REQUEST => "Bad Request",
            Self::UNAUTHORIZED => "Unauthorized",
            Self::FORBIDDEN => "Forbidden",
            Self::NOT_FOUND => "Not Found",
            Self::METHOD_NOT_ALLOWED => "Method Not Allowed",
            Self::REQUEST_ENTITY_TOO_LARGE => "Request Entity Too Large",
            Self::UNSUPPORTED_CONTENT_FORMAT => "Unsupported Content-Format",
            Self::INTERNAL_SERVER_ERROR => "Internal Server Error",
            Self::SERVICE_UNAVAILABLE => "Service Unavailable",
            _ => return None,
        })
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())?;
        if let Some(name) = self.name() {
            write!(f, " {name}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code({self})")
    }
}

/// Content-Format registry values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentFormat(pub u16);

impl ContentFormat {
    /// `text/plain; charset=utf-8`
    pub const TEXT_PLAIN: Self = Self(0);
    /// `application/octet-stream`
    pub const OCTET_STREAM: Self = Self(42);
    /// `application/json`
    pub const JSON: Self = Self(50);
    /// `application/cbor`
    pub const CBOR: Self = Self(60);
    /// `application/senml+json`
    pub const SENML_JSON: Self = Self(110);
    /// `application/senml+cbor`
    pub const SENML_CBOR: Self = Self(112);
}

/// One option instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapOption {
    /// Option number.
    pub number: u16,
    /// Raw value.
    pub value: Vec<u8>,
}

/// Block option value (RFC 7959 section 2.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockOption {
    /// Block number.
    pub num: u32,
    /// More blocks follow.
    pub more: bool,
    /// Size exponent; block size is `2^(szx + 4)`.
    pub szx: u8,
}

impl BlockOption {
    /// Block size in bytes.
    pub fn size(self) -> usize {
        1 << (usize::from(self.szx) + 4)
    }

    /// Byte offset of this block.
    pub fn offset(self) -> usize {
        self.num as usize * self.size()
    }

    /// Option value as an unsigned integer.
    pub fn to_value(self) -> u32 {
        (self.num << 4) | (u32::from(self.more) << 3) | u32::from(self.szx & 0x07)
    }

    /// Parse from the option's integer value.
    pub fn from_value(value: u32) -> Result<Self, MessageError> {
        let szx = (value & 0x07) as u8;
        if szx == 7 {
            return Err(MessageError::InvalidBlock(value));
        }
        Ok(Self {
            num: value >> 4,
            more: value & 0x08 != 0,
            szx,
        })
    }
}

/// A CoAP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Type.
    pub message_type: MessageType,
    /// Method or response code.
    pub code: Code,
    /// Deduplication / matching id.
    pub message_id: u16,
    /// Request/response matching token, up to 8 bytes.
    pub token: Vec<u8>,
    /// Options, kept in insertion order; sorted by number on encode.
    pub options: Vec<CoapOption>,
    /// Payload.
    pub payload: Vec<u8>,
}

impl Message {
    /// A message with no token, options or payload.
    pub fn new(message_type: MessageType, code: Code, message_id: u16) -> Self {
        Self {
            message_type,
            code,
            message_id,
            token: Vec::new(),
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// Empty ACK for a confirmable message.
    pub fn empty_ack(message_id: u16) -> Self {
        Self::new(MessageType::Acknowledgement, Code::EMPTY, message_id)
    }

    /// Reset for an unexpected message.
    pub fn reset(message_id: u16) -> Self {
        Self::new(MessageType::Reset, Code::EMPTY, message_id)
    }

    /// Append an option.
    pub fn add_option(&mut self, number: u16, value: impl Into<Vec<u8>>) {
        self.options.push(CoapOption {
            number,
            value: value.into(),
        });
    }

    /// Append an unsigned-integer option in minimal encoding.
    pub fn add_uint_option(&mut self, number: u16, value: u32) {
        self.add_option(number, encode_uint(value));
    }

    /// First value of an option.
    pub fn option(&self, number: u16) -> Option<&[u8]> {
        self.options
            .iter()
            .find(|o| o.number == number)
            .map(|o| o.value.as_slice())
    }

    /// All values of a repeatable option, in order.
    pub fn options(&self, number: u16) -> impl Iterator<Item = &[u8]> {
        self.options
            .iter()
            .filter(move |o| o.number == number)
            .map(|o| o.value.as_slice())
    }

    /// First value of an unsigned-integer option.
    pub fn uint_option(&self, number: u16) -> Result<Option<u32>, MessageError> {
        self.option(number)
            .map(|value| decode_uint(number, value))
            .transpose()
    }

    /// Serialize.
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        if self.token.len() > MAX_TOKEN_LENGTH {
            return Err(MessageError::InvalidTokenLength(self.token.len()));
        }

        let mut buf = Vec::with_capacity(4 + self.token.len() + self.payload.len() + 16);
        buf.push((COAP_VERSION << 6) | ((self.message_type as u8) << 4) | self.token.len() as u8);
        buf.push(self.code.as_byte());
        buf.extend_from_slice(&self.message_id.to_be_bytes());
        buf.extend_from_slice(&self.token);

        let mut options: Vec<&CoapOption> = self.options.iter().collect();
        options.sort_by_key(|o| o.number);

        let mut previous = 0u16;
        for option in options {
            let delta = option.number - previous;
            let length = u16::try_from(option.value.len())
                .ok()
                .filter(|len| usize::from(*len) <= usize::from(u16::MAX) - 269)
                .ok_or(MessageError::OptionTooLong(option.number))?;

            let (delta_nibble, delta_ext) = split_nibble(delta);
            let (length_nibble, length_ext) = split_nibble(length);
            buf.push((delta_nibble << 4) | length_nibble);
            buf.extend_from_slice(&delta_ext);
            buf.extend_from_slice(&length_ext);
            buf.extend_from_slice(&option.value);
            previous = option.number;
        }

        if !self.payload.is_empty() {
            buf.push(PAYLOAD_MARKER);
            buf.extend_from_slice(&self.payload);
        }

        Ok(buf)
    }

    /// Parse.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        if data.len() < 4 {
            return Err(MessageError::TooShort(data.len()));
        }

        let version = data[0] >> 6;
        if version != COAP_VERSION {
            return Err(MessageError::UnsupportedVersion(version));
        }
        let message_type = MessageType::from_bits(data[0] >> 4);
        let token_length = usize::from(data[0] & 0x0F);
        if token_length > MAX_TOKEN_LENGTH {
            return Err(MessageError::InvalidTokenLength(token_length));
        }
        let code = Code::from_byte(data[1]);
        let message_id = u16::from_be_bytes([data[2], data[3]]);

        let mut cursor = Cursor { data, pos: 4 };
        let token = cursor.take(token_length)?.to_vec();

        let mut options = Vec::new();
        let mut number = 0u16;
        let mut payload = Vec::new();

        while let Some(byte) = cursor.next_byte() {
            if byte == PAYLOAD_MARKER {
                let rest = cursor.rest();
                if rest.is_empty() {
                    return Err(MessageError::EmptyPayload);
                }
                payload = rest.to_vec();
                break;
            }

            let delta = cursor.extended(byte >> 4)?;
            let length = cursor.extended(byte & 0x0F)?;
            number = number
                .checked_add(delta)
                .ok_or(MessageError::InvalidOption)?;
            let value = cursor.take(usize::from(length))?.to_vec();
            options.push(CoapOption { number, value });
        }

        if code == Code::EMPTY && (!token.is_empty() || !options.is_empty() || !payload.is_empty()) {
            return Err(MessageError::NonEmptyEmpty);
        }

        Ok(Self {
            message_type,
            code,
            message_id,
            token,
            options,
            payload,
        })
    }
}

fn split_nibble(value: u16) -> (u8, Vec<u8>) {
    match value {
        0..=12 => (value as u8, Vec::new()),
        13..=268 => (13, vec![(value - 13) as u8]),
        _ => (14, (value - 269).to_be_bytes().to_vec()),
    }
}

/// Minimal big-endian encoding of an unsigned option value.
pub fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

/// Decode an unsigned option value of up to four bytes.
pub fn decode_uint(number: u16, value: &[u8]) -> Result<u32, MessageError> {
    if value.len() > 4 {
        return Err(MessageError::InvalidUint(number));
    }
    Ok(value.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn next_byte(&mut self) -> Option<u8> {
        let byte = self.data.get(self.pos).copied()?;
        self.pos += 1;
        Some(byte)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], MessageError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(MessageError::Truncated)?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    fn extended(&mut self, nibble: u8) -> Result<u16, MessageError> {
        match nibble {
            0..=12 => Ok(u16::from(nibble)),
            13 => Ok(u16::from(self.take(1)?[0]) + 13),
            14 => {
                let ext = self.take(2)?;
                u16::from_be_bytes([ext[0], ext[1]])
                    .checked_add(269)
                    .ok_or(MessageError::InvalidOption)
            }
            _ => Err(MessageError::InvalidOption),
        }
    }
}

/// Errors encoding or decoding a CoAP message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// Shorter than the fixed header.
    #[error("message too short: {0} bytes")]
    TooShort(usize),

    /// Version other than 1.
    #[error("unsupported CoAP version {0}")]
    UnsupportedVersion(u8),

    /// Token length above 8.
    #[error("invalid token length {0}")]
    InvalidTokenLength(usize),

    /// Option header uses the reserved nibble 15 or overflows.
    #[error("invalid option encoding")]
    InvalidOption,

    /// Option or token runs past the end.
    #[error("message truncated")]
    Truncated,

    /// Payload marker followed by nothing.
    #[error("payload marker without payload")]
    EmptyPayload,

    /// Code 0.00 with content.
    #[error("empty message carries token, options or payload")]
    NonEmptyEmpty,

    /// Option value too long to encode.
    #[error("option {0} value too long")]
    OptionTooLong(u16),

    /// Unsigned option longer than four bytes.
    #[error("option {0} is not a valid uint")]
    InvalidUint(u16),

    /// Block option with reserved size exponent.
    #[error("invalid block option value 0x{0:x}")]
    InvalidBlock(u32),

    /// Content-Format outside the 16-bit range.
    #[error("invalid content format")]
    InvalidContentFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_display_and_number() {
        assert_eq!(Code::CREATED.to_string(), "2.01 Created");
        assert_eq!(Code::CONTENT.to_string(), "2.05 Content");
        assert_eq!(Code::new(4, 0).to_string(), "4.00 Bad Request");
        assert_eq!(Code::new(4, 22).to_string(), "4.22");
        assert_eq!(Code::BAD_REQUEST.as_number(), 400);
        assert_eq!(Code::CREATED.as_byte(), 65);
        assert_eq!(Code::CONTENT.as_byte(), 69);
        assert!(Code::CREATED.is_success());
        assert!(!Code::GET.is_response());
    }

    #[test]
    fn test_encode_get_state() {
        let mut msg = Message::new(MessageType::Confirmable, Code::GET, 0x1234);
        msg.token = vec![0xde, 0xad, 0xbe, 0xef];
        msg.add_option(option::URI_PATH, "state");

        let bytes = msg.encode().unwrap();
        // ver 1, CON, tkl 4 | GET | mid | token | delta 11 len 5 "state"
        assert_eq!(hex::encode(&bytes), "44011234deadbeefb57374617465");
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_encode_post_with_payload_and_sorted_options() {
        let mut msg = Message::new(MessageType::Confirmable, Code::POST, 1);
        msg.add_uint_option(option::CONTENT_FORMAT, 60);
        msg.add_option(option::URI_PATH, "msg");
        msg.payload = vec![0x80];

        let bytes = msg.encode().unwrap();
        assert_eq!(hex::encode(&bytes), "40020001b36d7367113cff80");

        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded.option(option::URI_PATH), Some(&b"msg"[..]));
        assert_eq!(decoded.uint_option(option::CONTENT_FORMAT).unwrap(), Some(60));
        assert_eq!(decoded.payload, vec![0x80]);
    }

    #[test]
    fn test_extended_delta_and_length() {
        let mut msg = Message::new(MessageType::NonConfirmable, Code::CONTENT, 7);
        msg.add_option(option::SIZE2, vec![1]);
        msg.add_option(300, vec![0xab; 20]);
        msg.add_option(1000, vec![0xcd; 400]);

        let bytes = msg.encode().unwrap();
        // Size2: delta 28 -> nibble 13, ext 15
        assert_eq!(bytes[4], 0xd1);
        assert_eq!(bytes[5], 15);

        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded.options, msg.options);
    }

    #[test]
    fn test_repeated_options_keep_order() {
        let mut msg = Message::new(MessageType::Confirmable, Code::POST, 2);
        for segment in ["msg", "d2c", "raw"] {
            msg.add_option(option::URI_PATH, segment);
        }
        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        let path: Vec<_> = decoded.options(option::URI_PATH).collect();
        assert_eq!(path, [&b"msg"[..], b"d2c", b"raw"]);
    }

    #[test]
    fn test_empty_ack() {
        let bytes = Message::empty_ack(0xbeef).encode().unwrap();
        assert_eq!(hex::encode(&bytes), "6000beef");
        assert_eq!(
            Message::decode(&bytes).unwrap().message_type,
            MessageType::Acknowledgement
        );
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(Message::decode(&[0x40]), Err(MessageError::TooShort(1)));
        assert_eq!(
            Message::decode(&[0x80, 0x01, 0, 0]),
            Err(MessageError::UnsupportedVersion(2))
        );
        assert_eq!(
            Message::decode(&[0x49, 0x01, 0, 0]),
            Err(MessageError::InvalidTokenLength(9))
        );
        assert_eq!(
            Message::decode(&[0x42, 0x01, 0, 0, 0xaa]),
            Err(MessageError::Truncated)
        );
        assert_eq!(
            Message::decode(&[0x40, 0x45, 0, 0, 0xff]),
            Err(MessageError::EmptyPayload)
        );
        assert_eq!(
            Message::decode(&[0x40, 0x45, 0, 0, 0xf0]),
            Err(MessageError::InvalidOption)
        );
        assert_eq!(
            Message::decode(&[0x60, 0x00, 0, 0, 0xff, 0x01]),
            Err(MessageError::NonEmptyEmpty)
        );
    }

    #[test]
    fn test_uint_encoding() {
        assert_eq!(encode_uint(0), Vec::<u8>::new());
        assert_eq!(encode_uint(60), vec![60]);
        assert_eq!(encode_uint(0x0102_0304), vec![1, 2, 3, 4]);
        assert_eq!(decode_uint(14, &[]).unwrap(), 0);
        assert_eq!(decode_uint(14, &[0x01, 0x2c]).unwrap(), 300);
        assert_eq!(decode_uint(14, &[0; 5]), Err(MessageError::InvalidUint(14)));
    }

    #[test]
    fn test_block_option() {
        let block = BlockOption {
            num: 3,
            more: true,
            szx: 6,
        };
        assert_eq!(block.size(), 1024);
        assert_eq!(block.offset(), 3072);
        assert_eq!(block.to_value(), 0x3e);
        assert_eq!(BlockOption::from_value(0x3e).unwrap(), block);
        assert_eq!(
            BlockOption::from_value(0x07),
            Err(MessageError::InvalidBlock(0x07))
        );
    }
}
