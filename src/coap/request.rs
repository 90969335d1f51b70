//! Requests and responses as seen by the protocol client.

use super::message::{
    BlockOption, Code, ContentFormat, Message, MessageError, MessageType, decode_uint, option,
};

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
}

impl Method {
    /// Method code.
    pub fn code(self) -> Code {
        match self {
            Self::Get => Code::GET,
            Self::Post => Code::POST,
        }
    }
}

/// A confirmable request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Method.
    pub method: Method,
    /// Absolute path, e.g. `/msg/d2c/raw`.
    pub path: String,
    /// Content-Format of the payload.
    pub content_format: Option<ContentFormat>,
    /// Payload.
    pub payload: Vec<u8>,
}

impl Request {
    /// GET without a body.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            content_format: None,
            payload: Vec::new(),
        }
    }

    /// POST with a typed body.
    pub fn post(path: impl Into<String>, format: ContentFormat, payload: Vec<u8>) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            content_format: Some(format),
            payload,
        }
    }

    /// Non-empty path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }

    /// Build the wire message.
    pub fn to_message(
        &self,
        message_id: u16,
        token: &[u8],
        block2: Option<BlockOption>,
    ) -> Message {
        let mut message = Message::new(MessageType::Confirmable, self.method.code(), message_id);
        message.token = token.to_vec();
        for segment in self.segments() {
            message.add_option(option::URI_PATH, segment);
        }
        if let Some(format) = self.content_format {
            message.add_uint_option(option::CONTENT_FORMAT, u32::from(format.0));
        }
        if let Some(block) = block2 {
            message.add_uint_option(option::BLOCK2, block.to_value());
        }
        message.payload = self.payload.clone();
        message
    }
}

/// A response, with the options the client cares about parsed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response code.
    pub code: Code,
    /// Content-Format, if given.
    pub content_format: Option<ContentFormat>,
    /// Max-Age in seconds, if given.
    pub max_age: Option<u32>,
    /// Block2, if the body is block-wise.
    pub block2: Option<BlockOption>,
    /// Body (complete once the session has reassembled all blocks).
    pub payload: Vec<u8>,
}

impl Response {
    /// A response with no options.
    pub fn new(code: Code, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            content_format: None,
            max_age: None,
            block2: None,
            payload: payload.into(),
        }
    }

    /// Extract from a received message.
    pub fn from_message(message: &Message) -> Result<Self, MessageError> {
        let content_format = message
            .option(option::CONTENT_FORMAT)
            .map(|value| {
                let format = decode_uint(option::CONTENT_FORMAT, value)?;
                u16::try_from(format)
                    .map(ContentFormat)
                    .map_err(|_| MessageError::InvalidContentFormat)
            })
            .transpose()?;

        Ok(Self {
            code: message.code,
            content_format,
            max_age: message.uint_option(option::MAX_AGE)?,
            block2: message
                .uint_option(option::BLOCK2)?
                .map(BlockOption::from_value)
                .transpose()?,
            payload: message.payload.clone(),
        })
    }

    /// Body as lossy UTF-8, for diagnostics.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
