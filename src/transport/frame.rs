//! Secure datagram frame encoding and decoding.
//!
//! Frame formats (all integers little-endian):
//!
//! ```text
//! HandshakeInit  [0x01][flags][version:2][noise message 1]
//! HandshakeResp  [0x02][flags][connection id:6][noise message 2]
//! Data / Close   [0x03|0x05][flags][connection id:6][nonce:8][ciphertext]
//! ```

use rand::{RngCore, rngs::OsRng};
use thiserror::Error;

use crate::core::{AEAD_TAG_SIZE, CONNECTION_ID_SIZE};

/// Size constants of the frame formats.
pub mod sizes {
    use crate::core::{AEAD_TAG_SIZE, CONNECTION_ID_SIZE};

    /// Nonce counter size (64-bit LE).
    pub const NONCE_SIZE: usize = 8;
    /// HandshakeInit header size (type + flags + version).
    pub const HANDSHAKE_INIT_HEADER_SIZE: usize = 1 + 1 + 2;
    /// HandshakeResp header size (type + flags + connection id).
    pub const HANDSHAKE_RESP_HEADER_SIZE: usize = 1 + 1 + CONNECTION_ID_SIZE;
    /// Data frame header size (type + flags + connection id + nonce).
    pub const DATA_FRAME_HEADER_SIZE: usize = 1 + 1 + CONNECTION_ID_SIZE + NONCE_SIZE;
    /// Minimum data frame size: header, echoed header and tag.
    pub const MIN_DATA_FRAME_SIZE: usize = 2 * DATA_FRAME_HEADER_SIZE + AEAD_TAG_SIZE;
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Noise_NX first message.
    HandshakeInit = 0x01,
    /// Noise_NX second message.
    HandshakeResp = 0x02,
    /// Encrypted data frame.
    Data = 0x03,
    /// Graceful close.
    Close = 0x05,
}

impl FrameType {
    /// Parse frame type from a byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::HandshakeInit),
            0x02 => Some(Self::HandshakeResp),
            0x03 => Some(Self::Data),
            0x05 => Some(Self::Close),
            _ => None,
        }
    }

    /// Convert frame type to its byte representation.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Frame flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Connection id requested (HandshakeInit), granted (HandshakeResp) or
    /// present (Data/Close).
    pub const CONNECTION_ID: Self = Self(0x01);

    /// Create flags from a raw byte.
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Get the raw byte value.
    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// Check if CONNECTION_ID is set.
    pub fn has_connection_id(self) -> bool {
        self.0 & 0x01 != 0
    }

    /// Reserved bits must be zero.
    pub fn is_valid(self) -> bool {
        self.0 & 0xFE == 0
    }
}

/// Connection identifier (6 bytes), letting the server route datagrams
/// independently of the client's address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConnectionId([u8; CONNECTION_ID_SIZE]);

impl ConnectionId {
    /// Generate a new random connection id.
    pub fn generate() -> Self {
        let mut id = [0u8; CONNECTION_ID_SIZE];
        OsRng.fill_bytes(&mut id);
        Self(id)
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; CONNECTION_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// The all-zero id carried when no connection id is in use.
    pub fn zero() -> Self {
        Self([0u8; CONNECTION_ID_SIZE])
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; CONNECTION_ID_SIZE] {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// First handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInit {
    /// `CONNECTION_ID` requests a connection id.
    pub flags: FrameFlags,
    /// Wire version.
    pub version: u16,
    /// Noise message (-> e).
    pub noise: Vec<u8>,
}

impl HandshakeInit {
    /// Serialize.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(sizes::HANDSHAKE_INIT_HEADER_SIZE + self.noise.len());
        buf.push(FrameType::HandshakeInit.as_byte());
        buf.push(self.flags.as_byte());
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.noise);
        buf
    }

    /// Parse.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let (flags, rest) = split_header(data, FrameType::HandshakeInit, sizes::HANDSHAKE_INIT_HEADER_SIZE)?;
        Ok(Self {
            flags,
            version: u16::from_le_bytes([rest[0], rest[1]]),
            noise: rest[2..].to_vec(),
        })
    }
}

/// Second handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResp {
    /// `CONNECTION_ID` when a connection id was granted.
    pub flags: FrameFlags,
    /// Granted id, zero when none.
    pub connection_id: ConnectionId,
    /// Noise message (<- e, ee, s, es).
    pub noise: Vec<u8>,
}

impl HandshakeResp {
    /// Serialize.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(sizes::HANDSHAKE_RESP_HEADER_SIZE + self.noise.len());
        buf.push(FrameType::HandshakeResp.as_byte());
        buf.push(self.flags.as_byte());
        buf.extend_from_slice(self.connection_id.as_bytes());
        buf.extend_from_slice(&self.noise);
        buf
    }

    /// Parse.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let (flags, rest) = split_header(data, FrameType::HandshakeResp, sizes::HANDSHAKE_RESP_HEADER_SIZE)?;
        let mut id = [0u8; CONNECTION_ID_SIZE];
        id.copy_from_slice(&rest[..CONNECTION_ID_SIZE]);
        Ok(Self {
            flags,
            connection_id: ConnectionId::from_bytes(id),
            noise: rest[CONNECTION_ID_SIZE..].to_vec(),
        })
    }
}

fn split_header(data: &[u8], expected: FrameType, min: usize) -> Result<(FrameFlags, &[u8]), FrameError> {
    if data.len() < min {
        return Err(FrameError::TooShort {
            expected: min,
            actual: data.len(),
        });
    }
    let frame_type = FrameType::from_byte(data[0]).ok_or(FrameError::InvalidType(data[0]))?;
    if frame_type != expected {
        return Err(FrameError::UnexpectedType(frame_type));
    }
    let flags = FrameFlags::from_byte(data[1]);
    if !flags.is_valid() {
        return Err(FrameError::InvalidFlags(data[1]));
    }
    Ok((flags, &data[2..]))
}

/// Data/Close frame header.
///
/// Wire format (16 bytes):
/// ```text
/// +--------+--------+------------------+--------------------+
/// | Type   | Flags  | Connection ID    | Nonce              |
/// | 1 byte | 1 byte | 6 bytes          | 8 bytes (LE64)     |
/// +--------+--------+------------------+--------------------+
/// ```
///
/// The header is repeated at the start of the plaintext so that it is
/// authenticated along with the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFrameHeader {
    /// Data or Close.
    pub frame_type: FrameType,
    /// Frame flags.
    pub flags: FrameFlags,
    /// Connection id, zero when not in use.
    pub connection_id: ConnectionId,
    /// Per-direction nonce, starting at 1.
    pub nonce: u64,
}

impl DataFrameHeader {
    /// Create a data frame header.
    pub fn data(connection_id: Option<ConnectionId>, nonce: u64) -> Self {
        Self::with_type(FrameType::Data, connection_id, nonce)
    }

    /// Create a close frame header.
    pub fn close(connection_id: Option<ConnectionId>, nonce: u64) -> Self {
        Self::with_type(FrameType::Close, connection_id, nonce)
    }

    fn with_type(frame_type: FrameType, connection_id: Option<ConnectionId>, nonce: u64) -> Self {
        Self {
            frame_type,
            flags: if connection_id.is_some() {
                FrameFlags::CONNECTION_ID
            } else {
                FrameFlags::NONE
            },
            connection_id: connection_id.unwrap_or_default(),
            nonce,
        }
    }

    /// Serialize header to bytes (16 bytes).
    pub fn to_bytes(&self) -> [u8; sizes::DATA_FRAME_HEADER_SIZE] {
        let mut buf = [0u8; sizes::DATA_FRAME_HEADER_SIZE];
        buf[0] = self.frame_type.as_byte();
        buf[1] = self.flags.as_byte();
        buf[2..8].copy_from_slice(self.connection_id.as_bytes());
        buf[8..16].copy_from_slice(&self.nonce.to_le_bytes());
        buf
    }

    /// Parse header from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < sizes::DATA_FRAME_HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: sizes::DATA_FRAME_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let frame_type = FrameType::from_byte(bytes[0]).ok_or(FrameError::InvalidType(bytes[0]))?;
        if !matches!(frame_type, FrameType::Data | FrameType::Close) {
            return Err(FrameError::UnexpectedType(frame_type));
        }

        let flags = FrameFlags::from_byte(bytes[1]);
        if !flags.is_valid() {
            return Err(FrameError::InvalidFlags(bytes[1]));
        }

        let mut id = [0u8; CONNECTION_ID_SIZE];
        id.copy_from_slice(&bytes[2..8]);

        let mut nonce = [0u8; 8];
        nonce.copy_from_slice(&bytes[8..16]);

        Ok(Self {
            frame_type,
            flags,
            connection_id: ConnectionId::from_bytes(id),
            nonce: u64::from_le_bytes(nonce),
        })
    }
}

/// Errors that can occur during frame parsing.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Frame is too short.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected size.
        expected: usize,
        /// Actual size received.
        actual: usize,
    },

    /// Invalid frame type.
    #[error("invalid frame type: 0x{0:02x}")]
    InvalidType(u8),

    /// Valid frame type in the wrong place.
    #[error("unexpected frame type: {0:?}")]
    UnexpectedType(FrameType),

    /// Invalid flags (reserved bits set).
    #[error("invalid flags: 0x{0:02x} (reserved bits must be 0)")]
    InvalidFlags(u8),

    /// Peer speaks another wire version.
    #[error("unsupported protocol version 0x{0:04x}")]
    UnsupportedVersion(u16),

    /// The authenticated copy of the header differs from the clear one.
    #[error("frame header does not match its authenticated copy")]
    HeaderMismatch,
}

/// Parse the clear header of a received Data/Close frame.
///
/// Only the unencrypted header is parsed; the caller decrypts the rest.
pub fn parse_frame_header(data: &[u8]) -> Result<DataFrameHeader, FrameError> {
    if data.len() < sizes::MIN_DATA_FRAME_SIZE {
        return Err(FrameError::TooShort {
            expected: sizes::MIN_DATA_FRAME_SIZE,
            actual: data.len(),
        });
    }
    DataFrameHeader::from_bytes(data)
}

/// Ciphertext length for a payload of `len` bytes.
pub fn sealed_len(len: usize) -> usize {
    sizes::DATA_FRAME_HEADER_SIZE + len + AEAD_TAG_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_roundtrip() {
        for t in [
            FrameType::HandshakeInit,
            FrameType::HandshakeResp,
            FrameType::Data,
            FrameType::Close,
        ] {
            assert_eq!(FrameType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(FrameType::from_byte(0x04), None);
        assert_eq!(FrameType::from_byte(0xFF), None);
    }

    #[test]
    fn test_frame_flags() {
        assert!(!FrameFlags::NONE.has_connection_id());
        assert!(FrameFlags::CONNECTION_ID.has_connection_id());
        assert!(FrameFlags::CONNECTION_ID.is_valid());
        assert!(!FrameFlags::from_byte(0x02).is_valid());
    }

    #[test]
    fn test_handshake_init_wire_format() {
        let init = HandshakeInit {
            flags: FrameFlags::CONNECTION_ID,
            version: 0x0001,
            noise: vec![0xaa, 0xbb],
        };
        let bytes = init.encode();
        assert_eq!(hex::encode(&bytes), "01010100aabb");
        assert_eq!(HandshakeInit::decode(&bytes).unwrap(), init);
    }

    #[test]
    fn test_handshake_resp_wire_format() {
        let resp = HandshakeResp {
            flags: FrameFlags::CONNECTION_ID,
            connection_id: ConnectionId::from_bytes([1, 2, 3, 4, 5, 6]),
            noise: vec![0xcc],
        };
        let bytes = resp.encode();
        assert_eq!(hex::encode(&bytes), "0201010203040506cc");
        assert_eq!(HandshakeResp::decode(&bytes).unwrap(), resp);
    }

    #[test]
    fn test_handshake_decode_rejects_wrong_type() {
        let resp = HandshakeResp {
            flags: FrameFlags::NONE,
            connection_id: ConnectionId::zero(),
            noise: vec![],
        };
        assert!(matches!(
            HandshakeInit::decode(&resp.encode()),
            Err(FrameError::UnexpectedType(FrameType::HandshakeResp))
        ));
        assert!(matches!(
            HandshakeResp::decode(&[0x02, 0x00]),
            Err(FrameError::TooShort { .. })
        ));
    }

    #[test]
    fn test_data_frame_header_roundtrip() {
        let header = DataFrameHeader::data(
            Some(ConnectionId::from_bytes([0x11, 0x22, 0x33, 0x44, 0x55, 0x66])),
            0x123456789ABCDEF0,
        );

        let bytes = header.to_bytes();
        assert_eq!(hex::encode(bytes), "0301112233445566f0debc9a78563412");
        assert_eq!(DataFrameHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_close_header_without_connection_id() {
        let header = DataFrameHeader::close(None, 9);
        assert_eq!(header.flags, FrameFlags::NONE);
        assert_eq!(header.connection_id, ConnectionId::zero());
        assert_eq!(header.to_bytes()[0], 0x05);
    }

    #[test]
    fn test_parse_too_short() {
        let data = [0u8; 10];
        assert!(matches!(
            parse_frame_header(&data),
            Err(FrameError::TooShort { .. })
        ));
    }

    #[test]
    fn test_parse_invalid_type() {
        let mut data = [0u8; sizes::MIN_DATA_FRAME_SIZE];
        data[0] = 0xFF;
        assert!(matches!(
            parse_frame_header(&data),
            Err(FrameError::InvalidType(0xFF))
        ));

        data[0] = 0x01;
        assert!(matches!(
            parse_frame_header(&data),
            Err(FrameError::UnexpectedType(FrameType::HandshakeInit))
        ));
    }
}
