//! Wire frames
//!
//! Every frame starts with a single tag byte. Heartbeats may appear any
//! number of times before the terminal frame. A success terminator hands
//! the rest of the stream to the caller, an error terminator is followed by
//! the error text up to end of stream, and data blocks carry a 4-byte
//! little-endian length before their payload.

use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;

/// Success terminator
pub const TAG_SUCCESS: u8 = 0x00;
/// Error terminator, followed by the message up to end of stream
pub const TAG_ERROR: u8 = 0x01;
/// Data block, followed by `u32` LE length and payload
pub const TAG_BLOCK: u8 = 0x02;
/// Filler written while the operation is still running
pub const TAG_HEARTBEAT: u8 = 0x20;

/// Interval between heartbeats
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Largest block either side will write or accept
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024;

/// A single protocol frame
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Heartbeat,
    Success,
    Error(String),
    Block(Bytes),
}

impl Frame {
    #[must_use]
    pub const fn tag(&self) -> u8 {
        match self {
            Self::Heartbeat => TAG_HEARTBEAT,
            Self::Success => TAG_SUCCESS,
            Self::Error(_) => TAG_ERROR,
            Self::Block(_) => TAG_BLOCK,
        }
    }

    /// Whether this frame ends the exchange
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error(_))
    }

    /// Serialize to wire bytes
    ///
    /// Blocks longer than `u32::MAX` cannot be represented; callers split
    /// payloads well below that.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        match self {
            Self::Heartbeat => Bytes::from_static(&[TAG_HEARTBEAT]),
            Self::Success => Bytes::from_static(&[TAG_SUCCESS]),
            Self::Error(msg) => {
                let mut buf = BytesMut::with_capacity(1 + msg.len());
                buf.put_u8(TAG_ERROR);
                buf.put_slice(msg.as_bytes());
                buf.freeze()
            }
            Self::Block(data) => {
                let mut buf = BytesMut::with_capacity(BLOCK_HEADER_LEN + data.len());
                buf.put_slice(&block_header(data.len()));
                buf.put_slice(data);
                buf.freeze()
            }
        }
    }
}

/// Tag plus length prefix of a data block
pub const BLOCK_HEADER_LEN: usize = 5;

/// Header preceding a block payload of `len` bytes
#[must_use]
pub fn block_header(len: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(BLOCK_HEADER_LEN);
    buf.put_u8(TAG_BLOCK);
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u32_le(len as u32);
    buf.freeze()
}
