//! Client side of the keep-alive protocol

use crate::frame::{DEFAULT_MAX_BLOCK_SIZE, Frame, TAG_BLOCK, TAG_ERROR, TAG_HEARTBEAT, TAG_SUCCESS};
use bytes::Bytes;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Failures while decoding a keep-alive response
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected frame tag {0:#04x}")]
    UnexpectedTag(u8),

    #[error("block of {len} bytes exceeds limit of {max}")]
    BlockTooLarge { len: usize, max: usize },

    #[error("stream ended before terminal frame")]
    Truncated,

    /// Error text sent by the server
    #[error("{0}")]
    Remote(String),
}

fn eof_as_truncated(err: io::Error) -> ProtocolError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ProtocolError::Truncated
    } else {
        ProtocolError::Io(err)
    }
}

/// Reads frames one at a time
pub struct FrameReader<R> {
    inner: R,
    max_block_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub const fn new(inner: R) -> Self {
        Self {
            inner,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
        }
    }

    #[must_use]
    pub const fn with_max_block_size(mut self, max_block_size: usize) -> Self {
        self.max_block_size = max_block_size;
        self
    }

    /// Read the next frame
    ///
    /// An error frame consumes the rest of the stream. After a success frame
    /// the remaining bytes belong to the caller, see [`into_inner`](Self::into_inner).
    pub async fn read_frame(&mut self) -> Result<Frame, ProtocolError> {
        let tag = self.inner.read_u8().await.map_err(eof_as_truncated)?;
        match tag {
            TAG_HEARTBEAT => Ok(Frame::Heartbeat),
            TAG_SUCCESS => Ok(Frame::Success),
            TAG_ERROR => {
                let mut msg = Vec::new();
                self.inner.read_to_end(&mut msg).await?;
                Ok(Frame::Error(String::from_utf8_lossy(&msg).into_owned()))
            }
            TAG_BLOCK => {
                let len = self.inner.read_u32_le().await.map_err(eof_as_truncated)? as usize;
                if len > self.max_block_size {
                    return Err(ProtocolError::BlockTooLarge {
                        len,
                        max: self.max_block_size,
                    });
                }
                let mut buf = vec![0u8; len];
                self.inner
                    .read_exact(&mut buf)
                    .await
                    .map_err(eof_as_truncated)?;
                Ok(Frame::Block(Bytes::from(buf)))
            }
            other => Err(ProtocolError::UnexpectedTag(other)),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Skip heartbeats until the terminal frame
///
/// On success returns the reader positioned at the result payload.
pub async fn wait_for_response<R>(reader: R) -> Result<R, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameReader::new(reader);
    loop {
        match frames.read_frame().await? {
            Frame::Heartbeat => {}
            Frame::Success => return Ok(frames.into_inner()),
            Frame::Error(msg) => return Err(ProtocolError::Remote(msg)),
            Frame::Block(_) => return Err(ProtocolError::UnexpectedTag(TAG_BLOCK)),
        }
    }
}

/// Copy data blocks to `writer` until the terminal frame
///
/// Anything following a success terminator is copied through as well.
/// Returns the number of payload bytes written.
pub async fn wait_for_stream<R, W>(
    reader: R,
    writer: &mut W,
    max_block_size: usize,
) -> Result<u64, ProtocolError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut frames = FrameReader::new(reader).with_max_block_size(max_block_size);
    let mut total = 0u64;
    loop {
        match frames.read_frame().await? {
            Frame::Heartbeat => {}
            Frame::Block(data) => {
                writer.write_all(&data).await?;
                total += data.len() as u64;
            }
            Frame::Success => {
                let mut rest = frames.into_inner();
                total += tokio::io::copy(&mut rest, writer).await?;
                writer.flush().await?;
                return Ok(total);
            }
            Frame::Error(msg) => return Err(ProtocolError::Remote(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    /// Encode frames, inserting a random number of heartbeats before each
    fn wire_with_heartbeats(frames: &[Frame], max_heartbeats: usize) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        let mut wire = Vec::new();
        for frame in frames {
            for _ in 0..rng.gen_range(0..=max_heartbeats) {
                wire.push(TAG_HEARTBEAT);
            }
            wire.extend_from_slice(&frame.encode());
        }
        wire
    }

    fn sample_blocks() -> Vec<Frame> {
        vec![
            Frame::Block(Bytes::from_static(b"alpha")),
            Frame::Block(Bytes::new()),
            Frame::Block(Bytes::from_static(b"beta")),
        ]
    }

    #[tokio::test]
    async fn test_heartbeats_do_not_change_stream_result() {
        let mut frames = sample_blocks();
        frames.push(Frame::Success);

        for max_heartbeats in [0, 1, 5, 50] {
            let wire = wire_with_heartbeats(&frames, max_heartbeats);
            let mut out = Vec::new();
            let total = wait_for_stream(&wire[..], &mut out, 1024).await.unwrap();
            assert_eq!(total, 9);
            assert_eq!(out, b"alphabeta");
        }
    }

    #[tokio::test]
    async fn test_heartbeats_do_not_change_response_result() {
        for max_heartbeats in [0, 3, 40] {
            let mut wire = wire_with_heartbeats(&[Frame::Success], max_heartbeats);
            wire.extend_from_slice(b"payload");
            let mut rest = wait_for_response(&wire[..]).await.unwrap();
            let mut payload = Vec::new();
            rest.read_to_end(&mut payload).await.unwrap();
            assert_eq!(payload, b"payload");

            let wire = wire_with_heartbeats(&[Frame::Error("drive stale".into())], max_heartbeats);
            match wait_for_response(&wire[..]).await {
                Err(ProtocolError::Remote(msg)) => assert_eq!(msg, "drive stale"),
                other => panic!("expected remote error, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_tag_rejected() {
        let wire = [TAG_HEARTBEAT, 0x7f, TAG_SUCCESS];
        assert!(matches!(
            wait_for_response(&wire[..]).await,
            Err(ProtocolError::UnexpectedTag(0x7f))
        ));
    }

    #[tokio::test]
    async fn test_truncated_block_detected() {
        let mut wire = Frame::Block(Bytes::from_static(b"0123456789")).encode().to_vec();
        wire.truncate(8);
        let mut out = Vec::new();
        assert!(matches!(
            wait_for_stream(&wire[..], &mut out, 1024).await,
            Err(ProtocolError::Truncated)
        ));
    }

    #[tokio::test]
    async fn test_missing_terminal_is_truncated() {
        let wire = [TAG_HEARTBEAT, TAG_HEARTBEAT];
        assert!(matches!(
            wait_for_response(&wire[..]).await,
            Err(ProtocolError::Truncated)
        ));
    }

    #[tokio::test]
    async fn test_oversized_block_rejected() {
        let wire = Frame::Block(Bytes::from(vec![0u8; 32])).encode();
        let mut out = Vec::new();
        assert!(matches!(
            wait_for_stream(&wire[..], &mut out, 16).await,
            Err(ProtocolError::BlockTooLarge { len: 32, max: 16 })
        ));
    }

    #[tokio::test]
    async fn test_block_in_response_is_protocol_error() {
        let wire = Frame::Block(Bytes::from_static(b"x")).encode();
        assert!(matches!(
            wait_for_response(&wire[..]).await,
            Err(ProtocolError::UnexpectedTag(TAG_BLOCK))
        ));
    }
}
