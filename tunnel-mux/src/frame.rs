//! Wire framing for the Mux protocol.
//!
//! Every frame starts with a 1-byte type tag followed by a 4-byte
//! big-endian stream id, then a type-specific trailer. `DATA` is the only
//! frame with a variable-length payload, which is itself length-prefixed
//! (u32 big-endian) so a frame-parse failure surfaces quickly instead of
//! silently misinterpreting a tampered carrier as data (see the crate-level
//! error handling notes).
//!
//! This is a from-scratch 4-frame-type layout sized to exactly what this
//! multiplexer's state machine needs (`OPEN`/`DATA`/`CLOSE`/`WINDOW_UPDATE`).
//! The two endpoints are both implemented in this workspace and must only
//! agree with each other — interoperability with any other wire format is
//! explicitly not a goal.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{MuxError, Result};

const TAG_DATA: u8 = 0x01;
const TAG_WINDOW_UPDATE: u8 = 0x08;
const TAG_OPEN: u8 = 0x10;
const TAG_CLOSE: u8 = 0x12;

/// Guards against a corrupted length prefix turning into an unbounded
/// allocation; well above any single write chunk this mux ever emits.
pub const MAX_DATA_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `OPEN`: stream_id(4). Sent by the acceptor to announce a new stream.
    Open { stream_id: u32 },
    /// `DATA`: stream_id(4) + payload_len(4) + payload(N).
    Data { stream_id: u32, payload: Bytes },
    /// `CLOSE`: stream_id(4). Half-closes the sender's direction.
    Close { stream_id: u32 },
    /// `WINDOW_UPDATE`: stream_id(4) + increment(4). Replenishes the peer's
    /// send window for this stream.
    WindowUpdate { stream_id: u32, increment: u32 },
}

impl Frame {
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Open { stream_id }
            | Frame::Data { stream_id, .. }
            | Frame::Close { stream_id }
            | Frame::WindowUpdate { stream_id, .. } => *stream_id,
        }
    }

    /// Write this frame to `w`. Callers are responsible for flushing.
    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> std::io::Result<()> {
        match self {
            Frame::Open { stream_id } => {
                w.write_u8(TAG_OPEN).await?;
                w.write_u32(*stream_id).await?;
            }
            Frame::Data { stream_id, payload } => {
                w.write_u8(TAG_DATA).await?;
                w.write_u32(*stream_id).await?;
                w.write_u32(payload.len() as u32).await?;
                w.write_all(payload).await?;
            }
            Frame::Close { stream_id } => {
                w.write_u8(TAG_CLOSE).await?;
                w.write_u32(*stream_id).await?;
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                w.write_u8(TAG_WINDOW_UPDATE).await?;
                w.write_u32(*stream_id).await?;
                w.write_u32(*increment).await?;
            }
        }
        Ok(())
    }

    /// Read one frame from `r`. An `Io` error (including a clean EOF on the
    /// first byte) signals the carrier is gone; any other error is a
    /// protocol violation (e.g. an unknown tag, an oversized `DATA` length)
    /// and should be treated identically by the caller — both tear the Mux
    /// down.
    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Frame> {
        let tag = r.read_u8().await?;
        let stream_id = r.read_u32().await?;
        match tag {
            TAG_OPEN => Ok(Frame::Open { stream_id }),
            TAG_CLOSE => Ok(Frame::Close { stream_id }),
            TAG_WINDOW_UPDATE => {
                let increment = r.read_u32().await?;
                Ok(Frame::WindowUpdate {
                    stream_id,
                    increment,
                })
            }
            TAG_DATA => {
                let len = r.read_u32().await?;
                if len > MAX_DATA_LEN {
                    return Err(MuxError::FrameTooLarge {
                        len,
                        max: MAX_DATA_LEN,
                    });
                }
                let mut buf = vec![0u8; len as usize];
                r.read_exact(&mut buf).await?;
                Ok(Frame::Data {
                    stream_id,
                    payload: Bytes::from(buf),
                })
            }
            other => Err(MuxError::UnknownFrameType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    async fn roundtrip(frame: Frame) -> Frame {
        let (mut a, mut b) = duplex(64 * 1024);
        frame.write(&mut a).await.unwrap();
        Frame::read(&mut b).await.unwrap()
    }

    #[tokio::test]
    async fn open_roundtrips() {
        let f = Frame::Open { stream_id: 7 };
        assert_eq!(roundtrip(f.clone()).await, f);
    }

    #[tokio::test]
    async fn data_roundtrips_with_empty_payload() {
        let f = Frame::Data {
            stream_id: 3,
            payload: Bytes::new(),
        };
        assert_eq!(roundtrip(f.clone()).await, f);
    }

    #[tokio::test]
    async fn data_roundtrips_with_payload() {
        let f = Frame::Data {
            stream_id: 3,
            payload: Bytes::from_static(b"hello mux"),
        };
        assert_eq!(roundtrip(f.clone()).await, f);
    }

    #[tokio::test]
    async fn close_roundtrips() {
        let f = Frame::Close { stream_id: 9 };
        assert_eq!(roundtrip(f.clone()).await, f);
    }

    #[tokio::test]
    async fn window_update_roundtrips() {
        let f = Frame::WindowUpdate {
            stream_id: 1,
            increment: 65536,
        };
        assert_eq!(roundtrip(f.clone()).await, f);
    }

    #[tokio::test]
    async fn oversized_data_len_is_rejected() {
        let (mut a, mut b) = duplex(64);
        a.write_u8(TAG_DATA).await.unwrap();
        a.write_u32(1).await.unwrap();
        a.write_u32(MAX_DATA_LEN + 1).await.unwrap();
        let err = Frame::read(&mut b).await.unwrap_err();
        assert!(matches!(err, MuxError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn unknown_tag_is_rejected() {
        let (mut a, mut b) = duplex(64);
        a.write_u8(0xFF).await.unwrap();
        a.write_u32(1).await.unwrap();
        let err = Frame::read(&mut b).await.unwrap_err();
        assert!(matches!(err, MuxError::UnknownFrameType(0xFF)));
    }
}
