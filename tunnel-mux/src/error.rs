use thiserror::Error;

/// Errors produced by the stream multiplexer.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown frame type: 0x{0:02x}")]
    UnknownFrameType(u8),

    #[error("data frame payload too large: {len} exceeds max {max}")]
    FrameTooLarge { len: u32, max: u32 },

    #[error("stream {0} already exists")]
    DuplicateStreamId(u32),

    #[error("stream {0} not found")]
    StreamNotFound(u32),

    #[error("stream {0} is closed")]
    StreamClosed(u32),

    #[error("operation not permitted for this mux's role")]
    WrongRole,

    #[error("mux is closed")]
    MuxClosed,
}

pub type Result<T> = std::result::Result<T, MuxError>;
