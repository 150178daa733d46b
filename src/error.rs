//! Error types
//!
//! Per-session transport failures never surface here: they are terminal
//! state transitions inside the owning session. These errors cover setup,
//! connection-level failures and the wire codec.

use thiserror::Error;

use crate::protocol::FrameType;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("codec error: {0}")]
    Codec(String),

    /// The channel reached transient failure while waiting to become ready
    #[error("could not connect to {0}")]
    ConnectFailed(String),

    #[error("operation timed out")]
    Timeout,

    /// The event loop this handle belongs to has already finished
    #[error("event loop has shut down")]
    Shutdown,
}

/// Wire protocol violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid preamble magic: {0:02x?}")]
    InvalidMagic([u8; 4]),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("unknown frame type: {0}")]
    UnknownFrameType(u8),

    #[error("frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    #[error("unexpected {0:?} frame")]
    UnexpectedFrame(FrameType),

    #[error("connection closed mid-frame")]
    Truncated,
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}
