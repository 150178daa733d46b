//! Wire protocol constants

/// Magic bytes opening every client connection
pub const PROTOCOL_MAGIC: [u8; 4] = *b"FOVC";

/// Current protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Magic plus version byte
pub const PREAMBLE_SIZE: usize = 5;

/// Frame header: type (1 byte) + body length (4 bytes, big-endian)
pub const FRAME_HEADER_SIZE: usize = 5;

/// Largest body the 4-byte length field can carry
pub const MAX_FRAME_BODY_SIZE: usize = u32::MAX as usize;

/// Largest frame body accepted by default (16 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default port of the event broadcast service
pub const DEFAULT_EVENT_PORT: u16 = 50051;

/// Default port of the notify broadcast service
pub const DEFAULT_NOTIFY_PORT: u16 = 50052;
