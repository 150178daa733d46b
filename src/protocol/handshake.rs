//! Connection preamble
//!
//! Before any frame, the subscribing side sends a fixed preamble so the
//! server can reject unrelated clients early:
//!
//! ```text
//! Client                                   Server
//!   |                                        |
//!   |------- "FOVC" (4 bytes magic) ------->|
//!   |------- version (1 byte) ------------->|
//!   |------- Subscribe frame -------------->|
//!   |                                        |
//!   |<------ Message frame ... -------------|
//!   |<------ Finish frame (status) ---------|
//! ```
//!
//! The server never answers the preamble itself; a rejected subscription is
//! reported with a `Finish` frame carrying the status.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::{PREAMBLE_SIZE, PROTOCOL_MAGIC, PROTOCOL_VERSION};

/// Parsed connection preamble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preamble {
    pub version: u8,
}

impl Preamble {
    /// Preamble for the version this crate speaks
    pub fn current() -> Self {
        Self {
            version: PROTOCOL_VERSION,
        }
    }

    /// Serialize to the 5 wire bytes
    pub fn encode(&self) -> [u8; PREAMBLE_SIZE] {
        let mut bytes = [0u8; PREAMBLE_SIZE];
        bytes[..4].copy_from_slice(&PROTOCOL_MAGIC);
        bytes[4] = self.version;
        bytes
    }

    /// Parse and validate the 5 wire bytes
    pub fn parse(bytes: &[u8; PREAMBLE_SIZE]) -> std::result::Result<Self, ProtocolError> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        if magic != PROTOCOL_MAGIC {
            return Err(ProtocolError::InvalidMagic(magic));
        }

        let version = bytes[4];
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        Ok(Self { version })
    }
}

/// Send the preamble (client side)
pub async fn write_preamble<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_all(&Preamble::current().encode()).await?;
    Ok(())
}

/// Read and validate the preamble (server side)
pub async fn read_preamble<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Preamble> {
    let mut bytes = [0u8; PREAMBLE_SIZE];
    reader.read_exact(&mut bytes).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::Truncated.into()
        } else {
            crate::error::Error::from(e)
        }
    })?;
    Ok(Preamble::parse(&bytes)?)
}
