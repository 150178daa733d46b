//! Frame layer
//!
//! ```text
//! +--------+----------------+------------------+
//! | type:1 | length:4 (BE)  | body (length)    |
//! +--------+----------------+------------------+
//! ```
//!
//! | type | frame     | body                                   |
//! |------|-----------|----------------------------------------|
//! | 1    | Subscribe | msgpack `SubscribeRequest`             |
//! | 2    | Message   | msgpack message (opaque at this layer) |
//! | 3    | Finish    | msgpack `Status`                       |

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, Result};
use crate::protocol::codec;
use crate::protocol::constants::{FRAME_HEADER_SIZE, MAX_FRAME_BODY_SIZE};
use crate::protocol::status::Status;

/// Frame type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Subscribe = 1,
    Message = 2,
    Finish = 3,
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(FrameType::Subscribe),
            2 => Ok(FrameType::Message),
            3 => Ok(FrameType::Finish),
            other => Err(ProtocolError::UnknownFrameType(other)),
        }
    }
}

/// Body of the subscribe request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Service the client expects, see [`Message::SERVICE`](crate::message::Message::SERVICE)
    pub service: String,
    /// Channel identifier chosen by the client
    pub channel_id: String,
}

impl SubscribeRequest {
    pub fn new(service: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            channel_id: channel_id.into(),
        }
    }
}

/// One protocol frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Subscribe(SubscribeRequest),
    /// Encoded message body
    Message(Bytes),
    Finish(Status),
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Subscribe(_) => FrameType::Subscribe,
            Frame::Message(_) => FrameType::Message,
            Frame::Finish(_) => FrameType::Finish,
        }
    }

    /// Append the encoded frame to `buf`
    pub fn encode(&self, buf: &mut BytesMut, max_size: usize) -> Result<()> {
        let body = match self {
            Frame::Subscribe(request) => codec::encode(request)?,
            Frame::Message(body) => body.clone(),
            Frame::Finish(status) => codec::encode(status)?,
        };

        let max_size = max_size.min(MAX_FRAME_BODY_SIZE);
        if body.len() > max_size {
            return Err(ProtocolError::FrameTooLarge {
                size: body.len(),
                max: max_size,
            }
            .into());
        }

        buf.reserve(FRAME_HEADER_SIZE + body.len());
        buf.put_u8(self.frame_type() as u8);
        buf.put_u32(body.len() as u32);
        buf.put_slice(&body);
        Ok(())
    }

    fn decode_body(frame_type: FrameType, body: Bytes) -> Result<Frame> {
        Ok(match frame_type {
            FrameType::Subscribe => Frame::Subscribe(codec::decode(&body)?),
            FrameType::Message => Frame::Message(body),
            FrameType::Finish => Frame::Finish(codec::decode(&body)?),
        })
    }
}

/// Incremental frame decoder
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_size: usize,
}

impl FrameDecoder {
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    /// Decode one frame from the front of `buf`
    ///
    /// Returns `Ok(None)` when more bytes are needed; consumed bytes are
    /// removed from `buf` only once a whole frame is available.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let frame_type = FrameType::try_from(buf[0])?;
        let length = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        if length > self.max_size {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: self.max_size,
            }
            .into());
        }

        let total = FRAME_HEADER_SIZE + length;
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let body = buf.split_to(length).freeze();
        Frame::decode_body(frame_type, body).map(Some)
    }
}

/// Reads frames from a byte stream
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    decoder: FrameDecoder,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(8 * 1024),
            decoder: FrameDecoder::new(max_size),
        }
    }

    /// Read the next frame
    ///
    /// Returns `Ok(None)` on a clean end of stream between frames.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.buf)? {
                return Ok(Some(frame));
            }

            if self.inner.read_buf(&mut self.buf).await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::Truncated.into());
            }
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }
}

/// Writes frames to a byte stream
pub struct FrameWriter<W> {
    inner: W,
    buf: BytesMut,
    max_size: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W, max_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(8 * 1024),
            max_size,
        }
    }

    /// Encode and write one frame, returning the number of bytes written
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<usize> {
        self.buf.clear();
        frame.encode(&mut self.buf, self.max_size)?;
        self.inner.write_all(&self.buf).await?;
        self.inner.flush().await?;
        Ok(self.buf.len())
    }

    /// Write raw bytes ahead of any frame (the preamble)
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes).await?;
        Ok(())
    }

    /// Shut down the write direction
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::io::Builder;

    use super::*;
    use crate::error::Error;
    use crate::protocol::constants::DEFAULT_MAX_MESSAGE_SIZE;
    use crate::protocol::status::StatusCode;

    fn encoded(frame: &Frame) -> Vec<u8> {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_header_layout() {
        let bytes = encoded(&Frame::Message(Bytes::from_static(b"abc")));

        assert_eq!(bytes, vec![2, 0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_decoder_waits_for_full_frame() {
        let decoder = FrameDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);
        let bytes = encoded(&Frame::Message(Bytes::from_static(b"hello")));

        let mut buf = BytesMut::from(&bytes[..3]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);

        buf.extend_from_slice(&bytes[3..]);
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::Message(Bytes::from_static(b"hello")));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_rejects_unknown_type() {
        let decoder = FrameDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);
        let mut buf = BytesMut::from(&[9u8, 0, 0, 0, 0][..]);

        let result = decoder.decode(&mut buf);
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::UnknownFrameType(9)))
        ));
    }

    #[test]
    fn test_decoder_rejects_oversized_frame() {
        let decoder = FrameDecoder::new(4);
        let mut buf = BytesMut::from(&[2u8, 0, 0, 0, 5][..]);

        let result = decoder.decode(&mut buf);
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::FrameTooLarge { size: 5, max: 4 }))
        ));
    }

    #[test]
    fn test_encode_rejects_oversized_body() {
        let mut buf = BytesMut::new();
        let result = Frame::Message(Bytes::from_static(b"12345")).encode(&mut buf, 4);

        assert!(result.is_err());
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_reader_multiple_frames_and_eof() {
        let subscribe = Frame::Subscribe(SubscribeRequest::new("svc", "42"));
        let finish = Frame::Finish(Status::unavailable("bye"));
        let mut stream = encoded(&subscribe);
        stream.extend(encoded(&finish));

        // Deliver in awkward chunks to exercise buffering
        let (a, b) = stream.split_at(7);
        let mock = Builder::new().read(a).read(b).build();
        let mut reader = FrameReader::new(mock, DEFAULT_MAX_MESSAGE_SIZE);

        assert_eq!(reader.read_frame().await.unwrap(), Some(subscribe));
        match reader.read_frame().await.unwrap() {
            Some(Frame::Finish(status)) => assert_eq!(status.code, StatusCode::Unavailable),
            other => panic!("expected finish frame, got {:?}", other),
        }
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reader_truncated_frame() {
        let bytes = encoded(&Frame::Message(Bytes::from_static(b"hello")));
        let mock = Builder::new().read(&bytes[..6]).build();
        let mut reader = FrameReader::new(mock, DEFAULT_MAX_MESSAGE_SIZE);

        let result = reader.read_frame().await;
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::Truncated))
        ));
    }

    #[tokio::test]
    async fn test_writer() {
        let frame = Frame::Message(Bytes::from_static(b"xy"));
        let mock = Builder::new().write(&encoded(&frame)).build();
        let mut writer = FrameWriter::new(mock, DEFAULT_MAX_MESSAGE_SIZE);

        assert_eq!(writer.write_frame(&frame).await.unwrap(), 7);
    }
}
