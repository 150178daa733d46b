//! Wire protocol
//!
//! A subscription is one TCP connection: preamble, one `Subscribe` frame
//! from the client, then a server-driven stream of `Message` frames ending
//! with a `Finish` frame (or a dropped connection).

pub mod codec;
pub mod constants;
pub mod frame;
pub mod handshake;
pub mod status;

pub use frame::{Frame, FrameDecoder, FrameReader, FrameType, FrameWriter, SubscribeRequest};
pub use handshake::Preamble;
pub use status::{Status, StatusCode};
