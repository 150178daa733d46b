//! Asynchronous pub/sub broadcast of vision detection events
//!
//! A [`BroadcastServer`] fans every pushed message out to all connected
//! subscribers; a [`ConnectionManager`] subscribes and hands messages to a
//! handler, typically feeding a [`BoundedEventQueue`] drained by a slower
//! consumer. Both sides run their network I/O on one dedicated event-loop
//! thread each, driving per-connection state machines from a completion
//! queue.
//!
//! ```no_run
//! use fovcast::message::Event;
//! use fovcast::{BroadcastServer, ServerConfig};
//!
//! # fn main() -> fovcast::error::Result<()> {
//! let server = BroadcastServer::<Event>::start(ServerConfig::default())?;
//! let reached = server.push(Event::default());
//! println!("delivered to {reached} subscribers");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod message;
pub mod pipeline;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod server;
pub mod session;
pub mod signal;
pub mod stats;
pub mod transport;

pub use client::{ClientConfig, ConnectionManager, ConnectivityState, MessageHandler};
pub use error::{Error, Result};
pub use message::Message;
pub use queue::{BoundedEventQueue, QueueConfig};
pub use server::{BroadcastServer, ServerConfig, WakeStrategy};
