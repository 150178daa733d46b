//! Bounded handoff queue between the network thread and slow consumers
//!
//! The event-loop thread must hand messages to code that renders, writes
//! files or republishes, and that code can be much slower than the network.
//! [`BoundedEventQueue`] caps both the number of queued messages and their
//! total weight (typically encoded image bytes), so memory stays bounded
//! when the consumer falls behind. A full queue blocks the producer, which
//! in turn stops the event loop from reading and pushes back on the peer.
//!
//! ```text
//!   event loop ──push()──► [ m1 | m2 | m3 ]  ──pop()──► consumer
//!                          count ≤ count_bound
//!                          weight ≤ weight_bound
//! ```

pub mod bounded;
pub mod config;

pub use bounded::{BoundedEventQueue, PushError, TryPopError, Weigher};
pub use config::QueueConfig;
