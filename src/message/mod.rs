//! Message types carried by the broadcast engine
//!
//! The engine itself never looks inside a message; it only needs to clone
//! it for fan-out and serialize it for the wire. Two concrete messages
//! exist: raw detection [`Event`]s and derived [`Notify`] records.

pub mod event;
pub mod notify;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use event::{DetectedObject, Event, Image};
pub use notify::Notify;

/// A payload that can be broadcast
///
/// `SERVICE` names the subscription service in the subscribe request, so a
/// client expecting one message type is rejected by a server of another.
pub trait Message: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Service name used when subscribing
    const SERVICE: &'static str;
}
