//! Subscriber client
//!
//! A [`ConnectionManager`] subscribes to a broadcast server and hands each
//! received message to a [`MessageHandler`] on its own event-loop thread:
//! - Connectivity polling and the connect-wait loop
//! - Any number of subscriptions over one channel
//! - Cooperative cancellation through [`CancelHandle`]

pub mod channel;
pub mod config;
mod event_loop;
pub mod handler;
pub mod manager;
pub mod session;

pub use channel::ConnectivityState;
pub use config::ClientConfig;
pub use handler::{handler_fn, FnHandler, Interrupt, MessageHandler, QueueSink};
pub use manager::{CancelHandle, ConnectionManager};
pub use session::SubscriberPhase;

use crate::message::{Event, Notify};

/// Subscriber of raw detection events
pub type EventClient = ConnectionManager<Event>;

/// Subscriber of derived notifications
pub type NotifyClient = ConnectionManager<Notify>;
