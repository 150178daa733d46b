//! Broadcast server
//!
//! ```text
//!  producer thread(s)            server thread (current-thread runtime)
//!  ──────────────────            ─────────────────────────────────────
//!  server.push(msg) ──► registry ──► mailboxes ──► PublisherSession ──► TCP
//!                                                      ▲      │
//!                                                      │      ▼ start op
//!                                   ServerLoop ◄── completion queue
//! ```

pub mod config;
mod event_loop;
pub mod listener;
mod session;

pub use config::{ServerConfig, WakeStrategy};
pub use listener::BroadcastServer;

use crate::message::{Event, Notify};

/// Server streaming raw detection events
pub type EventServer = BroadcastServer<Event>;

/// Server streaming derived notifications
pub type NotifyServer = BroadcastServer<Notify>;
