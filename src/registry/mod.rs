//! Session registry for broadcast fan-out
//!
//! The registry holds a mailbox handle for every subscriber session that
//! has completed its subscribe handshake. Publishing appends to each
//! mailbox; the sessions drain them onto the wire from the event loop.
//!
//! # Architecture
//!
//! ```text
//!                       Arc<SessionRegistry>
//!                  ┌──────────────────────────┐
//!   push(msg) ───► │ sessions: HashMap<Id,    │
//!  (any thread)    │   Arc<Mailbox> >         │
//!                  └─────┬──────────┬─────────┘
//!                        │          │
//!                        ▼          ▼
//!                   [Mailbox]   [Mailbox]
//!                        │          │        (event-loop thread)
//!                        ▼          ▼
//!                 PublisherSession  PublisherSession ──► TCP
//! ```
//!
//! # Ownership
//!
//! Sessions themselves live in the event loop's session table; the
//! registry only shares their mailboxes. Unregistering drops the
//! registry's handle, and releasing the session drops the last one.
//!
//! Messages are cloned once per recipient. The concrete message types keep
//! image data in `bytes::Bytes`, so a clone shares the payload.

pub mod mailbox;
pub mod store;

pub use mailbox::Mailbox;
pub use store::SessionRegistry;
