//! Session bookkeeping shared by the server and client event loops

pub mod context;
pub mod state;

pub use context::SessionContext;
pub use state::{PublisherPhase, PublisherState};

/// Identity of a session, unique for the lifetime of its event loop
///
/// Doubles as the completion [`Tag`](crate::transport::Tag).
pub type SessionId = u64;
