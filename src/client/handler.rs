//! Message handlers
//!
//! A handler receives everything a `ConnectionManager` reads, on the
//! manager's event-loop thread. It must not block for long: while it runs,
//! no other session of the same manager makes progress. [`QueueSink`]
//! blocks on purpose, pushing back on the network when its consumer lags.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::protocol::Status;
use crate::queue::{BoundedEventQueue, PushError};
use crate::session::SessionId;

/// Wakes a handler blocked in `on_message` from another thread
pub type Interrupt = Arc<dyn Fn() + Send + Sync>;

/// Receives messages and stream lifecycle callbacks
pub trait MessageHandler<M>: Send + 'static {
    /// A message arrived on some session
    fn on_message(&mut self, message: M);

    /// A session ended with `status`
    fn on_stream_end(&mut self, session: SessionId, status: &Status) {
        let _ = (session, status);
    }

    /// The event loop finished; no further calls follow
    fn on_closed(&mut self) {}

    /// Hook for handlers that may block in `on_message`
    ///
    /// Taken once when the manager is created and run by `cancel_all`,
    /// which also runs when the manager is dropped. Without it, a blocked
    /// handler keeps the event loop from ever seeing the cancellation.
    fn interrupt(&self) -> Option<Interrupt> {
        None
    }
}

/// Handler built from a closure, see [`handler_fn`]
pub struct FnHandler<F, M> {
    f: F,
    _marker: PhantomData<fn(M)>,
}

/// Wrap a closure as a [`MessageHandler`]
pub fn handler_fn<M, F>(f: F) -> FnHandler<F, M>
where
    F: FnMut(M) + Send + 'static,
{
    FnHandler {
        f,
        _marker: PhantomData,
    }
}

impl<M, F> MessageHandler<M> for FnHandler<F, M>
where
    M: 'static,
    F: FnMut(M) + Send + 'static,
{
    fn on_message(&mut self, message: M) {
        (self.f)(message)
    }
}

/// Forwards messages into a bounded queue
///
/// Closes the queue when the event loop finishes, so the consumer's `pop`
/// returns `None` once everything delivered has been drained. Cancelling
/// the manager closes it too, releasing a `push` stuck on a consumer that
/// stopped popping.
pub struct QueueSink<M> {
    queue: Arc<BoundedEventQueue<M>>,
}

impl<M> QueueSink<M> {
    pub fn new(queue: Arc<BoundedEventQueue<M>>) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Arc<BoundedEventQueue<M>> {
        &self.queue
    }
}

impl<M: Send + 'static> MessageHandler<M> for QueueSink<M> {
    fn on_message(&mut self, message: M) {
        match self.queue.push(message) {
            Ok(()) => {}
            Err(PushError::Closed(_)) => {
                tracing::debug!("Queue closed, message discarded");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Message discarded");
            }
        }
    }

    fn on_closed(&mut self) {
        self.queue.close();
    }

    fn interrupt(&self) -> Option<Interrupt> {
        let queue = Arc::clone(&self.queue);
        Some(Arc::new(move || queue.close()))
    }
}
