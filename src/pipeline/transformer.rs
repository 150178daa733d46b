//! Subscribe, transform, re-broadcast
//!
//! A transformer subscribes to one broadcast server, buffers what it reads
//! in a [`BoundedEventQueue`], and republishes derived messages through its
//! own [`BroadcastServer`]:
//!
//! ```text
//!   upstream ──► ConnectionManager<I> ──► QueueSink ──► [queue] ──► run()
//!                  (loop thread)                                    │
//!                                                      transform(I) ▼
//!   subscribers ◄── BroadcastServer<O> ◄─────────────────── push(O)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::client::{ClientConfig, ConnectionManager, QueueSink};
use crate::error::Result;
use crate::message::Message;
use crate::queue::{BoundedEventQueue, QueueConfig, TryPopError, Weigher};
use crate::server::BroadcastServer;
use crate::session::SessionId;

/// How often `run` checks the stop flag while the queue is empty
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Counters returned by [`Transformer::run`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformStats {
    /// Messages taken from the queue
    pub received: u64,
    /// Derived messages pushed downstream
    pub forwarded: u64,
    /// Messages the transform declined
    pub skipped: u64,
}

pub struct Transformer<I: Message, O: Message> {
    client: ConnectionManager<I>,
    queue: Arc<BoundedEventQueue<I>>,
    server: BroadcastServer<O>,
}

impl<I: Message, O: Message> Transformer<I, O> {
    /// Connect upstream through a queue bounded by `queue_config`
    ///
    /// Nothing is read until [`subscribe`](Self::subscribe) is called.
    pub fn new(
        client_config: ClientConfig,
        queue_config: QueueConfig,
        weigher: Weigher<I>,
        server: BroadcastServer<O>,
    ) -> Result<Self> {
        let queue = Arc::new(BoundedEventQueue::with_config(queue_config, weigher));
        let client = ConnectionManager::new(client_config, QueueSink::new(Arc::clone(&queue)))?;

        Ok(Self {
            client,
            queue,
            server,
        })
    }

    pub fn subscribe(&self, channel_id: impl Into<String>) -> Result<SessionId> {
        self.client.subscribe(channel_id)
    }

    pub fn client(&self) -> &ConnectionManager<I> {
        &self.client
    }

    pub fn server(&self) -> &BroadcastServer<O> {
        &self.server
    }

    pub fn queue(&self) -> &Arc<BoundedEventQueue<I>> {
        &self.queue
    }

    /// Consume the queue until upstream ends or `stop` is raised
    ///
    /// Runs on the caller's thread. `transform` returning `None` skips the
    /// message.
    pub fn run<F>(&self, mut transform: F, stop: &AtomicBool) -> TransformStats
    where
        F: FnMut(I) -> Option<O>,
    {
        let mut stats = TransformStats::default();

        while !stop.load(Ordering::Relaxed) {
            let message = match self.queue.pop_timeout(STOP_POLL_INTERVAL) {
                Ok(message) => message,
                Err(TryPopError::Empty) => continue,
                Err(TryPopError::Closed) => break,
            };
            stats.received += 1;

            match transform(message) {
                Some(output) => {
                    let reached = self.server.push(output);
                    stats.forwarded += 1;
                    tracing::trace!(subscribers = reached, "Derived message pushed");
                }
                None => stats.skipped += 1,
            }
        }

        tracing::info!(
            received = stats.received,
            forwarded = stats.forwarded,
            skipped = stats.skipped,
            "Transformer stopped"
        );
        stats
    }
}

impl<I: Message, O: Message> Drop for Transformer<I, O> {
    fn drop(&mut self) {
        // Runs before the client is dropped, so its loop cannot stay parked
        // in a push nobody will pop
        self.queue.close();
    }
}
