//! Per-session mailbox
//!
//! The only piece of a publisher session touched outside the event loop:
//! publishers append from their own threads, the session pops on the loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// FIFO of messages not yet written to one subscriber
pub struct Mailbox<M> {
    queue: Mutex<VecDeque<M>>,
    notify: Notify,
    /// Maximum pending messages (0 = unbounded)
    capacity: usize,
    dropped: AtomicU64,
}

impl<M> Mailbox<M> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a message and wake the session if it is waiting
    ///
    /// With a capacity set, a full mailbox drops its oldest message first.
    /// Returns `false` if a message was dropped.
    pub fn push(&self, message: M) -> bool {
        let mut queue = self.queue.lock();
        let mut kept_all = true;
        if self.capacity > 0 && queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            kept_all = false;
        }
        queue.push_back(message);
        drop(queue);

        self.notify.notify_one();
        kept_all
    }

    /// Take the oldest pending message
    pub fn pop(&self) -> Option<M> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Messages discarded because the mailbox was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Future resolving after the next `push`
    ///
    /// A push that happened since the last wake-up resolves it immediately,
    /// so checking `is_empty` and then awaiting cannot miss a message.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_fifo() {
        let mailbox = Mailbox::new(0);
        mailbox.push(1);
        mailbox.push(2);

        assert_eq!(mailbox.len(), 2);
        assert_eq!(mailbox.pop(), Some(1));
        assert_eq!(mailbox.pop(), Some(2));
        assert_eq!(mailbox.pop(), None);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mailbox = Mailbox::new(2);
        assert!(mailbox.push(1));
        assert!(mailbox.push(2));
        assert!(!mailbox.push(3));

        assert_eq!(mailbox.dropped(), 1);
        assert_eq!(mailbox.pop(), Some(2));
        assert_eq!(mailbox.pop(), Some(3));
    }

    #[tokio::test]
    async fn test_push_before_wait_is_not_lost() {
        let mailbox = Mailbox::new(0);
        mailbox.push("early");

        tokio::time::timeout(Duration::from_secs(1), mailbox.notified())
            .await
            .expect("pending push should resolve the wait");
    }

    #[tokio::test]
    async fn test_push_from_other_thread_wakes_waiter() {
        let mailbox = Arc::new(Mailbox::new(0));

        let pusher = {
            let mailbox = Arc::clone(&mailbox);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                mailbox.push(5u32);
            })
        };

        tokio::time::timeout(Duration::from_secs(1), mailbox.notified())
            .await
            .unwrap();
        assert_eq!(mailbox.pop(), Some(5));
        pusher.join().unwrap();
    }
}
