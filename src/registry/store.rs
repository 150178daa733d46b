//! Session registry implementation
//!
//! Holds the mailbox of every live session of one broadcast channel and
//! fans published messages out to them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::session::SessionId;

use super::mailbox::Mailbox;

/// Live sessions of one broadcast channel
///
/// A single mutex guards membership and fan-out together: `publish` holds
/// it across the whole fan-out, so concurrent publishers are totally
/// ordered and a session being unregistered either gets a message or not,
/// never half of a publish.
pub struct SessionRegistry<M> {
    sessions: Mutex<HashMap<SessionId, Arc<Mailbox<M>>>>,
    published: AtomicU64,
    /// Drops counted from mailboxes that have since been unregistered
    retired_drops: AtomicU64,
}

impl<M: Clone> SessionRegistry<M> {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            published: AtomicU64::new(0),
            retired_drops: AtomicU64::new(0),
        }
    }

    /// Add a session; returns `false` if it was already registered
    pub fn register(&self, id: SessionId, mailbox: Arc<Mailbox<M>>) -> bool {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&id) {
            return false;
        }
        sessions.insert(id, mailbox);

        tracing::debug!(
            session_id = id,
            sessions = sessions.len(),
            "Session registered"
        );
        true
    }

    /// Remove a session; returns `false` if it was not registered
    pub fn unregister(&self, id: SessionId) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.remove(&id) {
            Some(mailbox) => {
                self.retired_drops
                    .fetch_add(mailbox.dropped(), Ordering::Relaxed);
                tracing::debug!(
                    session_id = id,
                    sessions = sessions.len(),
                    pending = mailbox.len(),
                    "Session unregistered"
                );
                true
            }
            None => false,
        }
    }

    /// Append `message` to every registered mailbox
    ///
    /// Never blocks on I/O. Returns the number of sessions reached.
    pub fn publish(&self, message: M) -> usize {
        let sessions = self.sessions.lock();
        self.published.fetch_add(1, Ordering::Relaxed);

        let count = sessions.len();
        let mut mailboxes = sessions.values();
        // Clone for all but the last recipient, which takes ownership
        for _ in 1..count {
            if let Some(mailbox) = mailboxes.next() {
                if !mailbox.push(message.clone()) {
                    tracing::warn!("Mailbox full, oldest message dropped");
                }
            }
        }
        if let Some(mailbox) = mailboxes.next() {
            if !mailbox.push(message) {
                tracing::warn!("Mailbox full, oldest message dropped");
            }
        }

        count
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().contains_key(&id)
    }

    /// Total calls to `publish`
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Messages dropped from full mailboxes, past and present sessions
    pub fn dropped_count(&self) -> u64 {
        let live: u64 = self.sessions.lock().values().map(|m| m.dropped()).sum();
        live + self.retired_drops.load(Ordering::Relaxed)
    }
}

impl<M: Clone> Default for SessionRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn drain(mailbox: &Mailbox<u32>) -> Vec<u32> {
        std::iter::from_fn(|| mailbox.pop()).collect()
    }

    #[test]
    fn test_register_unregister_idempotent() {
        let registry = SessionRegistry::<u32>::new();
        let mailbox = Arc::new(Mailbox::new(0));

        assert!(registry.register(1, Arc::clone(&mailbox)));
        assert!(!registry.register(1, Arc::clone(&mailbox)));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(1));
        assert!(!registry.unregister(1));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_publish_reaches_members_only() {
        let registry = SessionRegistry::new();
        let a = Arc::new(Mailbox::new(0));
        let b = Arc::new(Mailbox::new(0));
        registry.register(1, Arc::clone(&a));

        assert_eq!(registry.publish(1), 1);
        registry.register(2, Arc::clone(&b));
        assert_eq!(registry.publish(2), 2);
        registry.unregister(1);
        assert_eq!(registry.publish(3), 1);

        // No retroactive delivery, nothing after leaving
        assert_eq!(drain(&a), vec![1, 2]);
        assert_eq!(drain(&b), vec![2, 3]);
        assert_eq!(registry.published_count(), 3);
    }

    #[test]
    fn test_publish_with_no_sessions() {
        let registry = SessionRegistry::<u32>::new();
        assert_eq!(registry.publish(1), 0);
        assert_eq!(registry.published_count(), 1);
    }

    #[test]
    fn test_concurrent_publishers_same_order_everywhere() {
        let registry = Arc::new(SessionRegistry::new());
        let mailboxes: Vec<_> = (0..3)
            .map(|id| {
                let mailbox = Arc::new(Mailbox::new(0));
                registry.register(id, Arc::clone(&mailbox));
                mailbox
            })
            .collect();

        let publishers: Vec<_> = (0..4u32)
            .map(|p| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in 0..100 {
                        registry.publish(p * 1000 + i);
                    }
                })
            })
            .collect();
        for publisher in publishers {
            publisher.join().unwrap();
        }

        let first = drain(&mailboxes[0]);
        assert_eq!(first.len(), 400);
        for mailbox in &mailboxes[1..] {
            assert_eq!(drain(mailbox), first);
        }
    }

    #[test]
    fn test_unregister_keeps_other_sessions_intact() {
        let registry = SessionRegistry::new();
        let a = Arc::new(Mailbox::new(0));
        let b = Arc::new(Mailbox::new(0));
        registry.register(1, Arc::clone(&a));
        registry.register(2, Arc::clone(&b));
        registry.publish(10);

        registry.unregister(1);

        assert!(registry.contains(2));
        assert_eq!(drain(&b), vec![10]);
    }

    #[test]
    fn test_dropped_count_survives_unregister() {
        let registry = SessionRegistry::new();
        let mailbox = Arc::new(Mailbox::new(1));
        registry.register(1, Arc::clone(&mailbox));

        registry.publish(1);
        registry.publish(2);
        assert_eq!(registry.dropped_count(), 1);

        registry.unregister(1);
        assert_eq!(registry.dropped_count(), 1);
    }
}
