//! Size- and count-bounded blocking queue
//!
//! Multiple producers may push concurrently; one logical consumer pops in a
//! loop until it observes the closed state.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use super::config::QueueConfig;

/// Per-item weight function
pub type Weigher<T> = fn(&T) -> usize;

/// Error returned by [`BoundedEventQueue::push`] and friends
///
/// The rejected item is handed back to the caller.
#[derive(Debug, Error)]
pub enum PushError<T> {
    /// The queue was closed
    #[error("queue is closed")]
    Closed(T),

    /// The item alone exceeds the weight bound and can never be admitted
    #[error("item weight exceeds queue weight bound")]
    Oversized(T),

    /// Returned by `try_push` when admitting the item would exceed a bound
    #[error("queue is full")]
    Full(T),
}

impl<T> PushError<T> {
    /// Recover the rejected item
    pub fn into_inner(self) -> T {
        match self {
            PushError::Closed(item) | PushError::Oversized(item) | PushError::Full(item) => item,
        }
    }
}

/// Error returned by the non-blocking and timed pop variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryPopError {
    /// Nothing available yet (or the wait timed out)
    #[error("queue is empty")]
    Empty,

    /// Closed and fully drained
    #[error("queue is closed")]
    Closed,
}

struct QueueState<T> {
    items: VecDeque<(T, usize)>,
    weight: usize,
    closed: bool,
}

impl<T> QueueState<T> {
    fn admits(&self, weight: usize, config: &QueueConfig) -> bool {
        self.items.len() < config.count_bound && self.weight + weight <= config.weight_bound
    }

    fn take(&mut self) -> Option<T> {
        let (item, weight) = self.items.pop_front()?;
        self.weight -= weight;
        Some(item)
    }
}

/// Blocking FIFO bounded by both item count and total item weight
pub struct BoundedEventQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    config: QueueConfig,
    weigher: Weigher<T>,
}

impl<T> BoundedEventQueue<T> {
    /// Create a queue with explicit bounds
    pub fn new(weight_bound: usize, count_bound: usize, weigher: Weigher<T>) -> Self {
        Self::with_config(QueueConfig::new(weight_bound, count_bound), weigher)
    }

    /// Create a queue from a config
    pub fn with_config(config: QueueConfig, weigher: Weigher<T>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(config.count_bound.min(1024)),
                weight: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            config,
            weigher,
        }
    }

    /// Queue bounds
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueue an item, blocking while either bound would be exceeded
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        let weight = (self.weigher)(&item);
        if weight > self.config.weight_bound {
            return Err(PushError::Oversized(item));
        }

        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(PushError::Closed(item));
            }
            if state.admits(weight, &self.config) {
                break;
            }
            self.not_full.wait(&mut state);
        }

        state.items.push_back((item, weight));
        state.weight += weight;
        drop(state);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Enqueue an item only if it fits right now
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        let weight = (self.weigher)(&item);
        if weight > self.config.weight_bound {
            return Err(PushError::Oversized(item));
        }

        let mut state = self.state.lock();
        if state.closed {
            return Err(PushError::Closed(item));
        }
        if !state.admits(weight, &self.config) {
            return Err(PushError::Full(item));
        }

        state.items.push_back((item, weight));
        state.weight += weight;
        drop(state);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue the oldest item, blocking until one is available
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.take() {
                drop(state);
                // Items differ in weight, so a single pop may admit several producers
                self.not_full.notify_all();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Dequeue without blocking
    pub fn try_pop(&self) -> Result<T, TryPopError> {
        let mut state = self.state.lock();
        match state.take() {
            Some(item) => {
                drop(state);
                self.not_full.notify_all();
                Ok(item)
            }
            None if state.closed => Err(TryPopError::Closed),
            None => Err(TryPopError::Empty),
        }
    }

    /// Dequeue, waiting at most `timeout`
    ///
    /// `TryPopError::Empty` means the wait timed out.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<T, TryPopError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.take() {
                drop(state);
                self.not_full.notify_all();
                return Ok(item);
            }
            if state.closed {
                return Err(TryPopError::Closed);
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                return match state.take() {
                    Some(item) => {
                        drop(state);
                        self.not_full.notify_all();
                        Ok(item)
                    }
                    None if state.closed => Err(TryPopError::Closed),
                    None => Err(TryPopError::Empty),
                };
            }
        }
    }

    /// Close the queue
    ///
    /// Blocked producers fail with `PushError::Closed`; the consumer drains
    /// what is left and then observes the closed state.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether the queue holds no items
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Current total weight of queued items
    pub fn weight(&self) -> usize {
        self.state.lock().weight
    }
}
