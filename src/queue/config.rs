//! Queue configuration

/// Default total weight bound (10 MiB)
pub const DEFAULT_WEIGHT_BOUND: usize = 10 * 1024 * 1024;

/// Default item count bound
pub const DEFAULT_COUNT_BOUND: usize = 10;

/// Bounds for a [`BoundedEventQueue`](super::BoundedEventQueue)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum sum of item weights held at once
    pub weight_bound: usize,

    /// Maximum number of items held at once
    pub count_bound: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            weight_bound: DEFAULT_WEIGHT_BOUND,
            count_bound: DEFAULT_COUNT_BOUND,
        }
    }
}

impl QueueConfig {
    /// Create a config with explicit bounds
    pub fn new(weight_bound: usize, count_bound: usize) -> Self {
        Self::default()
            .weight_bound(weight_bound)
            .count_bound(count_bound)
    }

    /// Set the weight bound (at least 1)
    pub fn weight_bound(mut self, bound: usize) -> Self {
        self.weight_bound = bound.max(1);
        self
    }

    /// Set the count bound (at least 1)
    pub fn count_bound(mut self, bound: usize) -> Self {
        self.count_bound = bound.max(1);
        self
    }
}
