//! Delivery statistics

pub mod metrics;

pub use metrics::{ServerCounters, ServerStats, SessionStats};
