//! Statistics for broadcast sessions

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Session-level statistics
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Messages written to the subscriber
    pub messages_sent: u64,
    /// Frame bytes written to the subscriber
    pub bytes_sent: u64,
    /// Messages that failed to encode and were skipped
    pub encode_failures: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Average frame size in bytes
    pub fn average_message_size(&self) -> u64 {
        if self.messages_sent > 0 {
            self.bytes_sent / self.messages_sent
        } else {
            0
        }
    }
}

/// Server-wide statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Subscribers accepted since start
    pub total_sessions: u64,
    /// Subscribers currently streaming
    pub active_sessions: u64,
    /// Calls to `push`
    pub messages_published: u64,
    /// Messages written across all sessions
    pub messages_sent: u64,
    /// Frame bytes written across all sessions
    pub bytes_sent: u64,
    /// Messages dropped from full mailboxes
    pub messages_dropped: u64,
    /// Connections refused by the connection limit
    pub rejected_connections: u64,
    /// Time since the server started
    pub uptime: Duration,
}

/// Live counters shared between a server handle and its event loop
#[derive(Debug)]
pub struct ServerCounters {
    started_at: Instant,
    total_sessions: AtomicU64,
    active_sessions: AtomicU64,
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
    rejected_connections: AtomicU64,
}

impl ServerCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_sessions: AtomicU64::new(0),
            active_sessions: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            rejected_connections: AtomicU64::new(0),
        }
    }

    pub fn session_started(&self) {
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_ended(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot; registry-owned figures are filled in by the caller
    pub fn snapshot(&self) -> ServerStats {
        ServerStats {
            total_sessions: self.total_sessions.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            messages_published: 0,
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            messages_dropped: 0,
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for ServerCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_stats_new() {
        let stats = SessionStats::new();
        assert_eq!(stats.messages_sent, 0);
        assert_eq!(stats.bytes_sent, 0);
        assert_eq!(stats.encode_failures, 0);
        assert_eq!(stats.average_message_size(), 0);
    }

    #[test]
    fn test_average_message_size() {
        let stats = SessionStats {
            messages_sent: 4,
            bytes_sent: 1000,
            ..Default::default()
        };

        assert_eq!(stats.average_message_size(), 250);
    }

    #[test]
    fn test_server_counters_snapshot() {
        let counters = ServerCounters::new();
        counters.session_started();
        counters.session_started();
        counters.session_ended();
        counters.message_sent(10);
        counters.message_sent(20);
        counters.connection_rejected();

        let stats = counters.snapshot();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.active_sessions, 1);
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.bytes_sent, 30);
        assert_eq!(stats.rejected_connections, 1);
    }
}
