//! Session context
//!
//! Connection details of an accepted subscriber, carried for logging and
//! statistics.

use std::net::SocketAddr;

use crate::stats::SessionStats;

use super::SessionId;

/// Details of an accepted subscription
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Unique session ID
    pub session_id: SessionId,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Channel requested by the subscriber (empty until subscribed)
    pub channel_id: String,

    /// Delivery statistics
    pub stats: SessionStats,
}

impl SessionContext {
    pub fn new(session_id: SessionId, peer_addr: SocketAddr) -> Self {
        Self {
            session_id,
            peer_addr,
            channel_id: String::new(),
            stats: SessionStats::default(),
        }
    }

    /// Record the subscribed channel
    pub fn with_channel(&mut self, channel_id: impl Into<String>) {
        self.channel_id = channel_id.into();
    }

    /// Record one delivered message
    pub fn record_sent(&mut self, bytes: usize) {
        self.stats.messages_sent += 1;
        self.stats.bytes_sent += bytes as u64;
    }
}
