//! Client configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::constants::{DEFAULT_EVENT_PORT, DEFAULT_MAX_MESSAGE_SIZE, MAX_FRAME_BODY_SIZE};

/// Subscriber connection options
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server to subscribe to
    pub target: SocketAddr,

    /// Time allowed for one TCP connect attempt
    pub connect_timeout: Duration,

    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,

    /// Largest frame body accepted from the server
    pub max_message_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            target: SocketAddr::from(([127, 0, 0, 1], DEFAULT_EVENT_PORT)),
            connect_timeout: Duration::from_secs(5),
            tcp_nodelay: true,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ClientConfig {
    /// Config for the given server address
    pub fn new(target: SocketAddr) -> Self {
        Self {
            target,
            ..Default::default()
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Capped at what the frame length field can express
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size.min(MAX_FRAME_BODY_SIZE);
        self
    }
}
