//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::constants::{DEFAULT_EVENT_PORT, DEFAULT_MAX_MESSAGE_SIZE, MAX_FRAME_BODY_SIZE};

/// How a streaming session waits when its mailbox is empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeStrategy {
    /// Park until `push` touches the mailbox
    Notify,
    /// Re-enter the state machine through a zero-delay alarm and poll again
    Alarm,
}

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent subscribers (0 = unlimited)
    pub max_connections: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Largest frame body sent or accepted
    pub max_message_size: usize,

    /// Pending messages kept per subscriber (0 = unbounded)
    pub mailbox_capacity: usize,

    /// Idle behaviour of streaming sessions
    pub wake_strategy: WakeStrategy,

    /// Preamble and subscribe request must arrive within this time
    pub handshake_timeout: Duration,

    /// Time allowed for writing the final status of a stream
    pub finish_timeout: Duration,

    /// Time allowed for sessions to wind down on shutdown
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_EVENT_PORT)),
            max_connections: 0, // Unlimited
            tcp_nodelay: true,  // Important for low latency
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            mailbox_capacity: 0,
            wake_strategy: WakeStrategy::Notify,
            handshake_timeout: Duration::from_secs(10),
            finish_timeout: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the maximum message size
    ///
    /// Capped at what the frame length field can express.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size.min(MAX_FRAME_BODY_SIZE);
        self
    }

    /// Set the per-subscriber mailbox capacity
    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    /// Set the idle wake strategy
    pub fn wake_strategy(mut self, strategy: WakeStrategy) -> Self {
        self.wake_strategy = strategy;
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set shutdown timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}
