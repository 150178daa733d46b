//! Broadcast server
//!
//! Binds the listener and runs the event loop on a dedicated thread.
//! The handle is what producers hold: `push` fans a message out to every
//! connected subscriber without touching the network.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::message::Message;
use crate::registry::SessionRegistry;
use crate::server::config::ServerConfig;
use crate::server::event_loop::ServerLoop;
use crate::stats::{ServerCounters, ServerStats};

/// Streaming server for one message type
///
/// Dropping the handle shuts the server down.
pub struct BroadcastServer<M: Message> {
    config: ServerConfig,
    registry: Arc<SessionRegistry<M>>,
    counters: Arc<ServerCounters>,
    shutdown: CancellationToken,
    local_addr: SocketAddr,
    thread: Option<JoinHandle<()>>,
}

impl<M: Message> BroadcastServer<M> {
    /// Bind and start serving
    ///
    /// Bind errors are returned here rather than surfacing on the loop
    /// thread.
    pub fn start(config: ServerConfig) -> Result<Self> {
        let std_listener = std::net::TcpListener::bind(config.bind_addr)?;
        std_listener.set_nonblocking(true)?;
        let local_addr = std_listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let registry = Arc::new(SessionRegistry::new());
        let counters = Arc::new(ServerCounters::new());
        let shutdown = CancellationToken::new();

        let thread = {
            let config = config.clone();
            let registry = Arc::clone(&registry);
            let counters = Arc::clone(&counters);
            let shutdown = shutdown.clone();

            std::thread::Builder::new()
                .name(format!("fovcast-server-{}", local_addr.port()))
                .spawn(move || {
                    runtime.block_on(async move {
                        let listener = match TcpListener::from_std(std_listener) {
                            Ok(listener) => listener,
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to register listener");
                                return;
                            }
                        };
                        ServerLoop::new(listener, config, registry, shutdown, counters)
                            .run()
                            .await;
                    });
                })?
        };

        tracing::info!(addr = %local_addr, service = M::SERVICE, "Broadcast server listening");

        Ok(Self {
            config,
            registry,
            counters,
            shutdown,
            local_addr,
            thread: Some(thread),
        })
    }

    /// Broadcast a message to every current subscriber
    ///
    /// Safe from any thread. Returns the number of subscribers reached.
    pub fn push(&self, message: M) -> usize {
        self.registry.publish(message)
    }

    /// Get a reference to the session registry
    pub fn registry(&self) -> &Arc<SessionRegistry<M>> {
        &self.registry
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Number of subscribers currently registered
    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    pub fn stats(&self) -> ServerStats {
        let mut stats = self.counters.snapshot();
        stats.messages_published = self.registry.published_count();
        stats.messages_dropped = self.registry.dropped_count();
        stats
    }

    /// Whether the event loop thread is still running
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|thread| !thread.is_finished())
            .unwrap_or(false)
    }

    /// Stop accepting, close every session and join the loop thread
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        tracing::info!(addr = %self.local_addr, "Shutting down broadcast server");
        self.shutdown.cancel();
        if thread.join().is_err() {
            tracing::error!("Server event loop panicked");
        }
        tracing::debug!(addr = %self.local_addr, "Broadcast server stopped");
    }
}

impl<M: Message> Drop for BroadcastServer<M> {
    fn drop(&mut self) {
        self.stop();
    }
}
