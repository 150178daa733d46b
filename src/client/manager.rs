//! Connection manager
//!
//! Owns one channel to a server and the event-loop thread that drives its
//! subscriber sessions.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::channel::{Channel, ConnectivityState};
use crate::client::config::ClientConfig;
use crate::client::event_loop::{CancelTokens, ClientLoop, Command};
use crate::client::handler::{Interrupt, MessageHandler};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::session::SessionId;

/// Interval between connectivity polls in [`ConnectionManager::wait_for_ready`]
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cancels the sessions of one manager from anywhere
///
/// Cloneable and detached from the manager's lifetime, so an interrupt
/// handler can hold one.
#[derive(Clone)]
pub struct CancelHandle {
    tokens: CancelTokens,
    interrupt: Option<Interrupt>,
}

impl CancelHandle {
    /// Cancel every active session
    ///
    /// Each session sees its next turn fail and tears down normally. The
    /// handler's interrupt hook runs last, in case the loop is stuck inside
    /// it.
    pub fn cancel_all(&self) {
        {
            let tokens = self.tokens.lock();
            tracing::debug!(sessions = tokens.len(), "Cancelling all sessions");
            for token in tokens.values() {
                token.cancel();
            }
        }
        if let Some(interrupt) = &self.interrupt {
            interrupt();
        }
    }

    /// Number of sessions not yet finished
    pub fn active(&self) -> usize {
        self.tokens.lock().len()
    }
}

/// Subscriber side of one server connection
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use fovcast::client::{handler_fn, ClientConfig, ConnectionManager};
/// use fovcast::message::Event;
///
/// # fn example() -> fovcast::error::Result<()> {
/// let config = ClientConfig::new("127.0.0.1:50051".parse().unwrap());
/// let manager = ConnectionManager::new(
///     config,
///     handler_fn(|event: Event| println!("event {}", event.sdu_id)),
/// )?;
///
/// manager.wait_for_ready(Duration::from_secs(5))?;
/// manager.subscribe("1")?;
/// manager.join();
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager<M: Message> {
    channel: Arc<Channel>,
    runtime: Handle,
    commands: Option<mpsc::UnboundedSender<Command>>,
    cancel: CancelHandle,
    next_id: AtomicU64,
    thread: Option<JoinHandle<()>>,
    _marker: PhantomData<fn() -> M>,
}

impl<M: Message> ConnectionManager<M> {
    /// Create the channel and start the event-loop thread
    ///
    /// No connection is made until a session is subscribed or
    /// connectivity is polled with `try_to_connect`.
    pub fn new(config: ClientConfig, handler: impl MessageHandler<M>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        let target = config.target;
        let channel = Arc::new(Channel::new(config));
        let tokens: CancelTokens = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let interrupt = MessageHandler::<M>::interrupt(&handler);

        let event_loop = ClientLoop::new(rx, Arc::clone(&channel), Box::new(handler), Arc::clone(&tokens));
        let thread = std::thread::Builder::new()
            .name(format!("fovcast-client-{}", target.port()))
            .spawn(move || runtime.block_on(event_loop.run()))?;

        tracing::debug!(target_addr = %target, service = M::SERVICE, "Connection manager started");

        Ok(Self {
            channel,
            runtime: handle,
            commands: Some(tx),
            cancel: CancelHandle { tokens, interrupt },
            next_id: AtomicU64::new(1),
            thread: Some(thread),
            _marker: PhantomData,
        })
    }

    /// Start a subscription on `channel_id`
    ///
    /// Fails with [`Error::Shutdown`] once the event loop has finished.
    pub fn subscribe(&self, channel_id: impl Into<String>) -> Result<SessionId> {
        let commands = self.commands.as_ref().ok_or(Error::Shutdown)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        self.cancel.tokens.lock().insert(id, token.clone());
        let command = Command::Subscribe {
            id,
            channel_id: channel_id.into(),
            token,
        };
        if commands.send(command).is_err() {
            self.cancel.tokens.lock().remove(&id);
            return Err(Error::Shutdown);
        }

        Ok(id)
    }

    /// Current connectivity
    ///
    /// With `try_to_connect`, an idle or failed channel starts a connect
    /// attempt in the background.
    pub fn connection_state(&self, try_to_connect: bool) -> ConnectivityState {
        if try_to_connect && !self.is_finished() {
            return self.channel.probe(&self.runtime);
        }
        self.channel.state()
    }

    /// Block until the channel is ready
    ///
    /// Polls `connection_state(true)`. A failed connect attempt is reported
    /// at once as [`Error::ConnectFailed`]; no ready state within `timeout`
    /// gives [`Error::Timeout`].
    pub fn wait_for_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.connection_state(true) {
                ConnectivityState::Ready => return Ok(()),
                ConnectivityState::TransientFailure => {
                    return Err(Error::ConnectFailed(self.target().to_string()));
                }
                ConnectivityState::Shutdown => return Err(Error::Shutdown),
                ConnectivityState::Idle | ConnectivityState::Connecting => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            std::thread::sleep(READY_POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Cancel every active session
    pub fn cancel_all(&self) {
        self.cancel.cancel_all();
    }

    /// Handle for cancelling from another thread or a signal handler
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Number of sessions not yet finished
    pub fn active_sessions(&self) -> usize {
        self.cancel.active()
    }

    /// Whether the event loop has exited
    pub fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map(|thread| thread.is_finished())
            .unwrap_or(true)
    }

    pub fn target(&self) -> SocketAddr {
        self.channel.config().target
    }

    /// Wait for every session to finish, then shut down
    pub fn join(mut self) {
        // No further subscriptions; lets an unused loop exit
        self.commands = None;
        self.join_loop();
    }

    fn join_loop(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Client event loop panicked");
            }
        }
    }
}

impl<M: Message> Drop for ConnectionManager<M> {
    fn drop(&mut self) {
        self.cancel_all();
        self.commands = None;
        self.join_loop();
        self.channel.shutdown();
        tracing::debug!(target_addr = %self.target(), "Connection manager shut down");
    }
}
