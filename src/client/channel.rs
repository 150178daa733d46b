//! Client channel
//!
//! Tracks connectivity to the server and hands out connections to
//! subscriber sessions. A probe triggered by `connection_state(true)`
//! parks its connection so the next session starts without dialing.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::runtime::Handle;

use crate::client::config::ClientConfig;
use crate::error::{Error, Result};

/// Connectivity of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// Nothing attempted yet
    Idle,
    /// A connect attempt is in progress
    Connecting,
    /// The last connect attempt succeeded
    Ready,
    /// The last connect attempt failed
    TransientFailure,
    /// The owning manager has shut down
    Shutdown,
}

struct ChannelInner {
    state: ConnectivityState,
    /// Connection established by a probe, not yet used
    parked: Option<TcpStream>,
}

pub(crate) struct Channel {
    config: ClientConfig,
    inner: Mutex<ChannelInner>,
}

impl Channel {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(ChannelInner {
                state: ConnectivityState::Idle,
                parked: None,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectivityState {
        self.inner.lock().state
    }

    /// Start a background connect if the channel is idle or failed
    ///
    /// `runtime` must be driven by a running thread.
    pub fn probe(self: &Arc<Self>, runtime: &Handle) -> ConnectivityState {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                ConnectivityState::Idle | ConnectivityState::TransientFailure => {
                    inner.state = ConnectivityState::Connecting;
                }
                state => return state,
            }
        }

        let channel = Arc::clone(self);
        runtime.spawn(async move {
            match channel.dial().await {
                Ok(stream) => {
                    let mut inner = channel.inner.lock();
                    if inner.state != ConnectivityState::Shutdown {
                        inner.state = ConnectivityState::Ready;
                        inner.parked = Some(stream);
                    }
                }
                Err(e) => {
                    tracing::debug!(target_addr = %channel.config.target, error = %e, "Connect probe failed");
                    channel.set_state(ConnectivityState::TransientFailure);
                }
            }
        });

        ConnectivityState::Connecting
    }

    /// Connection for a new session: the parked one, or a fresh dial
    pub async fn connect(&self) -> Result<TcpStream> {
        {
            let mut inner = self.inner.lock();
            if inner.state == ConnectivityState::Shutdown {
                return Err(Error::Shutdown);
            }
            if let Some(stream) = inner.parked.take() {
                return Ok(stream);
            }
            inner.state = ConnectivityState::Connecting;
        }

        match self.dial().await {
            Ok(stream) => {
                self.set_state(ConnectivityState::Ready);
                Ok(stream)
            }
            Err(e) => {
                self.set_state(ConnectivityState::TransientFailure);
                Err(e)
            }
        }
    }

    /// Mark the channel shut down and drop any parked connection
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.state = ConnectivityState::Shutdown;
        inner.parked = None;
    }

    fn set_state(&self, state: ConnectivityState) {
        let mut inner = self.inner.lock();
        if inner.state != ConnectivityState::Shutdown {
            inner.state = state;
        }
    }

    async fn dial(&self) -> Result<TcpStream> {
        let target = self.config.target;
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(target))
            .await
            .map_err(|_| Error::ConnectFailed(format!("{target}: connect timed out")))?
            .map_err(|e| Error::ConnectFailed(format!("{target}: {e}")))?;

        if self.config.tcp_nodelay {
            stream.set_nodelay(true)?;
        }
        Ok(stream)
    }
}
