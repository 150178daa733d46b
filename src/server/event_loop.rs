//! Server event loop
//!
//! Runs on the server's dedicated thread. Owns the session table and is
//! the only place sessions are created, driven and released.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::message::Message;
use crate::registry::SessionRegistry;
use crate::server::config::ServerConfig;
use crate::server::session::{LoopContext, PublisherEvent, PublisherSession, Turn};
use crate::session::SessionId;
use crate::stats::ServerCounters;
use crate::transport::{Completion, CompletionQueue};

/// Pause before re-arming the accept after the listener failed
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

pub(crate) struct ServerLoop<M> {
    sessions: HashMap<SessionId, PublisherSession<M>>,
    completions: CompletionQueue<PublisherEvent>,
    ctx: LoopContext<M>,
    next_id: SessionId,
    /// Session currently waiting on the listener
    acceptor: Option<SessionId>,
}

impl<M: Message> ServerLoop<M> {
    pub fn new(
        listener: TcpListener,
        config: ServerConfig,
        registry: Arc<SessionRegistry<M>>,
        shutdown: CancellationToken,
        counters: Arc<ServerCounters>,
    ) -> Self {
        let completions = CompletionQueue::new();
        let ctx = LoopContext {
            completions: completions.handle(),
            registry,
            listener: Some(Arc::new(listener)),
            config,
            shutdown,
            counters,
        };

        Self {
            sessions: HashMap::new(),
            completions,
            ctx,
            next_id: 1,
            acceptor: None,
        }
    }

    /// Process completions until shutdown has drained every session
    pub async fn run(mut self) {
        self.spawn_acceptor(None);

        let shutdown = self.ctx.shutdown.clone();
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                completion = self.completions.next() => match completion {
                    Some(completion) => self.dispatch(completion),
                    None => break,
                },
                _ = shutdown.cancelled(), if deadline.is_none() => {
                    tracing::info!(sessions = self.sessions.len(), "Stopping event loop");
                    // Stop accepting; pending operations fail through the token
                    self.ctx.listener = None;
                    deadline = Some(Instant::now() + self.ctx.config.shutdown_timeout);
                }
                _ = sleep_until(deadline), if deadline.is_some() => {
                    tracing::warn!(
                        sessions = self.sessions.len(),
                        "Shutdown timeout, abandoning remaining sessions"
                    );
                    break;
                }
            }

            if deadline.is_some() && self.sessions.is_empty() {
                break;
            }
        }

        self.completions.shutdown();
        let residual = self.completions.drain();
        let mut abandoned = 0;
        for (id, session) in self.sessions.drain() {
            if session.is_streaming() && self.ctx.registry.unregister(id) {
                self.ctx.counters.session_ended();
                abandoned += 1;
            }
        }
        tracing::debug!(residual, abandoned, "Event loop stopped");
    }

    fn dispatch(&mut self, completion: Completion<PublisherEvent>) {
        let Completion { tag, ok, event } = completion;
        let Some(session) = self.sessions.get_mut(&tag) else {
            tracing::trace!(tag, "Completion for released session ignored");
            return;
        };

        match session.proceed(ok, event, &self.ctx) {
            Turn::Continue => {}
            Turn::SpawnSibling => {
                if self.acceptor == Some(tag) {
                    self.acceptor = None;
                }
                self.spawn_acceptor(None);
            }
            Turn::Release => self.release(tag),
        }
    }

    fn release(&mut self, id: SessionId) {
        if let Some(session) = self.sessions.remove(&id) {
            tracing::trace!(session_id = id, phase = ?session.phase(), "Session released");
        }
        self.ctx.registry.unregister(id);

        // A failed accept must not leave the listener without a waiter
        if self.acceptor == Some(id) {
            self.acceptor = None;
            self.spawn_acceptor(Some(ACCEPT_RETRY_DELAY));
        }
    }

    fn spawn_acceptor(&mut self, delay: Option<Duration>) {
        let id = self.next_id;
        let mut session = PublisherSession::new(id, self.ctx.config.mailbox_capacity);
        if !session.start(&self.ctx, delay) {
            // Listener already dropped
            return;
        }

        self.next_id += 1;
        self.sessions.insert(id, session);
        self.acceptor = Some(id);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
