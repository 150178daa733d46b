//! Client event loop
//!
//! Runs on the manager's dedicated thread, starting sessions on request
//! and routing completions to them. Exits once every started session has
//! finished, or when the manager goes away before starting any.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::channel::Channel;
use crate::client::handler::MessageHandler;
use crate::client::session::{SessionEnv, SubscriberEvent, SubscriberSession};
use crate::message::Message;
use crate::session::SessionId;
use crate::transport::{Completion, CompletionHandle, CompletionQueue};

/// Cancellation tokens of the sessions still running
pub(crate) type CancelTokens = Arc<Mutex<HashMap<SessionId, CancellationToken>>>;

pub(crate) enum Command {
    Subscribe {
        id: SessionId,
        channel_id: String,
        token: CancellationToken,
    },
}

pub(crate) struct ClientLoop<M> {
    sessions: HashMap<SessionId, SubscriberSession>,
    completions: CompletionQueue<SubscriberEvent>,
    handle: CompletionHandle<SubscriberEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    channel: Arc<Channel>,
    handler: Box<dyn MessageHandler<M>>,
    tokens: CancelTokens,
}

impl<M: Message> ClientLoop<M> {
    pub fn new(
        commands: mpsc::UnboundedReceiver<Command>,
        channel: Arc<Channel>,
        handler: Box<dyn MessageHandler<M>>,
        tokens: CancelTokens,
    ) -> Self {
        let completions = CompletionQueue::new();
        let handle = completions.handle();
        Self {
            sessions: HashMap::new(),
            completions,
            handle,
            commands,
            channel,
            handler,
            tokens,
        }
    }

    pub async fn run(mut self) {
        let mut started = false;
        let mut commands_open = true;

        loop {
            tokio::select! {
                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => {
                        self.execute(command);
                        started = true;
                    }
                    None => commands_open = false,
                },
                Some(completion) = self.completions.next() => self.dispatch(completion),
                else => break,
            }

            if self.sessions.is_empty() && (started || !commands_open) {
                // A subscribe may have been queued while the last session ended
                match self.commands.try_recv() {
                    Ok(command) => self.execute(command),
                    Err(_) => break,
                }
            }
        }

        self.completions.shutdown();
        let residual = self.completions.drain();
        tracing::debug!(residual, target_addr = %self.channel.config().target, "Client event loop stopped");
        self.handler.on_closed();
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Subscribe {
                id,
                channel_id,
                token,
            } => {
                let mut session = SubscriberSession::new(id, channel_id, token);
                let mut env = SessionEnv {
                    completions: &self.handle,
                    channel: &self.channel,
                    handler: self.handler.as_mut(),
                };
                session.start(&mut env);
                tracing::debug!(session_id = id, "Session started");
                self.sessions.insert(session.id(), session);
            }
        }
    }

    fn dispatch(&mut self, completion: Completion<SubscriberEvent>) {
        let Completion { tag, ok, event } = completion;
        let Some(session) = self.sessions.get_mut(&tag) else {
            tracing::trace!(tag, "Completion for released session ignored");
            return;
        };

        let mut env = SessionEnv {
            completions: &self.handle,
            channel: &self.channel,
            handler: self.handler.as_mut(),
        };

        if session.proceed(ok, event, &mut env) {
            tracing::trace!(session_id = tag, phase = ?session.phase(), "Session released");
            self.sessions.remove(&tag);
            self.tokens.lock().remove(&tag);
        }
    }
}
