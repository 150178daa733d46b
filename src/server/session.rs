//! Publisher session
//!
//! One subscriber connection on the server side. A session never awaits
//! I/O itself: each turn starts at most one operation through the
//! completion handle and returns. The event loop routes the completion
//! back here by session id and runs the next turn.
//!
//! Besides the main operation, a streaming session keeps a watch on the
//! read half of its socket, so a subscriber that hangs up is noticed even
//! while the mailbox is idle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ProtocolError};
use crate::message::Message;
use crate::protocol::{codec, handshake, Frame, FrameReader, FrameWriter, Status, SubscribeRequest};
use crate::registry::{Mailbox, SessionRegistry};
use crate::server::config::{ServerConfig, WakeStrategy};
use crate::session::{PublisherPhase, PublisherState, SessionContext, SessionId};
use crate::stats::ServerCounters;
use crate::transport::CompletionHandle;

pub(crate) type Reader = FrameReader<OwnedReadHalf>;
pub(crate) type Writer = FrameWriter<OwnedWriteHalf>;

/// Validated subscription handed over by the handshake operation
pub(crate) struct Subscribed {
    pub reader: Reader,
    pub writer: Writer,
    pub request: SubscribeRequest,
}

/// Result of an operation started by a publisher session
pub(crate) enum PublisherEvent {
    /// TCP connection accepted
    Connected(TcpStream, SocketAddr),
    /// Listener failed to accept
    AcceptFailed(String),
    /// Preamble and subscribe request read and validated
    Subscribed(Box<Subscribed>),
    /// Handshake refused; the writer, if still usable, carries the status
    Rejected(Option<Writer>, Status),
    /// Message written; the writer is handed back
    Written(Writer, usize),
    /// Message write failed, the connection is unusable
    WriteFailed(String),
    /// The mailbox may have messages
    Wake,
    /// The subscriber hung up or sent something unexpected
    PeerClosed(Status),
    /// Final status delivered or abandoned
    Finished,
    /// Server shutdown interrupted the operation
    Cancelled,
}

/// What the event loop should do after a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Turn {
    Continue,
    /// Keep this session and create a new one waiting for the next accept
    SpawnSibling,
    /// Remove this session from the table
    Release,
}

/// Loop-owned state shared by every session turn
pub(crate) struct LoopContext<M> {
    pub completions: CompletionHandle<PublisherEvent>,
    pub registry: Arc<SessionRegistry<M>>,
    /// Dropped once the server stops accepting
    pub listener: Option<Arc<TcpListener>>,
    pub config: ServerConfig,
    pub shutdown: CancellationToken,
    pub counters: Arc<ServerCounters>,
}

impl<M: Message> LoopContext<M> {
    fn is_stopping(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn at_capacity(&self) -> bool {
        self.config.max_connections > 0 && self.registry.len() >= self.config.max_connections
    }
}

/// Server side of one subscription
pub(crate) struct PublisherSession<M> {
    state: PublisherState,
    mailbox: Arc<Mailbox<M>>,
    context: Option<SessionContext>,
    /// Present while no write is in flight
    writer: Option<Writer>,
    /// Main operation in flight
    pending: Option<AbortHandle>,
    /// Peer-disconnect watch
    watch: Option<AbortHandle>,
}

impl<M: Message> PublisherSession<M> {
    pub fn new(id: SessionId, mailbox_capacity: usize) -> Self {
        Self {
            state: PublisherState::new(id),
            mailbox: Arc::new(Mailbox::new(mailbox_capacity)),
            context: None,
            writer: None,
            pending: None,
            watch: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.state.id
    }

    pub fn phase(&self) -> PublisherPhase {
        self.state.phase
    }

    /// Registered and not yet closing
    pub fn is_streaming(&self) -> bool {
        self.state.is_streaming()
    }

    /// Issue the accept for the next subscriber
    ///
    /// `delay` postpones the accept, used after the listener failed.
    pub fn start(&mut self, ctx: &LoopContext<M>, delay: Option<Duration>) -> bool {
        let Some(listener) = ctx.listener.as_ref().map(Arc::clone) else {
            return false;
        };
        self.state.begin_accept();

        let nodelay = ctx.config.tcp_nodelay;
        self.pending = Some(ctx.completions.start_cancellable(
            self.id(),
            ctx.shutdown.clone(),
            PublisherEvent::Cancelled,
            async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                match listener.accept().await {
                    Ok((socket, peer)) => {
                        if nodelay {
                            if let Err(e) = socket.set_nodelay(true) {
                                tracing::warn!(error = %e, "Failed to set TCP_NODELAY");
                            }
                        }
                        (true, PublisherEvent::Connected(socket, peer))
                    }
                    Err(e) => (false, PublisherEvent::AcceptFailed(e.to_string())),
                }
            },
        ));
        true
    }

    /// Run one turn for a completion routed to this session
    pub fn proceed(&mut self, ok: bool, event: PublisherEvent, ctx: &LoopContext<M>) -> Turn {
        // Every turn after shutdown begins is a failed turn
        let ok = ok && !ctx.is_stopping();

        match self.state.phase {
            PublisherPhase::Create => {
                self.start(ctx, None);
                Turn::Continue
            }
            PublisherPhase::Accepting => self.on_accepting(ok, event, ctx),
            PublisherPhase::Streaming | PublisherPhase::AwaitingMailbox => {
                self.on_streaming(ok, event, ctx)
            }
            PublisherPhase::Closing => match event {
                PublisherEvent::Finished => {
                    self.state.finish();
                    Turn::Release
                }
                // Late completion of an operation aborted by close
                _ => Turn::Continue,
            },
            PublisherPhase::Done => Turn::Release,
        }
    }

    fn on_accepting(&mut self, ok: bool, event: PublisherEvent, ctx: &LoopContext<M>) -> Turn {
        match event {
            PublisherEvent::Connected(socket, peer) => {
                let spawn_sibling = self.state.on_connected();
                self.context = Some(SessionContext::new(self.id(), peer));
                tracing::debug!(session_id = self.id(), peer = %peer, "New connection");

                if !ok {
                    drop(socket);
                    self.close(Status::unavailable("server shutting down"), ctx);
                } else {
                    self.pending = Some(ctx.completions.start_cancellable(
                        self.id(),
                        ctx.shutdown.clone(),
                        PublisherEvent::Cancelled,
                        read_subscribe::<M>(
                            socket,
                            ctx.config.max_message_size,
                            ctx.config.handshake_timeout,
                        ),
                    ));
                }

                if spawn_sibling {
                    Turn::SpawnSibling
                } else {
                    Turn::Continue
                }
            }
            PublisherEvent::Subscribed(subscribed) => {
                let Subscribed {
                    reader,
                    writer,
                    request,
                } = *subscribed;
                if ok {
                    self.on_subscribed(reader, writer, request, ctx);
                } else {
                    self.writer = Some(writer);
                    self.close(Status::unavailable("server shutting down"), ctx);
                }
                Turn::Continue
            }
            PublisherEvent::Rejected(writer, status) => {
                tracing::debug!(session_id = self.id(), status = %status, "Subscribe rejected");
                self.writer = writer;
                self.close(status, ctx);
                Turn::Continue
            }
            PublisherEvent::AcceptFailed(error) => {
                tracing::error!(error = %error, "Failed to accept connection");
                self.close(Status::unavailable("accept failed"), ctx);
                Turn::Continue
            }
            _ => {
                self.close(Status::unavailable("server shutting down"), ctx);
                Turn::Continue
            }
        }
    }

    fn on_subscribed(
        &mut self,
        reader: Reader,
        writer: Writer,
        request: SubscribeRequest,
        ctx: &LoopContext<M>,
    ) {
        self.writer = Some(writer);

        // The limit counts registered subscribers only; checked after the
        // request is read so the refusal reaches the client
        if ctx.at_capacity() {
            ctx.counters.connection_rejected();
            tracing::warn!(
                session_id = self.id(),
                channel = %request.channel_id,
                "Subscribe rejected: limit reached"
            );
            drop(reader);
            self.close(Status::resource_exhausted("connection limit reached"), ctx);
            return;
        }

        self.state.on_subscribed();
        if let Some(context) = self.context.as_mut() {
            context.with_channel(request.channel_id.as_str());
        }

        if ctx.registry.register(self.id(), Arc::clone(&self.mailbox)) {
            ctx.counters.session_started();
        }
        tracing::info!(
            session_id = self.id(),
            peer = ?self.context.as_ref().map(|c| c.peer_addr),
            channel = %request.channel_id,
            subscribers = ctx.registry.len(),
            "Subscriber joined"
        );

        self.watch = Some(ctx.completions.start_cancellable(
            self.id(),
            ctx.shutdown.clone(),
            PublisherEvent::Cancelled,
            watch_peer(reader),
        ));

        self.stream_next(ctx);
    }

    fn on_streaming(&mut self, ok: bool, event: PublisherEvent, ctx: &LoopContext<M>) -> Turn {
        match event {
            PublisherEvent::Written(writer, bytes) => {
                self.writer = Some(writer);
                self.state.on_write_complete();
                ctx.counters.message_sent(bytes);
                if let Some(context) = self.context.as_mut() {
                    context.record_sent(bytes);
                }

                if ok {
                    self.stream_next(ctx);
                } else {
                    self.close(Status::unavailable("server shutting down"), ctx);
                }
            }
            PublisherEvent::Wake if ok => self.stream_next(ctx),
            PublisherEvent::WriteFailed(error) => {
                tracing::debug!(session_id = self.id(), error = %error, "Write failed");
                self.close(Status::unavailable("write failed"), ctx);
            }
            PublisherEvent::PeerClosed(status) => {
                tracing::debug!(session_id = self.id(), status = %status, "Subscriber hung up");
                self.close(status, ctx);
            }
            _ => self.close(Status::unavailable("server shutting down"), ctx),
        }
        Turn::Continue
    }

    /// Write the next mailbox message, or wait for one
    fn stream_next(&mut self, ctx: &LoopContext<M>) {
        let max_size = ctx.config.max_message_size;

        while let Some(message) = self.mailbox.pop() {
            let body = match codec::encode(&message) {
                Ok(body) if body.len() <= max_size => body,
                Ok(body) => {
                    tracing::warn!(size = body.len(), max = max_size, "Message too large, skipped");
                    self.count_encode_failure();
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode message, skipped");
                    self.count_encode_failure();
                    continue;
                }
            };

            let Some(writer) = self.writer.take() else {
                self.close(Status::internal("writer unavailable"), ctx);
                return;
            };
            self.state.on_write_started();
            self.pending = Some(ctx.completions.start_cancellable(
                self.id(),
                ctx.shutdown.clone(),
                PublisherEvent::Cancelled,
                write_message(writer, body),
            ));
            return;
        }

        self.pending = Some(match ctx.config.wake_strategy {
            WakeStrategy::Notify => {
                let mailbox = Arc::clone(&self.mailbox);
                ctx.completions.start_cancellable(
                    self.id(),
                    ctx.shutdown.clone(),
                    PublisherEvent::Cancelled,
                    async move {
                        mailbox.notified().await;
                        (true, PublisherEvent::Wake)
                    },
                )
            }
            WakeStrategy::Alarm => ctx.completions.set_alarm(self.id(), PublisherEvent::Wake),
        });
    }

    /// Leave the registry and send the final status
    fn close(&mut self, status: Status, ctx: &LoopContext<M>) {
        let Some(previous) = self.state.close() else {
            return;
        };

        // Unregister before the finish write: nothing is appended after this
        if ctx.registry.unregister(self.id()) {
            ctx.counters.session_ended();
            let (peer, sent) = self
                .context
                .as_ref()
                .map(|c| (Some(c.peer_addr), c.stats.messages_sent))
                .unwrap_or((None, 0));
            tracing::info!(
                session_id = self.id(),
                peer = ?peer,
                sent = sent,
                pending = self.mailbox.len(),
                duration_ms = self.state.streaming_duration().as_millis() as u64,
                status = %status,
                "Subscriber left"
            );
        } else {
            tracing::trace!(session_id = self.id(), phase = ?previous, "Session closed before subscribing");
        }

        self.abort_operations();

        let finish_timeout = ctx.config.finish_timeout;
        self.pending = Some(match self.writer.take() {
            Some(mut writer) => ctx.completions.start(self.id(), async move {
                let finish = async {
                    writer.write_frame(&Frame::Finish(status)).await?;
                    writer.shutdown().await
                };
                match tokio::time::timeout(finish_timeout, finish).await {
                    Ok(Ok(())) => (true, PublisherEvent::Finished),
                    _ => (false, PublisherEvent::Finished),
                }
            }),
            None => ctx.completions.set_alarm(self.id(), PublisherEvent::Finished),
        });
    }

    fn count_encode_failure(&mut self) {
        if let Some(context) = self.context.as_mut() {
            context.stats.encode_failures += 1;
        }
    }
}

impl<M> PublisherSession<M> {
    fn abort_operations(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        if let Some(watch) = self.watch.take() {
            watch.abort();
        }
    }
}

impl<M> Drop for PublisherSession<M> {
    fn drop(&mut self) {
        self.abort_operations();
    }
}

/// Read the preamble and subscribe request of a fresh connection
async fn read_subscribe<M: Message>(
    socket: TcpStream,
    max_size: usize,
    timeout: Duration,
) -> (bool, PublisherEvent) {
    let (mut read_half, write_half) = socket.into_split();
    let writer = FrameWriter::new(write_half, max_size);

    let exchange = async move {
        handshake::read_preamble(&mut read_half).await?;
        let mut reader = FrameReader::new(read_half, max_size);
        let frame = reader.read_frame().await?;
        Ok::<_, Error>((reader, frame))
    };

    match tokio::time::timeout(timeout, exchange).await {
        Err(_) => (
            false,
            PublisherEvent::Rejected(
                Some(writer),
                Status::deadline_exceeded("no subscribe request received"),
            ),
        ),
        Ok(Err(e)) => (
            false,
            PublisherEvent::Rejected(Some(writer), Status::invalid_argument(e.to_string())),
        ),
        Ok(Ok((_, None))) => (
            false,
            PublisherEvent::Rejected(None, Status::cancelled("closed before subscribing")),
        ),
        Ok(Ok((reader, Some(Frame::Subscribe(request))))) => {
            if request.service != M::SERVICE {
                let status = Status::unimplemented(format!("unknown service {}", request.service))
                    .with_details(format!("this server provides {}", M::SERVICE));
                return (false, PublisherEvent::Rejected(Some(writer), status));
            }
            (
                true,
                PublisherEvent::Subscribed(Box::new(Subscribed {
                    reader,
                    writer,
                    request,
                })),
            )
        }
        Ok(Ok((_, Some(other)))) => (
            false,
            PublisherEvent::Rejected(
                Some(writer),
                Status::invalid_argument(ProtocolError::UnexpectedFrame(other.frame_type()).to_string())
                    .with_details("expected a subscribe request"),
            ),
        ),
    }
}

async fn write_message(mut writer: Writer, body: Bytes) -> (bool, PublisherEvent) {
    match writer.write_frame(&Frame::Message(body)).await {
        Ok(bytes) => (true, PublisherEvent::Written(writer, bytes)),
        Err(e) => (false, PublisherEvent::WriteFailed(e.to_string())),
    }
}

/// Completes once the subscriber closes its side or misbehaves
async fn watch_peer(mut reader: Reader) -> (bool, PublisherEvent) {
    let status = match reader.read_frame().await {
        Ok(None) => Status::cancelled("subscriber closed the stream"),
        Ok(Some(frame)) => {
            Status::invalid_argument(ProtocolError::UnexpectedFrame(frame.frame_type()).to_string())
                .with_details("nothing is expected after subscribe")
        }
        Err(Error::Io(e)) => Status::from_io(&e),
        Err(e) => Status::invalid_argument(e.to_string()),
    };
    (false, PublisherEvent::PeerClosed(status))
}
