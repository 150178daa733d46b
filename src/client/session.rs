//! Subscriber session
//!
//! Client side of one subscription. Like its server counterpart it only
//! starts operations and reacts to their completions; the manager's event
//! loop drives it.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::client::channel::Channel;
use crate::client::handler::MessageHandler;
use crate::error::{Error, ProtocolError};
use crate::message::Message;
use crate::protocol::{codec, Frame, FrameReader, FrameWriter, Preamble, Status, StatusCode, SubscribeRequest};
use crate::session::SessionId;
use crate::transport::CompletionHandle;

type Reader = FrameReader<OwnedReadHalf>;
type Writer = FrameWriter<OwnedWriteHalf>;

/// Lifecycle phase of a subscriber session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberPhase {
    /// Connecting and sending the subscribe request
    Start,
    /// A read is in flight
    Reading,
    /// A message is being handed to the handler
    Delivered,
    /// Stream over, closing our side
    Finishing,
    Done,
}

/// Result of an operation started by a subscriber session
pub(crate) enum SubscriberEvent {
    /// Subscribe request sent
    Opened(Reader, Writer),
    /// One message frame
    Received(Reader, Bytes),
    /// The stream ended, by `Finish` frame, failure or cancellation
    Ended(Status),
    /// Our side is closed
    Closed(Status),
}

/// What a session needs from its event loop during a turn
pub(crate) struct SessionEnv<'a, M> {
    pub completions: &'a CompletionHandle<SubscriberEvent>,
    pub channel: &'a Arc<Channel>,
    pub handler: &'a mut (dyn MessageHandler<M> + 'static),
}

pub(crate) struct SubscriberSession {
    id: SessionId,
    channel_id: String,
    phase: SubscriberPhase,
    token: CancellationToken,
    /// Held so the connection stays open while reading
    writer: Option<Writer>,
    pending: Option<AbortHandle>,
    received: u64,
    opened_at: Option<Instant>,
}

impl SubscriberSession {
    pub fn new(id: SessionId, channel_id: String, token: CancellationToken) -> Self {
        Self {
            id,
            channel_id,
            phase: SubscriberPhase::Start,
            token,
            writer: None,
            pending: None,
            received: 0,
            opened_at: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn phase(&self) -> SubscriberPhase {
        self.phase
    }

    /// Connect and send the subscribe request
    pub fn start<M: Message>(&mut self, env: &mut SessionEnv<'_, M>) {
        let request = SubscribeRequest::new(M::SERVICE, self.channel_id.as_str());
        let channel = Arc::clone(env.channel);

        self.pending = Some(env.completions.start_cancellable(
            self.id,
            self.token.clone(),
            SubscriberEvent::Ended(Status::cancelled("cancelled before subscribing")),
            open_stream(channel, request),
        ));
    }

    /// Run one turn; returns `true` when the session is done
    pub fn proceed<M: Message>(
        &mut self,
        ok: bool,
        event: SubscriberEvent,
        env: &mut SessionEnv<'_, M>,
    ) -> bool {
        let ok = ok && !self.token.is_cancelled();

        match (self.phase, event) {
            (SubscriberPhase::Finishing, SubscriberEvent::Closed(status)) => {
                self.phase = SubscriberPhase::Done;
                self.log_end(&status);
                env.handler.on_stream_end(self.id, &status);
                true
            }
            (SubscriberPhase::Finishing | SubscriberPhase::Done, _) => false,
            (SubscriberPhase::Start, SubscriberEvent::Opened(reader, writer)) if ok => {
                self.writer = Some(writer);
                self.opened_at = Some(Instant::now());
                self.phase = SubscriberPhase::Reading;
                tracing::debug!(session_id = self.id, channel = %self.channel_id, "Stream opened");
                self.read(reader, env);
                false
            }
            (SubscriberPhase::Reading, SubscriberEvent::Received(reader, body)) if ok => {
                self.phase = SubscriberPhase::Delivered;
                match codec::decode::<M>(&body) {
                    Ok(message) => {
                        self.received += 1;
                        env.handler.on_message(message);
                        self.phase = SubscriberPhase::Reading;
                        self.read(reader, env);
                    }
                    Err(e) => {
                        let status = Status::internal("failed to decode message")
                            .with_details(e.to_string());
                        self.finish(status, env);
                    }
                }
                false
            }
            (_, SubscriberEvent::Ended(status)) => {
                self.finish(status, env);
                false
            }
            _ => {
                self.finish(Status::cancelled("cancelled by client"), env);
                false
            }
        }
    }

    fn read<M>(&mut self, reader: Reader, env: &mut SessionEnv<'_, M>) {
        self.pending = Some(env.completions.start_cancellable(
            self.id,
            self.token.clone(),
            SubscriberEvent::Ended(Status::cancelled("cancelled by client")),
            read_next(reader),
        ));
    }

    fn finish<M>(&mut self, status: Status, env: &mut SessionEnv<'_, M>) {
        self.phase = SubscriberPhase::Finishing;
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }

        let writer = self.writer.take();
        self.pending = Some(env.completions.start(self.id, async move {
            if let Some(mut writer) = writer {
                // The server may already be gone
                let _ = writer.shutdown().await;
            }
            (true, SubscriberEvent::Closed(status))
        }));
    }

    fn log_end(&self, status: &Status) {
        let duration_ms = self
            .opened_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        match status.code {
            StatusCode::Ok | StatusCode::Cancelled => tracing::info!(
                session_id = self.id,
                channel = %self.channel_id,
                received = self.received,
                duration_ms,
                code = ?status.code,
                message = %status.message,
                details = %status.details,
                "Stream finished"
            ),
            _ => tracing::warn!(
                session_id = self.id,
                channel = %self.channel_id,
                received = self.received,
                duration_ms,
                code = ?status.code,
                message = %status.message,
                details = %status.details,
                "Stream failed"
            ),
        }
    }
}

impl Drop for SubscriberSession {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}

async fn open_stream(channel: Arc<Channel>, request: SubscribeRequest) -> (bool, SubscriberEvent) {
    let max_size = channel.config().max_message_size;
    let stream = match channel.connect().await {
        Ok(stream) => stream,
        Err(e) => {
            let status = Status::unavailable("failed to connect").with_details(e.to_string());
            return (false, SubscriberEvent::Ended(status));
        }
    };

    let (read_half, write_half) = stream.into_split();
    let mut writer = FrameWriter::new(write_half, max_size);
    let sent = async {
        writer.write_raw(&Preamble::current().encode()).await?;
        writer.write_frame(&Frame::Subscribe(request)).await
    };

    match sent.await {
        Ok(_) => (
            true,
            SubscriberEvent::Opened(FrameReader::new(read_half, max_size), writer),
        ),
        Err(e) => (false, SubscriberEvent::Ended(status_for(e))),
    }
}

async fn read_next(mut reader: Reader) -> (bool, SubscriberEvent) {
    let status = match reader.read_frame().await {
        Ok(Some(Frame::Message(body))) => return (true, SubscriberEvent::Received(reader, body)),
        Ok(Some(Frame::Finish(status))) => status,
        Ok(Some(other)) => {
            Status::internal(ProtocolError::UnexpectedFrame(other.frame_type()).to_string())
        }
        Ok(None) => Status::unavailable("connection closed without status"),
        Err(e) => status_for(e),
    };
    (false, SubscriberEvent::Ended(status))
}

fn status_for(error: Error) -> Status {
    match error {
        Error::Io(e) => Status::from_io(&e),
        other => Status::internal(other.to_string()),
    }
}
