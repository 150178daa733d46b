//! Publisher session state machine
//!
//! Tracks the phase of one subscriber connection on the publishing side,
//! from the pending accept to release. The transitions are pure; the I/O
//! driving them lives in `server::session`.

use std::time::Instant;

use super::SessionId;

/// Lifecycle phase of a publisher session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherPhase {
    /// Allocated, no operation issued yet
    Create,
    /// Waiting for a connection and its subscribe request
    Accepting,
    /// Registered; inspecting the mailbox
    Streaming,
    /// A message write is in flight
    AwaitingMailbox,
    /// Unregistered, finish in flight
    Closing,
    /// Released
    Done,
}

/// Phase bookkeeping for one publisher session
#[derive(Debug)]
pub struct PublisherState {
    /// Session id, also the completion tag
    pub id: SessionId,

    /// Current phase
    pub phase: PublisherPhase,

    /// When the session was allocated
    pub created_at: Instant,

    /// When the subscribe request was accepted
    pub accepted_at: Option<Instant>,

    /// Whether a TCP connection has been handed to this session
    connected: bool,
}

impl PublisherState {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            phase: PublisherPhase::Create,
            created_at: Instant::now(),
            accepted_at: None,
            connected: false,
        }
    }

    /// Create → Accepting
    pub fn begin_accept(&mut self) {
        if self.phase == PublisherPhase::Create {
            self.phase = PublisherPhase::Accepting;
        }
    }

    /// Record the TCP accept
    ///
    /// Returns `true` exactly once, when the caller should spawn the sibling
    /// session that waits for the next subscriber.
    pub fn on_connected(&mut self) -> bool {
        if self.phase != PublisherPhase::Accepting || self.connected {
            return false;
        }
        self.connected = true;
        true
    }

    /// Accepting → Streaming, once the subscribe request is validated
    pub fn on_subscribed(&mut self) {
        if self.phase == PublisherPhase::Accepting && self.connected {
            self.phase = PublisherPhase::Streaming;
            self.accepted_at = Some(Instant::now());
        }
    }

    /// Streaming → AwaitingMailbox
    pub fn on_write_started(&mut self) {
        if self.phase == PublisherPhase::Streaming {
            self.phase = PublisherPhase::AwaitingMailbox;
        }
    }

    /// AwaitingMailbox → Streaming
    pub fn on_write_complete(&mut self) {
        if self.phase == PublisherPhase::AwaitingMailbox {
            self.phase = PublisherPhase::Streaming;
        }
    }

    /// Any live phase → Closing
    ///
    /// Returns the phase the session was in, or `None` if it was already
    /// closing or done.
    pub fn close(&mut self) -> Option<PublisherPhase> {
        match self.phase {
            PublisherPhase::Closing | PublisherPhase::Done => None,
            previous => {
                self.phase = PublisherPhase::Closing;
                Some(previous)
            }
        }
    }

    /// Closing → Done
    pub fn finish(&mut self) {
        if self.phase == PublisherPhase::Closing {
            self.phase = PublisherPhase::Done;
        }
    }

    /// Whether the session ever completed its subscribe handshake
    pub fn was_accepted(&self) -> bool {
        self.accepted_at.is_some()
    }

    /// Whether the session is between accept and close
    pub fn is_streaming(&self) -> bool {
        matches!(
            self.phase,
            PublisherPhase::Streaming | PublisherPhase::AwaitingMailbox
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.phase == PublisherPhase::Done
    }

    /// Time since the subscribe was accepted
    pub fn streaming_duration(&self) -> std::time::Duration {
        self.accepted_at
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle() {
        let mut state = PublisherState::new(1);
        assert_eq!(state.phase, PublisherPhase::Create);

        state.begin_accept();
        assert_eq!(state.phase, PublisherPhase::Accepting);

        assert!(state.on_connected());
        assert!(!state.on_connected());

        state.on_subscribed();
        assert_eq!(state.phase, PublisherPhase::Streaming);
        assert!(state.was_accepted());

        state.on_write_started();
        assert_eq!(state.phase, PublisherPhase::AwaitingMailbox);
        assert!(state.is_streaming());

        state.on_write_complete();
        assert_eq!(state.phase, PublisherPhase::Streaming);

        assert_eq!(state.close(), Some(PublisherPhase::Streaming));
        assert_eq!(state.close(), None);

        state.finish();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_subscribe_requires_connection() {
        let mut state = PublisherState::new(1);
        state.begin_accept();

        state.on_subscribed();
        assert_eq!(state.phase, PublisherPhase::Accepting);
        assert!(!state.was_accepted());
    }

    #[test]
    fn test_failed_accept_closes_without_streaming() {
        let mut state = PublisherState::new(2);
        state.begin_accept();

        assert_eq!(state.close(), Some(PublisherPhase::Accepting));
        state.finish();
        assert!(state.is_terminal());
        assert!(!state.was_accepted());
    }
}
