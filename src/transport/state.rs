//! Connection lifecycle state machine.
//!
//! [`StateMachine`] holds no socket. The event loop in
//! [`connection`](super::connection) feeds it transport status changes,
//! receive results and send failures, and forwards whatever
//! [`ConnectionEvent`] it returns.
//!
//! # States
//!
//! ```text
//! Idle ─start─► Connecting ─ready─► Ready ─stop─► Closing
//!                   │                 │              │
//!                   └─────────────────┴──────────────┴──► Cancelled | Failed
//! ```
//!
//! Terminal states are absorbing: every later input is ignored, so the
//! closed event is produced at most once.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::{Frame, Message};

use super::classify::{TransportError, is_real};

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Created, not started.
    #[default]
    Idle,
    /// Transport is being established.
    Connecting,
    /// Open for data transfer.
    Ready,
    /// A deliberate stop is in progress.
    Closing,
    /// Torn down without failure.
    Cancelled,
    /// Torn down by a transport failure.
    Failed(TransportError),
}

impl ConnectionState {
    /// Returns `true` for `Cancelled` and `Failed`.
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Failed(_))
    }

    /// Returns `true` only in `Ready`.
    #[inline]
    #[must_use]
    pub const fn can_send(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Ready => write!(f, "ready"),
            Self::Closing => write!(f, "closing"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed(err) => write!(f, "failed({err})"),
        }
    }
}

// ============================================================================
// Inputs & Outputs
// ============================================================================

/// State change reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportStatus {
    /// Handshake completed.
    Ready,
    /// The transport hit a condition but has not resolved.
    Waiting(TransportError),
    /// The transport failed.
    Failed(TransportError),
    /// The transport was cancelled.
    Cancelled,
}

/// Outcome of one receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A framed message arrived.
    Frame(Frame),
    /// The stream ended without a frame.
    EndOfStream,
    /// The read failed.
    Error(TransportError),
}

/// Event emitted by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection became ready.
    Ready,
    /// A real transport error that did not end the connection by itself.
    Error(TransportError),
    /// A decoded data message.
    Message(Message),
    /// The connection reached a terminal state.
    ///
    /// Carries the error only when it was classified as real.
    Closed(Option<TransportError>),
}

/// What the receive loop does after a receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Dispatch the event, if any, and wait for the next message.
    Rearm(Option<ConnectionEvent>),
    /// Stop reading and cancel the connection.
    Cancel,
    /// Stop reading; the transport has failed with the error.
    Halt(Option<ConnectionEvent>, TransportError),
}

/// How to tear the transport down on stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopAction {
    /// Plain cancel (normal closure).
    Cancel,
    /// Send a close frame with the code, then cancel.
    SendClose(CloseCode),
}

// ============================================================================
// StateMachine
// ============================================================================

/// Drives one connection through its lifecycle.
#[derive(Debug, Default)]
pub struct StateMachine {
    state: ConnectionState,
    intentional_close: bool,
}

impl StateMachine {
    /// Creates a machine in `Idle`.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Returns `true` once a deliberate stop was requested.
    #[inline]
    #[must_use]
    pub fn intentional_close(&self) -> bool {
        self.intentional_close
    }

    /// Moves `Idle` to `Connecting`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyConnected`] if the machine was started before.
    pub fn start(&mut self) -> Result<()> {
        if self.state != ConnectionState::Idle {
            return Err(Error::AlreadyConnected);
        }
        self.state = ConnectionState::Connecting;
        Ok(())
    }

    /// Applies a transport state change.
    pub fn on_status(&mut self, status: TransportStatus) -> Option<ConnectionEvent> {
        if self.state.is_terminal() {
            trace!(?status, "Status ignored in terminal state");
            return None;
        }

        match status {
            TransportStatus::Ready => {
                if self.state != ConnectionState::Connecting {
                    return None;
                }
                self.state = ConnectionState::Ready;
                Some(ConnectionEvent::Ready)
            }
            TransportStatus::Waiting(err) => self.report(err),
            TransportStatus::Failed(err) => {
                // After a requested stop the close never carries an error.
                let reported =
                    (!self.intentional_close && is_real(Some(&err), false)).then(|| err.clone());
                self.state = ConnectionState::Failed(err);
                Some(ConnectionEvent::Closed(reported))
            }
            TransportStatus::Cancelled => {
                self.state = ConnectionState::Cancelled;
                Some(ConnectionEvent::Closed(None))
            }
        }
    }

    /// Applies the result of one receive.
    pub fn on_receive(&mut self, received: Received) -> ReceiveOutcome {
        if self.state.is_terminal() {
            return ReceiveOutcome::Cancel;
        }

        match received {
            Received::Frame(frame) if frame.is_final() => ReceiveOutcome::Cancel,
            Received::Frame(frame) => {
                ReceiveOutcome::Rearm(frame.decode().map(ConnectionEvent::Message))
            }
            Received::EndOfStream => ReceiveOutcome::Cancel,
            Received::Error(err) => ReceiveOutcome::Halt(self.report(err.clone()), err),
        }
    }

    /// Applies a failed write.
    pub fn on_send_error(&mut self, err: TransportError) -> Option<ConnectionEvent> {
        if self.state.is_terminal() {
            return None;
        }
        self.report(err)
    }

    /// Marks the close as intentional and decides how to tear down.
    ///
    /// The flag is set before anything else so errors from the teardown
    /// classify as expected. Returns `None` if there is nothing to stop.
    pub fn begin_stop(&mut self, code: CloseCode) -> Option<StopAction> {
        self.intentional_close = true;

        match self.state {
            ConnectionState::Connecting | ConnectionState::Ready => {
                self.state = ConnectionState::Closing;
                if code == CloseCode::Normal {
                    Some(StopAction::Cancel)
                } else {
                    Some(StopAction::SendClose(code))
                }
            }
            _ => None,
        }
    }

    fn report(&self, err: TransportError) -> Option<ConnectionEvent> {
        is_real(Some(&err), self.intentional_close).then_some(ConnectionEvent::Error(err))
    }
}

// ============================================================================
// Tests
// ============================================================================
