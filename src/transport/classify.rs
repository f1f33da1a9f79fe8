//! Transport error classification.
//!
//! A deliberate [`stop`](super::Connection::stop) tears the socket down,
//! and the teardown itself surfaces as "not connected" or "cancelled"
//! errors. Those two symptoms are expected once the intentional-close flag
//! is set and are suppressed. Everything else is a real failure.

// ============================================================================
// Imports
// ============================================================================

use std::io::{Error as IoError, ErrorKind};

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// TransportError
// ============================================================================

/// Asynchronous failure reported by the underlying connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The socket is not (or no longer) connected.
    #[error("Socket is not connected")]
    NotConnected,

    /// The operation was cancelled by a local teardown.
    #[error("Operation canceled")]
    Cancelled,

    /// Socket-level failure.
    #[error("{message}")]
    Io {
        /// Kind of the underlying IO error.
        kind: ErrorKind,
        /// Description of the failure.
        message: String,
    },

    /// WebSocket handshake or framing failure.
    #[error("WebSocket protocol error: {message}")]
    Protocol {
        /// Description of the failure.
        message: String,
    },
}

impl TransportError {
    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns `true` for the two symptoms a deliberate stop produces.
    #[inline]
    #[must_use]
    pub const fn is_teardown_symptom(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Cancelled)
    }

    /// Returns `true` if the peer could not be reached at all.
    ///
    /// The connection reports these as a waiting condition before it fails.
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::Io {
                kind: ErrorKind::ConnectionRefused
                    | ErrorKind::HostUnreachable
                    | ErrorKind::NetworkUnreachable
                    | ErrorKind::TimedOut,
                ..
            }
        )
    }
}

impl From<IoError> for TransportError {
    fn from(err: IoError) -> Self {
        match err.kind() {
            ErrorKind::NotConnected => Self::NotConnected,
            kind => Self::Io {
                kind,
                message: err.to_string(),
            },
        }
    }
}

impl From<WsError> for TransportError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::NotConnected,
            WsError::Io(e) => Self::from(e),
            other => Self::protocol(other.to_string()),
        }
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Decides whether an error should be surfaced to the consumer.
///
/// `None` is never real. Teardown symptoms are not real only when the
/// intentional-close flag was already set.
#[inline]
#[must_use]
pub fn is_real(error: Option<&TransportError>, intentional_close: bool) -> bool {
    match error {
        None => false,
        Some(err) => !(intentional_close && err.is_teardown_symptom()),
    }
}

// ============================================================================
// Tests
// ============================================================================
