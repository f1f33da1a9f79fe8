//! Outbound WebSocket client session.
//!
//! A [`ClientSession`] owns at most one [`Connection`]. Starting while a
//! connection is alive is rejected; the slot frees itself when the
//! connection reaches a terminal state, after which `start` may be called
//! again.
//!
//! Only `ws://` URLs are accepted. TLS is never configured, so `wss://`
//! is rejected with [`Error::UnsupportedScheme`] instead of silently
//! connecting without encryption.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::Message;

use super::connection::{Connection, EventSender, Role, Transport};

// ============================================================================
// Constants
// ============================================================================

/// The only accepted URL scheme.
const SUPPORTED_SCHEME: &str = "ws";

// ============================================================================
// ClientSession
// ============================================================================

/// Holds zero or one outbound connection.
pub struct ClientSession {
    connection: Arc<Mutex<Option<Connection>>>,
    events: EventSender,
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("connection", &*self.connection.lock())
            .finish_non_exhaustive()
    }
}

impl ClientSession {
    /// Creates a session with no connection.
    #[must_use]
    pub fn new(events: EventSender) -> Self {
        Self {
            connection: Arc::new(Mutex::new(None)),
            events,
        }
    }

    /// Connects to `url`.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyConnected`] if a connection exists
    /// - [`Error::InvalidUrl`] if `url` does not parse
    /// - [`Error::UnsupportedScheme`] if the scheme is not `ws`
    pub fn start(&self, url: &str) -> Result<()> {
        let mut slot = self.connection.lock();
        if slot.is_some() {
            return Err(Error::AlreadyConnected);
        }

        let url = parse_url(url)?;
        debug!(%url, "Client connection starting");

        let connection = Connection::new(Role::Client, self.events.clone());
        let owner = Arc::downgrade(&self.connection);
        connection.set_terminate_hook(Box::new(move |id| {
            let Some(owner) = owner.upgrade() else {
                return;
            };
            let mut slot = owner.lock();
            if slot.as_ref().is_some_and(|c| c.id() == id) {
                *slot = None;
            }
        }));

        *slot = Some(connection.clone());
        drop(slot);

        connection.start(Transport::Connect(url))
    }

    /// Stops the connection with a normal closure.
    pub fn stop(&self) {
        self.stop_with(CloseCode::Normal);
    }

    /// Stops the connection, sending `code` if it is not a normal closure.
    pub fn stop_with(&self, code: CloseCode) {
        if let Some(connection) = self.current() {
            connection.stop_with(code);
        }
    }

    /// Sends a message; a no-op without a connection.
    pub fn send(&self, message: Message) {
        if let Some(connection) = self.current() {
            connection.send(message);
        }
    }

    /// Sends a text message; a no-op without a connection.
    #[inline]
    pub fn send_text(&self, text: impl Into<String>) {
        self.send(Message::Text(text.into()));
    }

    /// Sends a binary message; a no-op without a connection.
    #[inline]
    pub fn send_binary(&self, data: impl Into<Vec<u8>>) {
        self.send(Message::Binary(data.into()));
    }

    /// Returns `true` while a connection exists.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    /// Returns a handle to the current connection.
    #[must_use]
    pub fn current(&self) -> Option<Connection> {
        self.connection.lock().clone()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Parses a URL and checks its scheme.
fn parse_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|_| Error::invalid_url(url))?;
    if parsed.scheme() != SUPPORTED_SCHEME {
        return Err(Error::unsupported_scheme(parsed.scheme()));
    }
    Ok(parsed)
}

// ============================================================================
// Tests
// ============================================================================
