//! Events delivered to the embedding application.
//!
//! Connection events are reshaped into the four events the host subscribes
//! to by name. Server-side events carry the connection identity; client
//! events do not.
//!
//! # Event Types
//!
//! | Name | Payload |
//! |------|---------|
//! | `onOpen` | `{ uuid?, host?, port? }` |
//! | `onClose` | `{ uuid?, error? }` |
//! | `onMessage` | `{ message, connection?: { uuid, host, port } }` |
//! | `onError` | `{ uuid?, error }` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::transport::{ConnectionEvent, ConnectionInfo, EventEnvelope, Role};

use super::Message;

// ============================================================================
// EventName
// ============================================================================

/// Name a consumer subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    /// A connection opened.
    #[serde(rename = "onOpen")]
    Open,
    /// A connection closed.
    #[serde(rename = "onClose")]
    Close,
    /// A message arrived.
    #[serde(rename = "onMessage")]
    Message,
    /// A transport error occurred.
    #[serde(rename = "onError")]
    Error,
}

impl EventName {
    /// Returns the host-facing name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "onOpen",
            Self::Close => "onClose",
            Self::Message => "onMessage",
            Self::Error => "onError",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "onOpen" => Ok(Self::Open),
            "onClose" => Ok(Self::Close),
            "onMessage" => Ok(Self::Message),
            "onError" => Ok(Self::Error),
            other => Err(Error::invalid_argument(format!("Unknown event name: {other}"))),
        }
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Identifies a server connection in `sendMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketIdentity {
    /// Connection identity.
    pub uuid: String,
}

impl SocketIdentity {
    /// Creates an identity.
    #[inline]
    #[must_use]
    pub fn new(uuid: impl Into<String>) -> Self {
        Self { uuid: uuid.into() }
    }
}

/// A server connection with its local endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketData {
    /// Connection identity.
    pub uuid: String,
    /// Local host, empty if unknown.
    pub host: String,
    /// Local port, `0` if unknown.
    pub port: u16,
}

impl From<&ConnectionInfo> for SocketData {
    fn from(info: &ConnectionInfo) -> Self {
        Self {
            uuid: info.id.to_string(),
            host: info.host(),
            port: info.port(),
        }
    }
}

/// Payload of `onOpen`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenData {
    /// Connection identity (server only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Local host (server only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Local port (server only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Payload of `onClose`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseData {
    /// Connection identity (server only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Error, present only if the close was a real failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload of `onMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageData {
    /// Message text.
    pub message: String,
    /// Source connection (server only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<SocketData>,
}

/// Payload of `onError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    /// Connection identity (server only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Error description.
    pub error: String,
}

// ============================================================================
// PluginEvent
// ============================================================================

/// An event as the host sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginEvent {
    /// `onOpen`.
    Open(OpenData),
    /// `onClose`.
    Close(CloseData),
    /// `onMessage`.
    Message(MessageData),
    /// `onError`.
    Error(ErrorData),
}

impl PluginEvent {
    /// Reshapes a connection event.
    ///
    /// Returns `None` for binary payloads that are not valid UTF-8; the
    /// host only receives text.
    #[must_use]
    pub fn from_envelope(envelope: EventEnvelope) -> Option<Self> {
        let EventEnvelope { connection, event } = envelope;
        let server = connection.role == Role::Server;
        let uuid = server.then(|| connection.id.to_string());

        let event = match event {
            ConnectionEvent::Ready => Self::Open(OpenData {
                uuid,
                host: server.then(|| connection.host()),
                port: server.then(|| connection.port()),
            }),
            ConnectionEvent::Closed(error) => Self::Close(CloseData {
                uuid,
                error: error.map(|e| e.to_string()),
            }),
            ConnectionEvent::Error(error) => Self::Error(ErrorData {
                uuid,
                error: error.to_string(),
            }),
            ConnectionEvent::Message(message) => {
                let message = match message {
                    Message::Text(text) => text,
                    Message::Binary(data) => String::from_utf8(data).ok()?,
                };
                Self::Message(MessageData {
                    message,
                    connection: server.then(|| SocketData::from(&connection)),
                })
            }
        };

        Some(event)
    }

    /// Returns the name the event is delivered under.
    #[must_use]
    pub const fn name(&self) -> EventName {
        match self {
            Self::Open(_) => EventName::Open,
            Self::Close(_) => EventName::Close,
            Self::Message(_) => EventName::Message,
            Self::Error(_) => EventName::Error,
        }
    }

    /// Returns the JSON payload handed to the host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn payload(&self) -> Result<Value> {
        let value = match self {
            Self::Open(data) => serde_json::to_value(data)?,
            Self::Close(data) => serde_json::to_value(data)?,
            Self::Message(data) => serde_json::to_value(data)?,
            Self::Error(data) => serde_json::to_value(data)?,
        };
        Ok(value)
    }
}

// ============================================================================
// Tests
// ============================================================================
