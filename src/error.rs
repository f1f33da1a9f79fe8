//! Error types for the WebSockets plugin.
//!
//! This module defines the usage errors surfaced synchronously by the
//! boundary operations. Asynchronous transport failures are never returned
//! from a call; they arrive as events carrying a
//! [`TransportError`](crate::TransportError).
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use capacitor_websockets::{Result, WebSockets};
//!
//! fn example(ws: &WebSockets) -> Result<()> {
//!     ws.start_server(8080)?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Server | [`Error::AlreadyRunning`], [`Error::StartFailed`] |
//! | Client | [`Error::AlreadyConnected`], [`Error::InvalidUrl`], [`Error::UnsupportedScheme`] |
//! | Messaging | [`Error::UnknownConnection`], [`Error::NotConnected`], [`Error::InvalidArgument`] |
//! | External | [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Server Errors
    // ========================================================================
    /// A listener is already running.
    #[error("Server already running on port {port}")]
    AlreadyRunning {
        /// Port of the running listener.
        port: u16,
    },

    /// The listener could not be started.
    ///
    /// Returned when the port cannot be parsed or bound.
    #[error("Unable to start WebSocket server: {message}")]
    StartFailed {
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Client Errors
    // ========================================================================
    /// The client session already owns a connection.
    #[error("Client already connected")]
    AlreadyConnected,

    /// The URL could not be parsed.
    #[error("No valid URL provided: {url}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
    },

    /// The URL scheme is not plain `ws`.
    ///
    /// TLS transports are never configured, so `wss` lands here too.
    #[error("Unsupported scheme '{scheme}', only ws:// is supported")]
    UnsupportedScheme {
        /// The rejected scheme.
        scheme: String,
    },

    // ========================================================================
    // Messaging Errors
    // ========================================================================
    /// No server connection is registered under the identifier.
    #[error("Unknown connection: {uuid}")]
    UnknownConnection {
        /// The identifier that was looked up.
        uuid: String,
    },

    /// No client session is active.
    #[error("Not connected")]
    NotConnected,

    /// A required argument is missing or malformed.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates an already running error.
    #[inline]
    pub fn already_running(port: u16) -> Self {
        Self::AlreadyRunning { port }
    }

    /// Creates a start failed error.
    #[inline]
    pub fn start_failed(message: impl Into<String>) -> Self {
        Self::StartFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid URL error.
    #[inline]
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an unsupported scheme error.
    #[inline]
    pub fn unsupported_scheme(scheme: impl Into<String>) -> Self {
        Self::UnsupportedScheme {
            scheme: scheme.into(),
        }
    }

    /// Creates an unknown connection error.
    #[inline]
    pub fn unknown_connection(uuid: impl Into<String>) -> Self {
        Self::UnknownConnection { uuid: uuid.into() }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Codes & Predicates
// ============================================================================

impl Error {
    /// Returns the error code a bridge rejects the call with.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning { .. } => "AlreadyRunningError",
            Self::StartFailed { .. } => "StartFailedError",
            Self::AlreadyConnected => "AlreadyConnectedError",
            Self::InvalidUrl { .. } => "InvalidURLError",
            Self::UnsupportedScheme { .. } => "UnsupportedSchemeError",
            Self::UnknownConnection { .. } => "UnknownConnectionError",
            Self::NotConnected => "NotConnectedError",
            Self::InvalidArgument { .. } => "InvalidArgumentError",
            Self::Json(_) => "JsonError",
        }
    }

    /// Returns `true` if the call was invalid for its arguments or state.
    ///
    /// Usage errors are never retried.
    #[inline]
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        !matches!(self, Self::Json(_))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::already_running(8080);
        assert_eq!(err.to_string(), "Server already running on port 8080");

        let err = Error::unsupported_scheme("wss");
        assert_eq!(
            err.to_string(),
            "Unsupported scheme 'wss', only ws:// is supported"
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::already_running(1).code(), "AlreadyRunningError");
        assert_eq!(Error::start_failed("x").code(), "StartFailedError");
        assert_eq!(Error::AlreadyConnected.code(), "AlreadyConnectedError");
        assert_eq!(Error::invalid_url("x").code(), "InvalidURLError");
        assert_eq!(Error::unsupported_scheme("x").code(), "UnsupportedSchemeError");
        assert_eq!(Error::unknown_connection("x").code(), "UnknownConnectionError");
        assert_eq!(Error::NotConnected.code(), "NotConnectedError");
    }

    #[test]
    fn test_is_usage_error() {
        assert!(Error::AlreadyConnected.is_usage_error());
        assert!(Error::unknown_connection("abc").is_usage_error());
        assert!(Error::invalid_argument("missing").is_usage_error());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<u8>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
        assert_eq!(err.code(), "JsonError");
        assert!(!err.is_usage_error());
    }
}
