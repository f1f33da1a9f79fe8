//! Capacitor WebSockets - WebSocket client and server behind an event API.
//!
//! This library runs a WebSocket server, a WebSocket client, or both, and
//! reports everything that happens on them as named events the embedding
//! application subscribes to.
//!
//! # Architecture
//!
//! - **Router**: [`WebSockets`] takes `startServer`, `startClient`, `stop`
//!   and `sendMessage` calls and delivers `onOpen`, `onClose`, `onMessage`
//!   and `onError` events to listeners
//! - **Transport**: one event-loop task per connection, driving a sans-IO
//!   lifecycle state machine over `tokio-tungstenite`
//!
//! Key design principles:
//!
//! - Each connection emits its closed event exactly once, then its event
//!   channel is disarmed
//! - Errors caused by an intentional stop are never reported
//! - Text that is not valid UTF-8 is dropped, never surfaced
//!
//! # Quick Start
//!
//! ```no_run
//! use capacitor_websockets::{EventName, PluginEvent, Result, WebSockets};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let sockets = WebSockets::new_default();
//!
//!     sockets.add_listener(EventName::Message, |event| {
//!         if let PluginEvent::Message(data) = event {
//!             println!("received: {}", data.message);
//!         }
//!     });
//!
//!     sockets.start_client("ws://127.0.0.1:8080")?;
//!     sockets.send_message("ping", None)?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Connection identity |
//! | [`protocol`] | Frames, messages and host events |
//! | [`router`] | [`WebSockets`] facade and listeners |
//! | [`transport`] | Connection lifecycle engine |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Connection identity.
pub mod identifiers;

/// Frames, decoded messages and host-facing events.
pub mod protocol;

/// Host-facing facade and event dispatch.
///
/// Use [`WebSockets::builder()`] to create a configured instance.
pub mod router;

/// WebSocket transport layer.
///
/// Connections, the server listener and the client session.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::ConnectionId;

// Protocol types
pub use protocol::{
    CloseData, ErrorData, EventName, Message, MessageData, MessageKind, OpenData, PluginEvent,
    SocketData, SocketIdentity,
};

// Router types
pub use router::{ClientStarted, ListenerHandle, ServerStarted, WebSockets, WebSocketsBuilder};

// Transport types
pub use transport::{ConnectionState, TransportError};

// Close codes accepted by `stop_with`
pub use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
