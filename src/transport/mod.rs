//! WebSocket transport layer.
//!
//! This module holds the connection-lifecycle engine: the per-connection
//! state machine and event loop, the error classifier, the outbound client
//! session and the inbound server listener with its registry.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐     ┌──────────────────────────────┐
//! │ ClientSession  │     │ ServerListener               │
//! │  └ Connection  │     │  └ ConnectionRegistry        │
//! └───────┬────────┘     │      ├ id A → Connection     │
//!         │              │      └ id B → Connection     │
//!         │              └──────────────┬───────────────┘
//!         │        EventEnvelope        │
//!         └──────────────┬──────────────┘
//!                        ▼
//!                  EventSender (router)
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Connection::start` - spawn the event loop, begin connecting
//! 2. `ConnectionEvent::Ready` - handshake done, sends are written
//! 3. `ConnectionEvent::Message` / `ConnectionEvent::Error` - while open
//! 4. `Connection::stop` - mark the close intentional, tear down
//! 5. `ConnectionEvent::Closed` - emitted once, then the channel is disarmed
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `classify` | Transport errors and real/expected classification |
//! | `state` | Sans-IO lifecycle state machine |
//! | `connection` | Connection handle and event loop |
//! | `inbound` | Socket reader that leaves text decoding to the connection |
//! | `registry` | Server connections keyed by identity |
//! | `server` | Inbound listener |
//! | `client` | Outbound session |

// ============================================================================
// Submodules
// ============================================================================

/// Transport error classification.
pub mod classify;

/// Outbound client session.
pub mod client;

/// WebSocket connection and event loop.
pub mod connection;

/// Inbound frame relabelling.
pub mod inbound;

/// Registry of live server connections.
pub mod registry;

/// Inbound server listener.
pub mod server;

/// Connection lifecycle state machine.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use classify::{TransportError, is_real};
pub use client::ClientSession;
pub use connection::{
    Connection, ConnectionInfo, EventEnvelope, EventSender, Role, TerminateHook, Transport,
};
pub use inbound::{FrameScanner, InboundKinds, InboundStream};
pub use registry::ConnectionRegistry;
pub use server::{DEFAULT_BIND_IP, ServerListener};
pub use state::{ConnectionEvent, ConnectionState, StateMachine, TransportStatus};
