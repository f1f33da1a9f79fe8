//! Message and event types.
//!
//! # Overview
//!
//! | Type | Direction | Purpose |
//! |------|-----------|---------|
//! | `Frame` | Transport → Core | Opcode plus raw payload |
//! | `Message` | Both | Decoded text or binary data |
//! | `PluginEvent` | Core → Host | `onOpen`, `onClose`, `onMessage`, `onError` |
//! | `SocketIdentity` | Host → Core | Target connection of `sendMessage` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Opcodes, frames and message decoding |
//! | `event` | Host-facing events and payloads |

// ============================================================================
// Submodules
// ============================================================================

/// Host-facing events and payloads.
pub mod event;

/// Opcodes, frames and message decoding.
pub mod frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use event::{
    CloseData, ErrorData, EventName, MessageData, OpenData, PluginEvent, SocketData,
    SocketIdentity,
};
pub use frame::{Frame, Message, MessageKind, Opcode};
