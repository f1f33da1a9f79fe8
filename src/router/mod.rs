//! Host-facing event router.
//!
//! This module provides the entry point the embedding application talks to.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`WebSockets`] | Server, client and event dispatch |
//! | [`WebSocketsBuilder`] | Fluent configuration builder |
//! | [`ListenerHandle`] | Removes one subscribed listener |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for the facade.
pub mod builder;

/// Facade and event dispatcher.
pub mod core;

/// Listener registry.
pub mod listeners;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::WebSocketsBuilder;
pub use self::core::{ClientStarted, ServerStarted, WebSockets};
pub use listeners::{Listener, ListenerHandle, ListenerRegistry};
