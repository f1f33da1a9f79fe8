//! Builder for [`WebSockets`] configuration.
//!
//! # Example
//!
//! ```no_run
//! use std::net::{IpAddr, Ipv4Addr};
//!
//! use capacitor_websockets::WebSockets;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sockets = WebSockets::builder()
//!     .bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
//!     .build();
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::IpAddr;

use crate::transport::DEFAULT_BIND_IP;

use super::core::WebSockets;

// ============================================================================
// WebSocketsBuilder
// ============================================================================

/// Builder for configuring a [`WebSockets`] instance.
///
/// Use [`WebSockets::builder()`] to create a new builder.
#[derive(Debug, Clone)]
pub struct WebSocketsBuilder {
    /// Address the server listener binds.
    bind_ip: IpAddr,
}

impl Default for WebSocketsBuilder {
    fn default() -> Self {
        Self {
            bind_ip: DEFAULT_BIND_IP,
        }
    }
}

// ============================================================================
// WebSocketsBuilder Implementation
// ============================================================================

impl WebSocketsBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the address the server listener binds.
    ///
    /// Defaults to `0.0.0.0`.
    #[inline]
    #[must_use]
    pub fn bind_ip(mut self, ip: impl Into<IpAddr>) -> Self {
        self.bind_ip = ip.into();
        self
    }

    /// Builds the instance and spawns its event dispatcher.
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn build(self) -> WebSockets {
        WebSockets::new(self.bind_ip)
    }
}

// ============================================================================
// Tests
// ============================================================================
