//! WebSocket server listener.
//!
//! The listener accepts TCP connections, wraps each one in a server
//! [`Connection`] and keeps it in the [`ConnectionRegistry`] until it
//! reaches a terminal state.
//!
//! # Connection Flow
//!
//! 1. `start` binds the port and spawns the accept loop
//! 2. On accept, a connection with a fresh identity is registered
//! 3. The connection is started; its handshake runs in its own task
//! 4. On termination, the connection removes itself from the registry
//!    and then emits its closed event
//! 5. `stop` cancels every registered connection and releases the port

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::Message;

use super::connection::{Connection, EventSender, Role, Transport};
use super::registry::ConnectionRegistry;

// ============================================================================
// Constants
// ============================================================================

/// Default bind address (all interfaces).
pub const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Backlog for the listening socket.
const LISTEN_BACKLOG: u32 = 1024;

/// Pause after a failed accept before accepting again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

// ============================================================================
// Types
// ============================================================================

/// A started listener.
struct RunningListener {
    /// Bound port.
    port: u16,
    /// Distinguishes this run from earlier ones.
    generation: u64,
    /// Stops the accept loop when sent or dropped.
    shutdown_tx: oneshot::Sender<()>,
}

/// State shared with the accept loop and terminate hooks.
struct ServerShared {
    bind_ip: IpAddr,
    registry: ConnectionRegistry,
    listener: Mutex<Option<RunningListener>>,
    next_generation: Mutex<u64>,
    events: EventSender,
}

// ============================================================================
// ServerListener
// ============================================================================

/// Accepts inbound WebSocket connections and multiplexes them by identity.
pub struct ServerListener {
    shared: Arc<ServerShared>,
}

impl fmt::Debug for ServerListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerListener")
            .field("bind_ip", &self.shared.bind_ip)
            .field("port", &self.port())
            .field("connection_count", &self.connection_count())
            .finish_non_exhaustive()
    }
}

impl ServerListener {
    /// Creates a stopped listener that binds all interfaces.
    #[must_use]
    pub fn new(events: EventSender) -> Self {
        Self::with_bind_ip(DEFAULT_BIND_IP, events)
    }

    /// Creates a stopped listener that binds `bind_ip`.
    #[must_use]
    pub fn with_bind_ip(bind_ip: IpAddr, events: EventSender) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                bind_ip,
                registry: ConnectionRegistry::new(),
                listener: Mutex::new(None),
                next_generation: Mutex::new(0),
                events,
            }),
        }
    }

    /// Binds `port` and starts accepting connections.
    ///
    /// Port `0` lets the OS pick a free port. Must be called within a
    /// tokio runtime.
    ///
    /// # Returns
    ///
    /// The bound port.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRunning`] if the listener is already started
    /// - [`Error::StartFailed`] if the port cannot be bound
    pub fn start(&self, port: u16) -> Result<u16> {
        let mut slot = self.shared.listener.lock();
        if let Some(running) = slot.as_ref() {
            return Err(Error::already_running(running.port));
        }

        let addr = SocketAddr::new(self.shared.bind_ip, port);
        let listener = bind(addr).map_err(|e| {
            Error::start_failed(format!("Unable to start WebSocket server on port {port}: {e}"))
        })?;
        let bound_port = listener
            .local_addr()
            .map_err(|e| Error::start_failed(e.to_string()))?
            .port();

        let generation = {
            let mut next = self.shared.next_generation.lock();
            *next += 1;
            *next
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(accept_loop(
            Arc::downgrade(&self.shared),
            listener,
            generation,
            shutdown_rx,
        ));

        *slot = Some(RunningListener {
            port: bound_port,
            generation,
            shutdown_tx,
        });

        info!(port = bound_port, "WebSocket server started");
        Ok(bound_port)
    }

    /// Stops accepting and cancels every registered connection.
    ///
    /// Terminate hooks are detached first, so the bulk teardown does not
    /// touch the registry once per connection. Each connection still emits
    /// its own closed event. Calling `stop` again is a no-op.
    pub fn stop(&self) {
        let running = self.shared.listener.lock().take();
        let Some(running) = running else {
            return;
        };
        let _ = running.shutdown_tx.send(());

        let connections = self.shared.registry.drain();
        let count = connections.len();
        for connection in connections {
            connection.detach_terminate_hook();
            connection.stop();
        }

        info!(port = running.port, count, "WebSocket server stopped");
    }

    /// Returns `true` while the listener is started.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.listener.lock().is_some()
    }

    /// Returns the bound port while started.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.shared.listener.lock().as_ref().map(|l| l.port)
    }

    /// Returns a handle to a registered connection.
    #[must_use]
    pub fn connection(&self, id: &ConnectionId) -> Option<Connection> {
        self.shared.registry.get(id)
    }

    /// Returns the identities of all registered connections.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.shared.registry.ids()
    }

    /// Returns the number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Returns `true` if at least one connection is registered.
    #[must_use]
    pub fn has_connections(&self) -> bool {
        !self.shared.registry.is_empty()
    }

    /// Sends a message to one registered connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownConnection`] if `id` is not registered;
    /// nothing is sent in that case.
    pub fn send(&self, id: &ConnectionId, message: Message) -> Result<()> {
        let connection = self
            .shared
            .registry
            .get(id)
            .ok_or_else(|| Error::unknown_connection(id.to_string()))?;
        connection.send(message);
        Ok(())
    }
}

// ============================================================================
// ServerShared - Accept
// ============================================================================

impl ServerShared {
    /// Registers and starts a connection for an accepted socket.
    ///
    /// The connection is registered before it starts, so it can be
    /// resolved by identity as soon as it is ready.
    fn accept(self: &Arc<Self>, generation: u64, stream: TcpStream, addr: SocketAddr) {
        let slot = self.listener.lock();
        if slot.as_ref().map(|l| l.generation) != Some(generation) {
            debug!(?addr, "Listener stopped, dropping accepted socket");
            return;
        }

        let connection = Connection::new(Role::Server, self.events.clone());
        let id = connection.id();

        let shared = Arc::downgrade(self);
        connection.set_terminate_hook(Box::new(move |id| {
            if let Some(shared) = shared.upgrade() {
                shared.registry.remove(&id);
            }
        }));

        if !self.registry.insert(connection.clone()) {
            return;
        }

        if let Err(e) = connection.start(Transport::Accept(stream)) {
            warn!(connection_id = %id, error = %e, "Failed to start server connection");
            self.registry.remove(&id);
            return;
        }

        drop(slot);
        debug!(connection_id = %id, ?addr, "Server started connection");
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Binds a listening socket with local address reuse.
fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// Background task that accepts new connections.
async fn accept_loop(
    shared: Weak<ServerShared>,
    listener: TcpListener,
    generation: u64,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!(generation, "Accept loop started");

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let Some(shared) = shared.upgrade() else {
                        break;
                    };
                    shared.accept(generation, stream, addr);
                }
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
        }
    }

    debug!(generation, "Accept loop terminated");
}

// ============================================================================
// Tests
// ============================================================================
