//! WebSocket plugin facade.
//!
//! [`WebSockets`] owns one [`ServerListener`] and one [`ClientSession`] that
//! share a single event channel. A dispatcher task drains that channel in
//! order, reshapes each event for the host and hands it to the registered
//! listeners.
//!
//! # Example
//!
//! ```no_run
//! use capacitor_websockets::{EventName, PluginEvent, WebSockets};
//!
//! # #[tokio::main]
//! # async fn main() -> capacitor_websockets::Result<()> {
//! let sockets = WebSockets::new_default();
//! sockets.add_listener(EventName::Message, |event| {
//!     if let PluginEvent::Message(data) = event {
//!         println!("received {}", data.message);
//!     }
//! });
//!
//! let started = sockets.start_server(8080)?;
//! println!("listening on {}", started.port);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::{EventName, Message, PluginEvent, SocketIdentity};
use crate::transport::{ClientSession, DEFAULT_BIND_IP, EventEnvelope, ServerListener};

use super::builder::WebSocketsBuilder;
use super::listeners::{ListenerHandle, ListenerRegistry};

// ============================================================================
// Results
// ============================================================================

/// Resolved value of [`WebSockets::start_server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStarted {
    /// The bound port.
    pub port: u16,
}

/// Resolved value of [`WebSockets::start_client`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStarted {
    /// The URL as given.
    pub url: String,
}

// ============================================================================
// Types
// ============================================================================

/// Internal shared state.
struct WebSocketsInner {
    server: ServerListener,
    client: ClientSession,
    listeners: Arc<ListenerRegistry>,
    dispatcher: JoinHandle<()>,
}

impl Drop for WebSocketsInner {
    fn drop(&mut self) {
        self.server.stop();
        self.client.stop();
        self.dispatcher.abort();
    }
}

// ============================================================================
// WebSockets
// ============================================================================

/// WebSocket client and server exposed through an event-listener API.
#[derive(Clone)]
pub struct WebSockets {
    inner: Arc<WebSocketsInner>,
}

impl fmt::Debug for WebSockets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSockets")
            .field("server_port", &self.server_port())
            .field("connection_count", &self.connection_count())
            .field("client_connected", &self.is_client_connected())
            .field("listeners", &self.inner.listeners.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// WebSockets - Construction
// ============================================================================

impl WebSockets {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> WebSocketsBuilder {
        WebSocketsBuilder::new()
    }

    /// Creates an instance whose server binds all interfaces.
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn new_default() -> Self {
        Self::new(DEFAULT_BIND_IP)
    }

    /// Creates an instance whose server binds `bind_ip`.
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub(crate) fn new(bind_ip: IpAddr) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let listeners = Arc::new(ListenerRegistry::new());
        let dispatcher = tokio::spawn(dispatch_loop(events_rx, Arc::clone(&listeners)));

        Self {
            inner: Arc::new(WebSocketsInner {
                server: ServerListener::with_bind_ip(bind_ip, events_tx.clone()),
                client: ClientSession::new(events_tx),
                listeners,
                dispatcher,
            }),
        }
    }
}

// ============================================================================
// WebSockets - Operations
// ============================================================================

impl WebSockets {
    /// Starts the server on `port`.
    ///
    /// Port `0` lets the OS pick; the resolved value carries the bound port.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRunning`] if the server is running
    /// - [`Error::StartFailed`] if the port cannot be bound
    pub fn start_server(&self, port: u16) -> Result<ServerStarted> {
        let port = self.inner.server.start(port)?;
        Ok(ServerStarted { port })
    }

    /// Connects the client to `url`.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyConnected`] if the client has a connection
    /// - [`Error::InvalidUrl`] if `url` does not parse
    /// - [`Error::UnsupportedScheme`] if the scheme is not `ws`
    pub fn start_client(&self, url: &str) -> Result<ClientStarted> {
        self.inner.client.start(url)?;
        info!(%url, "WebSocket client started");
        Ok(ClientStarted { url: url.to_owned() })
    }

    /// Stops the server and the client. Idempotent.
    pub fn stop(&self) {
        debug!("Stopping server and client");
        self.inner.server.stop();
        self.inner.client.stop();
    }

    /// Sends a text message.
    ///
    /// While the server has connections, `connection` selects the target;
    /// otherwise the message goes out on the client.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the server has connections and no
    ///   `connection` is given
    /// - [`Error::UnknownConnection`] if `connection` is not registered
    /// - [`Error::NotConnected`] if there is neither a server connection
    ///   nor a client
    pub fn send_message(&self, message: &str, connection: Option<&SocketIdentity>) -> Result<()> {
        let server = &self.inner.server;
        if server.has_connections() {
            let identity = connection
                .ok_or_else(|| Error::invalid_argument("A connection needs to be provided"))?;
            let id: ConnectionId = identity
                .uuid
                .parse()
                .map_err(|_| Error::unknown_connection(identity.uuid.as_str()))?;
            return server.send(&id, Message::Text(message.to_owned()));
        }

        let client = &self.inner.client;
        if !client.is_connected() {
            return Err(Error::NotConnected);
        }
        client.send_text(message);
        Ok(())
    }
}

// ============================================================================
// WebSockets - Listeners
// ============================================================================

impl WebSockets {
    /// Subscribes `listener` to events named `name`.
    ///
    /// Listeners run one event at a time on the dispatcher task and must not
    /// block.
    pub fn add_listener<F>(&self, name: EventName, listener: F) -> ListenerHandle
    where
        F: Fn(&PluginEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(name, Arc::new(listener))
    }

    /// Removes every listener.
    pub fn remove_all_listeners(&self) {
        self.inner.listeners.clear();
    }

    /// Returns the number of listeners subscribed to `name`.
    #[must_use]
    pub fn listener_count(&self, name: EventName) -> usize {
        self.inner.listeners.count(name)
    }
}

// ============================================================================
// WebSockets - Introspection
// ============================================================================

impl WebSockets {
    /// Returns `true` while the server is running.
    #[inline]
    #[must_use]
    pub fn is_server_running(&self) -> bool {
        self.inner.server.is_running()
    }

    /// Returns the bound server port.
    #[inline]
    #[must_use]
    pub fn server_port(&self) -> Option<u16> {
        self.inner.server.port()
    }

    /// Returns the identities of registered server connections.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.inner.server.connection_ids()
    }

    /// Returns the number of registered server connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.server.connection_count()
    }

    /// Returns `true` while the client has a connection.
    #[inline]
    #[must_use]
    pub fn is_client_connected(&self) -> bool {
        self.inner.client.is_connected()
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Delivers events to listeners in arrival order.
async fn dispatch_loop(
    mut events: mpsc::UnboundedReceiver<EventEnvelope>,
    listeners: Arc<ListenerRegistry>,
) {
    while let Some(envelope) = events.recv().await {
        let connection_id = envelope.connection.id;
        match PluginEvent::from_envelope(envelope) {
            Some(event) => {
                trace!(%connection_id, event = %event.name(), "Dispatching event");
                listeners.dispatch(&event);
            }
            None => trace!(%connection_id, "Dropped undecodable message"),
        }
    }
    debug!("Event dispatcher stopped");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::Ipv4Addr;
    use std::time::Duration;

    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::{sleep, timeout};

    fn local() -> WebSockets {
        WebSockets::builder().bind_ip(Ipv4Addr::LOCALHOST).build()
    }

    fn record(sockets: &WebSockets) -> UnboundedReceiver<PluginEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for name in [EventName::Open, EventName::Close, EventName::Message, EventName::Error] {
            let tx = tx.clone();
            sockets.add_listener(name, move |event| {
                let _ = tx.send(event.clone());
            });
        }
        rx
    }

    async fn next(rx: &mut UnboundedReceiver<PluginEvent>) -> PluginEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event within timeout")
            .expect("listener alive")
    }

    async fn wait_until(check: impl Fn() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !check() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition within timeout");
    }

    #[tokio::test]
    async fn test_start_server_twice() {
        let sockets = local();
        let started = sockets.start_server(0).expect("start");
        assert_ne!(started.port, 0);
        assert_eq!(sockets.server_port(), Some(started.port));

        let err = sockets.start_server(0).expect_err("second start");
        assert_eq!(err.code(), "AlreadyRunningError");
        sockets.stop();
        assert!(!sockets.is_server_running());
    }

    #[tokio::test]
    async fn test_start_client_rejects_bad_urls() {
        let sockets = local();
        assert_eq!(
            sockets.start_client("::::").expect_err("invalid").code(),
            "InvalidURLError"
        );
        assert_eq!(
            sockets.start_client("wss://localhost:1").expect_err("tls").code(),
            "UnsupportedSchemeError"
        );
        assert!(!sockets.is_client_connected());
    }

    #[tokio::test]
    async fn test_send_without_connections() {
        let sockets = local();
        let err = sockets.send_message("hello", None).expect_err("nothing to send on");
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_round_trip_between_client_and_server() {
        let server = local();
        let mut server_events = record(&server);
        let port = server.start_server(0).expect("start server").port;

        let client = local();
        let mut client_events = record(&client);
        let started = client
            .start_client(&format!("ws://127.0.0.1:{port}"))
            .expect("start client");
        assert_eq!(started.url, format!("ws://127.0.0.1:{port}"));

        assert_eq!(next(&mut client_events).await, PluginEvent::Open(Default::default()));
        let PluginEvent::Open(open) = next(&mut server_events).await else {
            panic!("expected server open");
        };
        let uuid = open.uuid.expect("server open carries uuid");
        assert_eq!(open.port, Some(port));
        assert_eq!(open.host.as_deref(), Some("127.0.0.1"));

        client.send_message("ping", None).expect("client send");
        let PluginEvent::Message(received) = next(&mut server_events).await else {
            panic!("expected server message");
        };
        assert_eq!(received.message, "ping");
        assert_eq!(received.connection.map(|c| c.uuid), Some(uuid.clone()));

        // A server with connections requires a target.
        let err = server.send_message("pong", None).expect_err("missing target");
        assert!(matches!(err, Error::InvalidArgument { .. }));

        server
            .send_message("pong", Some(&SocketIdentity::new(uuid.as_str())))
            .expect("server send");
        let PluginEvent::Message(received) = next(&mut client_events).await else {
            panic!("expected client message");
        };
        assert_eq!(received.message, "pong");
        assert!(received.connection.is_none());

        client.stop();
        assert_eq!(next(&mut client_events).await, PluginEvent::Close(Default::default()));
        let PluginEvent::Close(close) = next(&mut server_events).await else {
            panic!("expected server close");
        };
        assert_eq!(close.uuid, Some(uuid));
        wait_until(|| server.connection_count() == 0).await;
        server.stop();
    }

    #[tokio::test]
    async fn test_unknown_connection_is_rejected() {
        let server = local();
        let mut server_events = record(&server);
        let port = server.start_server(0).expect("start").port;

        let client = local();
        client
            .start_client(&format!("ws://127.0.0.1:{port}"))
            .expect("start client");
        assert!(matches!(next(&mut server_events).await, PluginEvent::Open(_)));

        let err = server
            .send_message("x", Some(&SocketIdentity::new(ConnectionId::generate().to_string())))
            .expect_err("unknown");
        assert_eq!(err.code(), "UnknownConnectionError");

        let err = server
            .send_message("x", Some(&SocketIdentity::new("not-a-uuid")))
            .expect_err("malformed");
        assert_eq!(err.code(), "UnknownConnectionError");

        server.stop();
        client.stop();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let sockets = local();
        sockets.stop();
        sockets.start_server(0).expect("start");
        sockets.stop();
        sockets.stop();
        sockets.start_server(0).expect("restart after stop");
        sockets.stop();
    }

    #[tokio::test]
    async fn test_remove_all_listeners_stops_delivery() {
        let server = local();
        let mut server_events = record(&server);
        assert_eq!(server.listener_count(EventName::Open), 1);
        server.remove_all_listeners();
        assert_eq!(server.listener_count(EventName::Open), 0);

        let port = server.start_server(0).expect("start").port;
        let client = local();
        client
            .start_client(&format!("ws://127.0.0.1:{port}"))
            .expect("start client");
        wait_until(|| server.connection_count() == 1).await;

        assert!(server_events.try_recv().is_err());
        server.stop();
        client.stop();
    }
}
