//! WebSocket connection and event loop.
//!
//! A [`Connection`] is a cheap handle to one physical socket. Starting it
//! spawns a tokio task that owns the socket and runs the whole lifecycle:
//!
//! - establishes the transport (outbound connect or inbound handshake)
//! - reads messages in an explicit loop and decodes them
//! - writes queued messages
//! - performs the teardown requested by [`Connection::stop`]
//!
//! Every input goes through the connection's [`StateMachine`]. Events are
//! sent on the channel given at construction, in order, from that single
//! task. Reaching a terminal state runs the terminate hook, emits
//! [`ConnectionEvent::Closed`] and then disarms the channel.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage, Utf8Bytes};
use tracing::{debug, info, trace, warn};
use url::{Host, Url};

use crate::error::Result;
use crate::identifiers::ConnectionId;
use crate::protocol::{Frame, Message};

use super::classify::TransportError;
use super::inbound::{InboundKinds, InboundStream};
use super::state::{
    ConnectionEvent, ConnectionState, ReceiveOutcome, Received, StateMachine, StopAction,
    TransportStatus,
};

// ============================================================================
// Types
// ============================================================================

/// Established WebSocket over plain TCP.
type WsStream = WebSocketStream<InboundStream<TcpStream>>;

/// Write half of an established WebSocket.
type WsSink = SplitSink<WsStream, WsMessage>;

/// Channel the connection emits its events on.
pub type EventSender = mpsc::UnboundedSender<EventEnvelope>;

/// Hook run once when the connection reaches a terminal state.
///
/// Runs before the closed event is emitted.
pub type TerminateHook = Box<dyn FnOnce(ConnectionId) + Send>;

// ============================================================================
// Role & Transport
// ============================================================================

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Outbound connection owned by a client session.
    Client,
    /// Inbound connection accepted by the server listener.
    Server,
}

/// How the transport is established.
#[derive(Debug)]
pub enum Transport {
    /// Connect to a `ws://` URL.
    Connect(Url),
    /// Run the server handshake on an accepted socket.
    Accept(TcpStream),
}

// ============================================================================
// ConnectionInfo & EventEnvelope
// ============================================================================

/// Identity and locally observed endpoint of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Connection identity.
    pub id: ConnectionId,
    /// Which side opened the connection.
    pub role: Role,
    /// Local endpoint of the socket, once established.
    pub local_addr: Option<SocketAddr>,
}

impl ConnectionInfo {
    /// Local host, or an empty string if unknown.
    #[must_use]
    pub fn host(&self) -> String {
        self.local_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default()
    }

    /// Local port, or `0` if unknown.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.map_or(0, |addr| addr.port())
    }
}

/// An event tagged with the connection that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Snapshot of the source connection.
    pub connection: ConnectionInfo,
    /// The event.
    pub event: ConnectionEvent,
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write a data message.
    Send(Message),
    /// Tear the transport down.
    Stop(StopAction),
}

// ============================================================================
// Connection
// ============================================================================

/// Internal shared state for a connection.
struct ConnectionInner {
    id: ConnectionId,
    role: Role,
    machine: Mutex<StateMachine>,
    local_addr: Mutex<Option<SocketAddr>>,
    events: Mutex<Option<EventSender>>,
    terminate_hook: Mutex<Option<TerminateHook>>,
    command_tx: Mutex<Option<mpsc::UnboundedSender<ConnectionCommand>>>,
}

/// Handle to one physical WebSocket connection.
///
/// Cloning is cheap; all clones share the same state. All operations
/// return immediately and report their outcome as events.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates an idle connection with a fresh identity.
    #[must_use]
    pub fn new(role: Role, events: EventSender) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id: ConnectionId::generate(),
                role,
                machine: Mutex::new(StateMachine::new()),
                local_addr: Mutex::new(None),
                events: Mutex::new(Some(events)),
                terminate_hook: Mutex::new(None),
                command_tx: Mutex::new(None),
            }),
        }
    }

    /// Returns the connection identity.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Returns which side opened the connection.
    #[inline]
    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.machine.lock().state().clone()
    }

    /// Returns `true` once the connection is cancelled or failed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.inner.machine.lock().state().is_terminal()
    }

    /// Returns identity plus the current local endpoint.
    #[must_use]
    pub fn info(&self) -> ConnectionInfo {
        self.inner.info()
    }

    /// Installs the terminate hook, replacing any previous one.
    pub fn set_terminate_hook(&self, hook: TerminateHook) {
        *self.inner.terminate_hook.lock() = Some(hook);
    }

    /// Removes the terminate hook without running it.
    pub fn detach_terminate_hook(&self) {
        self.inner.terminate_hook.lock().take();
    }

    /// Starts the connection and spawns its event loop.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyConnected`](crate::Error::AlreadyConnected)
    /// if the connection was started before.
    pub fn start(&self, transport: Transport) -> Result<()> {
        self.inner.machine.lock().start()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        *self.inner.command_tx.lock() = Some(command_tx);

        debug!(connection_id = %self.inner.id, role = ?self.inner.role, "Connection starting");

        tokio::spawn(Arc::clone(&self.inner).run(transport, command_rx));
        Ok(())
    }

    /// Stops the connection with a normal closure.
    pub fn stop(&self) {
        self.stop_with(CloseCode::Normal);
    }

    /// Stops the connection, sending `code` in a close frame if it is not
    /// a normal closure.
    ///
    /// The closed event arrives later, from the event loop.
    pub fn stop_with(&self, code: CloseCode) {
        debug!(connection_id = %self.inner.id, %code, "Connection is stopping");

        let action = self.inner.machine.lock().begin_stop(code);
        if let Some(action) = action {
            self.inner.command(ConnectionCommand::Stop(action));
        }
    }

    /// Queues a message for sending.
    ///
    /// Write failures are reported as error events. Messages queued while
    /// connecting are written once the connection is ready.
    pub fn send(&self, message: Message) {
        self.inner.command(ConnectionCommand::Send(message));
    }

    /// Queues a text message for sending.
    #[inline]
    pub fn send_text(&self, text: impl Into<String>) {
        self.send(Message::Text(text.into()));
    }

    /// Queues a binary message for sending.
    #[inline]
    pub fn send_binary(&self, data: impl Into<Vec<u8>>) {
        self.send(Message::Binary(data.into()));
    }
}

// ============================================================================
// ConnectionInner - State & Events
// ============================================================================

impl ConnectionInner {
    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            role: self.role,
            local_addr: *self.local_addr.lock(),
        }
    }

    fn command(&self, command: ConnectionCommand) {
        let sent = self
            .command_tx
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(command).is_ok());

        if !sent {
            trace!(connection_id = %self.id, "Command dropped, connection not running");
        }
    }

    fn apply_status(&self, status: TransportStatus) {
        let event = self.machine.lock().on_status(status);
        if let Some(event) = event {
            self.emit(event);
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        let ConnectionEvent::Closed(ref error) = event else {
            let envelope = EventEnvelope {
                connection: self.info(),
                event,
            };
            if let Some(events) = self.events.lock().as_ref() {
                let _ = events.send(envelope);
            }
            return;
        };

        match error {
            Some(err) => warn!(connection_id = %self.id, error = %err, "Connection did fail"),
            None => debug!(connection_id = %self.id, "Connection did stop"),
        }

        let hook = self.terminate_hook.lock().take();
        if let Some(hook) = hook {
            hook(self.id);
        }

        self.command_tx.lock().take();
        let events = self.events.lock().take();
        if let Some(events) = events {
            let _ = events.send(EventEnvelope {
                connection: self.info(),
                event,
            });
        }
    }
}

// ============================================================================
// ConnectionInner - Event Loop
// ============================================================================

impl ConnectionInner {
    /// Event loop that owns the socket for the connection's lifetime.
    async fn run(
        self: Arc<Self>,
        transport: Transport,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    ) {
        let mut pending = Vec::new();

        let kinds = InboundKinds::new();
        let establish = establish(transport, kinds.clone());
        tokio::pin!(establish);

        let ws_stream = loop {
            tokio::select! {
                result = &mut establish => match result {
                    Ok(ws_stream) => break ws_stream,
                    Err(err) => {
                        if err.is_unreachable() {
                            self.apply_status(TransportStatus::Waiting(err.clone()));
                        }
                        self.apply_status(TransportStatus::Failed(err));
                        return;
                    }
                },

                command = command_rx.recv() => match command {
                    Some(ConnectionCommand::Send(message)) => pending.push(message),
                    Some(ConnectionCommand::Stop(_)) => {
                        for _ in pending.drain(..) {
                            self.report_send_error(TransportError::Cancelled);
                        }
                        self.apply_status(TransportStatus::Cancelled);
                        return;
                    }
                    None => {
                        self.apply_status(TransportStatus::Failed(TransportError::Cancelled));
                        return;
                    }
                },
            }
        };

        *self.local_addr.lock() = ws_stream.get_ref().get_ref().local_addr().ok();
        self.apply_status(TransportStatus::Ready);
        info!(connection_id = %self.id, "Connection is ready");

        let (mut ws_write, mut ws_read) = ws_stream.split();

        for message in pending.drain(..) {
            self.write(&mut ws_write, message).await;
        }

        loop {
            tokio::select! {
                item = ws_read.next() => {
                    let Some(received) = receive_input(item, &kinds) else {
                        continue;
                    };

                    let outcome = self.machine.lock().on_receive(received);
                    match outcome {
                        ReceiveOutcome::Rearm(event) => {
                            if let Some(event) = event {
                                trace!(connection_id = %self.id, ?event, "Received message");
                                self.emit(event);
                            }
                        }
                        ReceiveOutcome::Cancel => {
                            let _ = ws_write.close().await;
                            self.apply_status(TransportStatus::Cancelled);
                            break;
                        }
                        ReceiveOutcome::Halt(event, err) => {
                            if let Some(event) = event {
                                self.emit(event);
                            }
                            self.apply_status(TransportStatus::Failed(err));
                            break;
                        }
                    }
                }

                command = command_rx.recv() => match command {
                    Some(ConnectionCommand::Send(message)) => {
                        self.write(&mut ws_write, message).await;
                    }
                    Some(ConnectionCommand::Stop(action)) => {
                        self.shutdown(&mut ws_write, action).await;
                        self.apply_status(TransportStatus::Cancelled);
                        break;
                    }
                    None => {
                        self.apply_status(TransportStatus::Failed(TransportError::Cancelled));
                        break;
                    }
                },
            }
        }

        debug!(connection_id = %self.id, "Event loop terminated");
    }

    /// Writes one data message if the connection can send.
    ///
    /// A message overtaken by a stop is reported as cancelled.
    async fn write(&self, ws_write: &mut WsSink, message: Message) {
        let can_send = self.machine.lock().state().can_send();
        if !can_send {
            trace!(connection_id = %self.id, "Message dropped, connection not ready");
            self.report_send_error(TransportError::Cancelled);
            return;
        }

        let bytes = message.len();
        let kind = message.kind();
        match ws_write.send(message.into()).await {
            Ok(()) => trace!(connection_id = %self.id, bytes, ?kind, "Message sent"),
            Err(e) => self.report_send_error(e.into()),
        }
    }

    /// Performs the teardown chosen by the state machine.
    async fn shutdown(&self, ws_write: &mut WsSink, action: StopAction) {
        if let StopAction::SendClose(code) = action {
            let close = WsMessage::Close(Some(CloseFrame {
                code,
                reason: Utf8Bytes::from_static(""),
            }));
            if let Err(e) = ws_write.send(close).await {
                self.report_send_error(e.into());
            }
        }

        if let Err(e) = ws_write.close().await {
            self.report_send_error(e.into());
        }
    }

    fn report_send_error(&self, err: TransportError) {
        let event = self.machine.lock().on_send_error(err);
        if let Some(event) = event {
            self.emit(event);
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Establishes the WebSocket for a transport.
///
/// Inbound data message kinds are recorded into `kinds`.
async fn establish(
    transport: Transport,
    kinds: InboundKinds,
) -> std::result::Result<WsStream, TransportError> {
    match transport {
        Transport::Connect(url) => {
            let host = match url.host() {
                Some(Host::Domain(domain)) => domain.to_string(),
                Some(Host::Ipv4(ip)) => ip.to_string(),
                Some(Host::Ipv6(ip)) => ip.to_string(),
                None => return Err(TransportError::protocol("URL has no host")),
            };
            let port = url.port_or_known_default().unwrap_or(80);

            let stream = TcpStream::connect((host.as_str(), port)).await?;
            let stream = InboundStream::new(stream, kinds);
            let (ws_stream, _response) =
                tokio_tungstenite::client_async(url.as_str(), stream).await?;
            Ok(ws_stream)
        }
        Transport::Accept(stream) => {
            let stream = InboundStream::new(stream, kinds);
            Ok(tokio_tungstenite::accept_async(stream).await?)
        }
    }
}

/// Maps one read from the socket to a state machine input.
///
/// Data messages arrive as binary; their original kind comes from `kinds`.
fn receive_input(
    item: Option<std::result::Result<WsMessage, WsError>>,
    kinds: &InboundKinds,
) -> Option<Received> {
    match item {
        Some(Ok(WsMessage::Binary(data))) => {
            Some(Received::Frame(Frame::new(kinds.pop().into(), data)))
        }
        Some(Ok(message)) => Frame::from_transport(message).map(Received::Frame),
        Some(Err(e)) => Some(Received::Error(e.into())),
        None => Some(Received::EndOfStream),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::time::timeout;

    use crate::error::Error;

    async fn echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(message)) = ws.next().await {
                        if (message.is_text() || message.is_binary())
                            && ws.send(message).await.is_err()
                        {
                            break;
                        }
                    }
                });
            }
        });

        addr
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<EventEnvelope>) -> ConnectionEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open")
            .event
    }

    fn ws_url(addr: SocketAddr) -> Url {
        Url::parse(&format!("ws://{addr}")).expect("valid url")
    }

    #[tokio::test]
    async fn test_send_text_round_trips() {
        let addr = echo_server().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::new(Role::Client, tx);

        connection.start(Transport::Connect(ws_url(addr))).expect("start");
        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Ready);
        assert_eq!(connection.state(), ConnectionState::Ready);

        connection.send_text("ping");
        assert_eq!(
            next_event(&mut rx).await,
            ConnectionEvent::Message(Message::Text("ping".into()))
        );

        connection.send_binary(vec![0xffu8, 0xfe]);
        assert_eq!(
            next_event(&mut rx).await,
            ConnectionEvent::Message(Message::Binary(vec![0xff, 0xfe]))
        );

        connection.stop();
        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Closed(None));
        assert_eq!(connection.state(), ConnectionState::Cancelled);

        // Channel is disarmed after the terminal event.
        assert!(timeout(Duration::from_secs(5), rx.recv()).await.expect("closed").is_none());
    }

    #[tokio::test]
    async fn test_messages_queued_while_connecting_are_sent() {
        let addr = echo_server().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::new(Role::Client, tx);

        connection.start(Transport::Connect(ws_url(addr))).expect("start");
        connection.send_text("early");

        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Ready);
        assert_eq!(
            next_event(&mut rx).await,
            ConnectionEvent::Message(Message::Text("early".into()))
        );
        connection.stop();
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let addr = echo_server().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::new(Role::Client, tx);

        connection.start(Transport::Connect(ws_url(addr))).expect("start");
        let err = connection
            .start(Transport::Connect(ws_url(addr)))
            .expect_err("second start");
        assert!(matches!(err, Error::AlreadyConnected));

        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Ready);
        connection.stop();
        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Closed(None));
    }

    #[tokio::test]
    async fn test_stop_while_connecting_closes_without_error() {
        // Listener that never runs the handshake.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::new(Role::Client, tx);
        connection.start(Transport::Connect(ws_url(addr))).expect("start");
        connection.stop();

        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Closed(None));
        drop(listener);
    }

    #[tokio::test]
    async fn test_refused_connect_reports_error_then_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::new(Role::Client, tx);
        connection.start(Transport::Connect(ws_url(addr))).expect("start");

        let ConnectionEvent::Error(err) = next_event(&mut rx).await else {
            panic!("expected error event");
        };
        assert!(err.is_unreachable());
        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Closed(Some(err)));
        assert!(connection.is_terminal());
    }

    #[tokio::test]
    async fn test_peer_close_closes_without_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("handshake");
            let _ = ws.close(None).await;
            while ws.next().await.is_some() {}
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::new(Role::Client, tx);
        connection.start(Transport::Connect(ws_url(addr))).expect("start");

        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Ready);
        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Closed(None));
    }

    #[tokio::test]
    async fn test_terminate_hook_runs_once_before_closed() {
        let addr = echo_server().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::new(Role::Client, tx);

        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&calls);
        connection.set_terminate_hook(Box::new(move |id| recorded.lock().push(id)));

        connection.start(Transport::Connect(ws_url(addr))).expect("start");
        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Ready);

        connection.stop();
        connection.stop();
        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Closed(None));
        assert_eq!(*calls.lock(), vec![connection.id()]);
    }

    #[tokio::test]
    async fn test_info_reports_local_endpoint() {
        let addr = echo_server().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::new(Role::Client, tx);

        let info = connection.info();
        assert_eq!(info.host(), "");
        assert_eq!(info.port(), 0);

        connection.start(Transport::Connect(ws_url(addr))).expect("start");
        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Ready);

        let info = connection.info();
        assert_eq!(info.host(), "127.0.0.1");
        assert_ne!(info.port(), 0);
        connection.stop();
    }

    #[tokio::test]
    async fn test_invalid_utf8_text_keeps_connection_open() {
        use tokio_tungstenite::tungstenite::protocol::frame::Frame as WsFrame;
        use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("handshake");
            let invalid = WsFrame::message(vec![0xffu8, 0xfe, 0xfd], OpCode::Data(Data::Text), true);
            ws.send(WsMessage::Frame(invalid)).await.expect("send invalid");
            ws.send(WsMessage::text("after")).await.expect("send valid");
            while ws.next().await.is_some() {}
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::new(Role::Client, tx);
        connection.start(Transport::Connect(ws_url(addr))).expect("start");

        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Ready);
        assert_eq!(
            next_event(&mut rx).await,
            ConnectionEvent::Message(Message::Text("after".into()))
        );
        assert_eq!(connection.state(), ConnectionState::Ready);

        connection.stop();
        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Closed(None));
    }

    #[tokio::test]
    async fn test_stop_while_peer_drops_closes_without_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (drop_tx, drop_rx) = std::sync::mpsc::channel::<()>();
        let (dropped_tx, dropped_rx) = std::sync::mpsc::channel::<()>();

        // Blocking peer on its own thread, so the socket is already torn
        // down when the stop is issued.
        let peer = std::thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let ws = tokio_tungstenite::tungstenite::accept(stream).expect("handshake");
            drop_rx.recv().expect("drop signal");
            drop(ws);
            dropped_tx.send(()).expect("dropped signal");
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::new(Role::Client, tx);
        connection.start(Transport::Connect(ws_url(addr))).expect("start");
        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Ready);

        drop_tx.send(()).expect("signal peer");
        dropped_rx.recv().expect("peer dropped");
        std::thread::sleep(Duration::from_millis(20));
        connection.stop();

        let closed = loop {
            match next_event(&mut rx).await {
                ConnectionEvent::Closed(err) => break err,
                ConnectionEvent::Error(err) => assert!(!err.is_teardown_symptom()),
                other => panic!("unexpected event {other:?}"),
            }
        };
        assert_eq!(closed, None);
        assert!(connection.is_terminal());
        peer.join().expect("peer thread");
    }

    #[tokio::test]
    async fn test_send_overtaken_by_stop_is_not_reported() {
        let addr = echo_server().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::new(Role::Client, tx);

        connection.start(Transport::Connect(ws_url(addr))).expect("start");
        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Ready);

        connection.send_text("late");
        connection.stop();
        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Closed(None));
    }

    #[tokio::test]
    async fn test_queued_send_abandoned_while_connecting_is_not_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::new(Role::Client, tx);
        connection.start(Transport::Connect(ws_url(addr))).expect("start");
        connection.send_text("never");
        connection.stop();

        assert_eq!(next_event(&mut rx).await, ConnectionEvent::Closed(None));
        assert_eq!(connection.state(), ConnectionState::Cancelled);
        drop(listener);
    }

    #[test]
    fn test_send_before_start_is_dropped() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = Connection::new(Role::Server, tx);
        connection.send_text("nowhere");
        connection.stop();
        assert_eq!(connection.state(), ConnectionState::Idle);
    }
}
