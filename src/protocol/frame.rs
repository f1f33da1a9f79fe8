//! Framed messages exchanged with the transport.
//!
//! The transport hands over whole messages tagged with an opcode. This
//! module maps them to [`Frame`] and decodes the user-visible [`Message`].
//!
//! # Decode Rules
//!
//! | Opcode | Result |
//! |--------|--------|
//! | `binary` | [`Message::Binary`] with the raw bytes |
//! | `text` | [`Message::Text`] if the payload is valid UTF-8, dropped otherwise |
//! | `close`, `ping`, `pong` | nothing (pongs are answered by the transport) |
//!
//! Empty payloads never decode to a message.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use tokio_tungstenite::tungstenite::Bytes;
use tokio_tungstenite::tungstenite::Message as WsMessage;

// ============================================================================
// Opcode
// ============================================================================

/// Opcode tag carried by a framed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// UTF-8 text payload.
    Text,
    /// Raw binary payload.
    Binary,
    /// Close frame.
    Close,
    /// Ping control frame.
    Ping,
    /// Pong control frame.
    Pong,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
        };
        f.write_str(name)
    }
}

// ============================================================================
// MessageKind
// ============================================================================

/// Data opcode a message travels with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageKind {
    /// Text frame.
    #[default]
    Text,
    /// Binary frame.
    Binary,
}

impl From<MessageKind> for Opcode {
    #[inline]
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Text => Self::Text,
            MessageKind::Binary => Self::Binary,
        }
    }
}

// ============================================================================
// Frame
// ============================================================================

/// One received unit: opcode plus raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Opcode tag.
    pub opcode: Opcode,
    /// Raw payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a frame.
    #[inline]
    #[must_use]
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    /// Returns `true` for a close frame, which ends the stream.
    #[inline]
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.opcode == Opcode::Close
    }

    /// Decodes the user-visible message, if any.
    ///
    /// Invalid UTF-8 in a text frame is dropped silently.
    #[must_use]
    pub fn decode(self) -> Option<Message> {
        if self.payload.is_empty() {
            return None;
        }

        match self.opcode {
            Opcode::Binary => Some(Message::Binary(self.payload.to_vec())),
            Opcode::Text => String::from_utf8(self.payload.to_vec())
                .ok()
                .map(Message::Text),
            Opcode::Close | Opcode::Ping | Opcode::Pong => None,
        }
    }

    /// Converts a message read from the transport.
    ///
    /// Returns `None` for raw frames, which tungstenite never yields on read.
    #[must_use]
    pub fn from_transport(message: WsMessage) -> Option<Self> {
        let frame = match message {
            WsMessage::Text(text) => Self::new(Opcode::Text, Bytes::from(text)),
            WsMessage::Binary(data) => Self::new(Opcode::Binary, data),
            WsMessage::Ping(data) => Self::new(Opcode::Ping, data),
            WsMessage::Pong(data) => Self::new(Opcode::Pong, data),
            WsMessage::Close(close) => {
                let reason = close
                    .map(|frame| Bytes::from(frame.reason))
                    .unwrap_or_default();
                Self::new(Opcode::Close, reason)
            }
            WsMessage::Frame(_) => return None,
        };
        Some(frame)
    }
}

// ============================================================================
// Message
// ============================================================================

/// A decoded data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text message.
    Text(String),
    /// Binary message.
    Binary(Vec<u8>),
}

impl Message {
    /// Returns the kind this message is sent as.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::Binary(_) => MessageKind::Binary,
        }
    }

    /// Returns the payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// Returns `true` if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Message> for WsMessage {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => WsMessage::text(text),
            Message::Binary(data) => WsMessage::binary(data),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_tungstenite::tungstenite::Utf8Bytes;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    #[test]
    fn test_decode_text() {
        let frame = Frame::new(Opcode::Text, "ping");
        assert_eq!(frame.decode(), Some(Message::Text("ping".into())));
    }

    #[test]
    fn test_decode_binary_keeps_raw_bytes() {
        let frame = Frame::new(Opcode::Binary, vec![0xffu8, 0x00, 0xfe]);
        assert_eq!(frame.decode(), Some(Message::Binary(vec![0xff, 0x00, 0xfe])));
    }

    #[test]
    fn test_decode_invalid_utf8_text_is_dropped() {
        let frame = Frame::new(Opcode::Text, vec![0xc3u8, 0x28]);
        assert_eq!(frame.decode(), None);
    }

    #[test]
    fn test_decode_empty_payload_is_dropped() {
        assert_eq!(Frame::new(Opcode::Text, "").decode(), None);
        assert_eq!(Frame::new(Opcode::Binary, Vec::<u8>::new()).decode(), None);
    }

    #[test]
    fn test_decode_control_frames_dispatch_nothing() {
        assert_eq!(Frame::new(Opcode::Ping, "hello").decode(), None);
        assert_eq!(Frame::new(Opcode::Pong, "hello").decode(), None);
        assert_eq!(Frame::new(Opcode::Close, "bye").decode(), None);
    }

    #[test]
    fn test_from_transport_close_is_final() {
        let close = WsMessage::Close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: Utf8Bytes::from_static("going away"),
        }));
        let frame = Frame::from_transport(close).expect("close converts");
        assert!(frame.is_final());
        assert_eq!(frame.payload, Bytes::from_static(b"going away"));

        let frame = Frame::from_transport(WsMessage::Close(None)).expect("close converts");
        assert!(frame.is_final());
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_from_transport_text_and_binary() {
        let frame = Frame::from_transport(WsMessage::text("hi")).expect("text converts");
        assert_eq!(frame.opcode, Opcode::Text);
        assert!(!frame.is_final());

        let frame = Frame::from_transport(WsMessage::binary(vec![1u8, 2])).expect("binary converts");
        assert_eq!(frame.opcode, Opcode::Binary);
    }

    #[test]
    fn test_kind_restores_opcode() {
        let frame = Frame::new(MessageKind::Text.into(), vec![0xffu8, 0xfe]);
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(frame.decode(), None);

        let frame = Frame::new(MessageKind::Binary.into(), vec![0xffu8, 0xfe]);
        assert_eq!(frame.decode(), Some(Message::Binary(vec![0xff, 0xfe])));

        assert_eq!(Message::Text("x".into()).kind(), MessageKind::Text);
        assert_eq!(Message::Binary(vec![1]).kind(), MessageKind::Binary);
    }

    #[test]
    fn test_message_into_transport_keeps_opcode() {
        let ws: WsMessage = Message::Text("x".into()).into();
        assert!(ws.is_text());
        let ws: WsMessage = Message::Binary(vec![1]).into();
        assert!(ws.is_binary());
    }

    #[test]
    fn test_opcode_display() {
        assert_eq!(Opcode::Text.to_string(), "text");
        assert_eq!(Opcode::Close.to_string(), "close");
    }
}
