//! Inbound byte stream that keeps text decoding on our side.
//!
//! tungstenite validates UTF-8 while assembling a text message and fails
//! the read on bad bytes, and the async stream is unusable after any read
//! error. Malformed text must be dropped without ending the connection, so
//! [`InboundStream`] sits between the socket and tungstenite and relabels
//! every inbound text frame as binary. The original kind of each data
//! message is queued in [`InboundKinds`], and the read loop restores it
//! before decoding.
//!
//! The HTTP upgrade passes through untouched. After it, only the first
//! header byte of a data frame is rewritten; payloads, masks and control
//! frames are forwarded as they arrive.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_tungstenite::tungstenite::protocol::frame::FrameHeader;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data as OpData, OpCode};
use tracing::trace;

use crate::protocol::MessageKind;

// ============================================================================
// Constants
// ============================================================================

/// Bytes read from the socket per poll.
const READ_CHUNK: usize = 8 * 1024;

/// End of the HTTP upgrade request or response.
const HEADER_TERMINATOR: &[u8; 4] = b"\r\n\r\n";

/// Opcode bits of the first header byte.
const OPCODE_MASK: u8 = 0x0F;

/// Binary data opcode.
const BINARY_OPCODE: u8 = 0x2;

// ============================================================================
// InboundKinds
// ============================================================================

/// Original kinds of inbound data messages, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct InboundKinds {
    queue: Arc<Mutex<VecDeque<MessageKind>>>,
}

impl InboundKinds {
    /// Creates an empty queue.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, kind: MessageKind) {
        self.queue.lock().push_back(kind);
    }

    /// Takes the kind of the next data message.
    ///
    /// Defaults to binary if nothing was recorded.
    #[must_use]
    pub fn pop(&self) -> MessageKind {
        self.queue.lock().pop_front().unwrap_or(MessageKind::Binary)
    }

    /// Returns the number of recorded kinds not taken yet.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns `true` if no kind is waiting.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// FrameScanner
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Inside the HTTP upgrade; counts matched terminator bytes.
    Upgrade(usize),
    /// Waiting for a complete frame header.
    Header,
    /// Forwarding this many payload bytes.
    Payload(u64),
    /// Header could not be parsed; tungstenite reports it.
    Passthrough,
}

/// Rewrites text frame headers in a raw inbound byte stream.
#[derive(Debug)]
pub struct FrameScanner {
    phase: Phase,
    pending: Vec<u8>,
    kinds: InboundKinds,
}

impl FrameScanner {
    /// Creates a scanner positioned before the HTTP upgrade.
    #[must_use]
    pub fn new(kinds: InboundKinds) -> Self {
        Self {
            phase: Phase::Upgrade(0),
            pending: Vec::new(),
            kinds,
        }
    }

    /// Scans `input` and appends the rewritten bytes to `out`.
    ///
    /// A header split across reads is held back until it is complete.
    pub fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) {
        self.pending.extend_from_slice(input);
        let mut pos = 0;

        while pos < self.pending.len() {
            match self.phase {
                Phase::Upgrade(matched) => {
                    let byte = self.pending[pos];
                    pos += 1;
                    let matched = if byte == HEADER_TERMINATOR[matched] {
                        matched + 1
                    } else if byte == HEADER_TERMINATOR[0] {
                        1
                    } else {
                        0
                    };
                    self.phase = if matched == HEADER_TERMINATOR.len() {
                        Phase::Header
                    } else {
                        Phase::Upgrade(matched)
                    };
                }
                Phase::Payload(remaining) => {
                    let available = (self.pending.len() - pos) as u64;
                    let take = remaining.min(available);
                    pos += take as usize;
                    self.phase = if take == remaining {
                        Phase::Header
                    } else {
                        Phase::Payload(remaining - take)
                    };
                }
                Phase::Header => {
                    let mut cursor = Cursor::new(&self.pending[pos..]);
                    match FrameHeader::parse(&mut cursor) {
                        Ok(Some((header, length))) => {
                            let header_len = cursor.position() as usize;
                            self.on_header(&header, pos);
                            pos += header_len;
                            self.phase = if length == 0 {
                                Phase::Header
                            } else {
                                Phase::Payload(length)
                            };
                        }
                        Ok(None) => break,
                        Err(e) => {
                            trace!(error = %e, "Unparseable frame header, passing through");
                            self.phase = Phase::Passthrough;
                        }
                    }
                }
                Phase::Passthrough => pos = self.pending.len(),
            }
        }

        out.extend(self.pending.drain(..pos));
    }

    /// Moves held-back bytes to `out` once the socket has ended.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        out.append(&mut self.pending);
    }

    fn on_header(&mut self, header: &FrameHeader, at: usize) {
        match header.opcode {
            OpCode::Data(OpData::Text) => {
                self.pending[at] = (self.pending[at] & !OPCODE_MASK) | BINARY_OPCODE;
                self.kinds.push(MessageKind::Text);
            }
            OpCode::Data(OpData::Binary) => self.kinds.push(MessageKind::Binary),
            OpCode::Data(_) | OpCode::Control(_) => {}
        }
    }
}

// ============================================================================
// InboundStream
// ============================================================================

/// Socket wrapper that feeds reads through a [`FrameScanner`].
///
/// Writes pass through unchanged.
#[derive(Debug)]
pub struct InboundStream<S> {
    inner: S,
    scanner: FrameScanner,
    ready: Vec<u8>,
    ready_pos: usize,
    eof: bool,
}

impl<S> InboundStream<S> {
    /// Wraps `inner`, recording message kinds into `kinds`.
    #[must_use]
    pub fn new(inner: S, kinds: InboundKinds) -> Self {
        Self {
            inner,
            scanner: FrameScanner::new(kinds),
            ready: Vec::new(),
            ready_pos: 0,
            eof: false,
        }
    }

    /// Returns the wrapped socket.
    #[inline]
    #[must_use]
    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for InboundStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if this.ready_pos < this.ready.len() {
                let available = &this.ready[this.ready_pos..];
                let n = available.len().min(buf.remaining());
                buf.put_slice(&available[..n]);
                this.ready_pos += n;
                if this.ready_pos == this.ready.len() {
                    this.ready.clear();
                    this.ready_pos = 0;
                }
                return Poll::Ready(Ok(()));
            }

            if this.eof {
                return Poll::Ready(Ok(()));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let mut chunk_buf = ReadBuf::new(&mut chunk);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut chunk_buf))?;

            let filled = chunk_buf.filled();
            if filled.is_empty() {
                this.eof = true;
                this.scanner.finish(&mut this.ready);
            } else {
                this.scanner.feed(filled, &mut this.ready);
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for InboundStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

// ============================================================================
// Tests
// ============================================================================
