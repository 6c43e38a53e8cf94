//! Transport abstraction traits for Switchboard.
//!
//! A connection is driven by two independent tasks, so every transport is
//! split into a [`FrameSink`] (writes) and a [`FrameStream`] (reads) at
//! upgrade time.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// A single WebSocket-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// UTF-8 data frame.
    Text(String),
    /// Binary data frame.
    Binary(Bytes),
    /// Protocol ping.
    Ping(Bytes),
    /// Protocol pong.
    Pong(Bytes),
    /// Peer-initiated close.
    Close,
}

impl WireFrame {
    /// Whether this is a control frame (ping, pong or close).
    #[must_use]
    pub fn is_control(&self) -> bool {
        matches!(self, WireFrame::Ping(_) | WireFrame::Pong(_) | WireFrame::Close)
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The upgrade handshake failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Inbound message exceeds the configured limit.
    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The write half of a duplex transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one frame.
    async fn send(&mut self, frame: WireFrame) -> Result<(), TransportError>;

    /// Run the close handshake and release the transport.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// The read half of a duplex transport.
///
/// `recv` must be cancel-safe: it is raced against deadlines and the
/// connection's termination signal.
#[async_trait]
pub trait FrameStream: Send {
    /// Receive the next frame.
    ///
    /// Returns `None` when the stream has ended.
    async fn recv(&mut self) -> Option<Result<WireFrame, TransportError>>;
}

/// An established, split transport.
pub struct Duplex {
    /// Write half.
    pub sink: Box<dyn FrameSink>,
    /// Read half.
    pub stream: Box<dyn FrameStream>,
    /// Remote address, if known.
    pub remote_addr: Option<String>,
}

impl Duplex {
    /// Create a new duplex from its halves.
    #[must_use]
    pub fn new(sink: impl FrameSink + 'static, stream: impl FrameStream + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            stream: Box::new(stream),
            remote_addr: None,
        }
    }

    /// Attach a remote address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }
}

impl std::fmt::Debug for Duplex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Duplex")
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

/// Something that can be turned into a [`Duplex`].
///
/// This is the "Connecting" stage of a connection: for a raw TCP stream it
/// performs the WebSocket handshake, for an already upgraded socket it only
/// splits it.
#[async_trait]
pub trait Upgrade: Send + 'static {
    /// Perform the upgrade.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Handshake`] if the handshake fails.
    async fn upgrade(self) -> Result<Duplex, TransportError>;
}

#[async_trait]
impl Upgrade for Duplex {
    async fn upgrade(self) -> Result<Duplex, TransportError> {
        Ok(self)
    }
}
