//! WebSocket transport implementation.
//!
//! This module provides a WebSocket-based transport using tokio-tungstenite:
//! a TCP listener whose accepted streams perform the server-side handshake
//! when upgraded, and adapters that split any `WebSocketStream` into a
//! [`Duplex`].

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message},
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::traits::{Duplex, FrameSink, FrameStream, TransportError, Upgrade, WireFrame};

/// Default maximum inbound message size (64 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// WebSocket listener configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Accepts TCP connections destined to become WebSocket connections.
pub struct WebSocketListener {
    listener: TcpListener,
    config: WebSocketConfig,
}

impl WebSocketListener {
    /// Create a new listener.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr).await?;

        info!("WebSocket listener bound on {}", config.bind_addr);

        Ok(Self { listener, config })
    }

    /// Create a new listener with default config.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(WebSocketConfig {
            bind_addr: addr,
            ..Default::default()
        })
        .await
    }

    /// Get the local address this listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Accept the next TCP connection.
    ///
    /// The handshake is deferred until [`Upgrade::upgrade`] so that the
    /// caller can attach an identity first.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting fails.
    pub async fn accept(&self) -> Result<PendingWebSocket, TransportError> {
        let (stream, addr) = self.listener.accept().await?;

        debug!("Accepted TCP connection from {}", addr);

        Ok(PendingWebSocket {
            stream,
            addr,
            max_message_size: self.config.max_message_size,
        })
    }
}

/// An accepted TCP stream that has not completed the WebSocket handshake.
pub struct PendingWebSocket {
    stream: TcpStream,
    addr: SocketAddr,
    max_message_size: usize,
}

impl PendingWebSocket {
    /// The peer's address.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl Upgrade for PendingWebSocket {
    async fn upgrade(self) -> Result<Duplex, TransportError> {
        let ws_stream = accept_async(self.stream).await.map_err(|e| {
            error!("WebSocket handshake failed: {}", e);
            TransportError::Handshake(e.to_string())
        })?;

        debug!("WebSocket handshake completed with {}", self.addr);

        Ok(split(ws_stream, self.max_message_size).with_remote_addr(self.addr.to_string()))
    }
}

#[async_trait]
impl<S> Upgrade for WebSocketStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn upgrade(self) -> Result<Duplex, TransportError> {
        Ok(split(self, DEFAULT_MAX_MESSAGE_SIZE))
    }
}

/// Split an established WebSocket stream into a [`Duplex`].
pub fn split<S>(ws_stream: WebSocketStream<S>, max_message_size: usize) -> Duplex
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws_stream.split();
    Duplex::new(
        WebSocketSink { inner: sink },
        WebSocketSource {
            inner: stream,
            max_message_size,
        },
    )
}

/// Write half of a tungstenite WebSocket.
pub struct WebSocketSink<S> {
    inner: SplitSink<WebSocketStream<S>, Message>,
}

#[async_trait]
impl<S> FrameSink for WebSocketSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, frame: WireFrame) -> Result<(), TransportError> {
        let message = match frame {
            WireFrame::Text(text) => Message::Text(text),
            WireFrame::Binary(data) => Message::Binary(data.to_vec()),
            WireFrame::Ping(data) => Message::Ping(data.to_vec()),
            WireFrame::Pong(data) => Message::Pong(data.to_vec()),
            WireFrame::Close => Message::Close(None),
        };

        self.inner.send(message).await.map_err(|e| match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::ConnectionClosed,
            e => TransportError::SendFailed(e.to_string()),
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.inner.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(format!("Failed to close: {}", e))),
        }
    }
}

/// Read half of a tungstenite WebSocket.
pub struct WebSocketSource<S> {
    inner: SplitStream<WebSocketStream<S>>,
    max_message_size: usize,
}

#[async_trait]
impl<S> FrameStream for WebSocketSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> Option<Result<WireFrame, TransportError>> {
        loop {
            let frame = match self.inner.next().await? {
                Ok(Message::Text(text)) => {
                    if text.len() > self.max_message_size {
                        warn!(
                            "Message too large: {} bytes (max: {})",
                            text.len(),
                            self.max_message_size
                        );
                        return Some(Err(TransportError::MessageTooLarge(text.len())));
                    }
                    WireFrame::Text(text)
                }
                Ok(Message::Binary(data)) => {
                    if data.len() > self.max_message_size {
                        warn!(
                            "Message too large: {} bytes (max: {})",
                            data.len(),
                            self.max_message_size
                        );
                        return Some(Err(TransportError::MessageTooLarge(data.len())));
                    }
                    WireFrame::Binary(Bytes::from(data))
                }
                Ok(Message::Ping(data)) => WireFrame::Ping(Bytes::from(data)),
                Ok(Message::Pong(data)) => WireFrame::Pong(Bytes::from(data)),
                Ok(Message::Close(_)) => WireFrame::Close,
                // Raw frame, only produced when writing
                Ok(Message::Frame(_)) => continue,
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                    debug!("WebSocket connection closed");
                    return None;
                }
                Err(e) => return Some(Err(TransportError::ReceiveFailed(e.to_string()))),
            };
            return Some(Ok(frame));
        }
    }
}
