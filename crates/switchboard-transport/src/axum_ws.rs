//! Adapter for sockets upgraded by axum.
//!
//! axum performs the HTTP upgrade itself (`WebSocketUpgrade::on_upgrade`),
//! so upgrading an [`axum::extract::ws::WebSocket`] only splits it.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::warn;

use crate::traits::{Duplex, FrameSink, FrameStream, TransportError, Upgrade, WireFrame};

/// An axum socket together with the limits to apply to it.
pub struct AxumSocket {
    socket: WebSocket,
    max_message_size: usize,
    remote_addr: Option<String>,
}

impl AxumSocket {
    /// Wrap an upgraded axum socket.
    #[must_use]
    pub fn new(socket: WebSocket, max_message_size: usize) -> Self {
        Self {
            socket,
            max_message_size,
            remote_addr: None,
        }
    }

    /// Attach the remote address reported by the HTTP layer.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }
}

#[async_trait]
impl Upgrade for AxumSocket {
    async fn upgrade(self) -> Result<Duplex, TransportError> {
        let (sink, stream) = self.socket.split();
        let mut duplex = Duplex::new(
            AxumSink { inner: sink },
            AxumStream {
                inner: stream,
                max_message_size: self.max_message_size,
            },
        );
        duplex.remote_addr = self.remote_addr;
        Ok(duplex)
    }
}

struct AxumSink {
    inner: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameSink for AxumSink {
    async fn send(&mut self, frame: WireFrame) -> Result<(), TransportError> {
        let message = match frame {
            WireFrame::Text(text) => Message::Text(text),
            WireFrame::Binary(data) => Message::Binary(data.to_vec()),
            WireFrame::Ping(data) => Message::Ping(data.to_vec()),
            WireFrame::Pong(data) => Message::Pong(data.to_vec()),
            WireFrame::Close => Message::Close(None),
        };

        self.inner
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }
}

struct AxumStream {
    inner: SplitStream<WebSocket>,
    max_message_size: usize,
}

#[async_trait]
impl FrameStream for AxumStream {
    async fn recv(&mut self) -> Option<Result<WireFrame, TransportError>> {
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
            Err(e) => return Some(Err(TransportError::ReceiveFailed(e.to_string()))),
        };
        Some(Ok(frame))
    }
}
