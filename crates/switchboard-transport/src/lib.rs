//! # switchboard-transport
//!
//! Duplex transport layer for the Switchboard message hub.
//!
//! A transport is anything that can be upgraded into a [`Duplex`]: a frame
//! sink and a frame stream that can be driven from separate tasks.
//!
//! - **WebSocket** - server-side handshake over a raw TCP stream (tokio-tungstenite)
//! - **axum** - sockets already upgraded by an axum `WebSocketUpgrade` extractor
//! - **memory** - an in-process pair with a scriptable peer, for tests and benches
//!
//! ```rust,ignore
//! use switchboard_transport::{Duplex, Upgrade};
//!
//! async fn pump(upgrade: impl Upgrade) {
//!     let Duplex { mut sink, mut stream, .. } = upgrade.upgrade().await.unwrap();
//!     while let Some(Ok(frame)) = stream.recv().await {
//!         sink.send(frame).await.unwrap();
//!     }
//! }
//! ```

pub mod axum_ws;
pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Duplex, FrameSink, FrameStream, TransportError, Upgrade, WireFrame};

#[cfg(feature = "websocket")]
pub use websocket::{PendingWebSocket, WebSocketListener};
