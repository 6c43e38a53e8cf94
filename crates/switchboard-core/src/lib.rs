//! # switchboard-core
//!
//! Connection lifecycle, user registry and message delivery for the
//! Switchboard message hub.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Connection** - One managed duplex session with its inbound loop,
//!   outbound loop and optional liveness monitor
//! - **OutboundQueue** - Bounded per-connection queue with a send grace window
//! - **Hub** - Registry of live connections per user, fan-out and request
//!   handling
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│ Connection  │────▶│   Handler   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                        ▲     │ on_close
//!              send      │     ▼
//!                     ┌─────────────┐
//!                     │     Hub     │
//!                     └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use switchboard_core::{handler_fn, Hub};
//! use switchboard_protocol::Envelope;
//! use switchboard_transport::memory;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let hub = Hub::default();
//! let (transport, mut peer) = memory::duplex();
//!
//! hub.add(transport, 42, false, handler_fn(|_conn, env| Ok(env)))
//!     .await
//!     .unwrap();
//!
//! let delivered = hub.set_message(42, &Envelope::empty("hello")).await.unwrap();
//! assert_eq!(delivered, 1);
//! assert_eq!(peer.recv_envelope().await, Some(Envelope::empty("hello")));
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod hub;
pub mod identity;
pub mod queue;
pub mod stats;

pub use connection::{Connection, ConnectionConfig, ConnectionOwner};
pub use error::{HandlerError, HubError};
pub use hub::{handler_fn, Hub, MessageHandler};
pub use identity::{ConnectionId, UserId};
pub use queue::{EnqueueError, OutboundQueue};
pub use stats::HubStats;
