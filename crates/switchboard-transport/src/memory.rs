//! In-memory transport.
//!
//! [`duplex`] returns a server-side [`MemoryTransport`] (to be upgraded like
//! any other transport) and a [`MemoryPeer`] that plays the remote client.
//! The peer can script failures: rejected handshakes, failing or stalled
//! writes, injected read errors. It also counts how often the server side
//! ran its close routine.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use switchboard_protocol::{codec, Envelope};
use tokio::sync::mpsc;

use crate::traits::{Duplex, FrameSink, FrameStream, TransportError, Upgrade, WireFrame};

#[derive(Debug, Default)]
struct Shared {
    closes: AtomicUsize,
    fail_writes: AtomicBool,
    stall_writes: AtomicBool,
    reject_upgrade: AtomicBool,
}

/// Create a connected transport/peer pair.
#[must_use]
pub fn duplex() -> (MemoryTransport, MemoryPeer) {
    let (to_peer, from_server) = mpsc::unbounded_channel();
    let (to_server, from_peer) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared::default());

    let transport = MemoryTransport {
        outbound: to_peer,
        inbound: from_peer,
        shared: shared.clone(),
    };
    let peer = MemoryPeer {
        tx: Some(to_server),
        rx: from_server,
        shared,
    };
    (transport, peer)
}

/// Server side of an in-memory pair.
#[derive(Debug)]
pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<WireFrame>,
    inbound: mpsc::UnboundedReceiver<Result<WireFrame, TransportError>>,
    shared: Arc<Shared>,
}

#[async_trait]
impl Upgrade for MemoryTransport {
    async fn upgrade(self) -> Result<Duplex, TransportError> {
        if self.shared.reject_upgrade.load(Ordering::SeqCst) {
            return Err(TransportError::Handshake("upgrade rejected by peer".into()));
        }

        let sink = MemorySink {
            tx: Some(self.outbound),
            shared: self.shared,
        };
        let stream = MemoryStream { rx: self.inbound };
        Ok(Duplex::new(sink, stream).with_remote_addr("memory"))
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<WireFrame>>,
    shared: Arc<Shared>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: WireFrame) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;

        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("injected write failure".into()));
        }
        if self.shared.stall_writes.load(Ordering::SeqCst) {
            // Never completes; only a write deadline gets us out.
            std::future::pending::<()>().await;
        }

        tx.send(frame).map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        self.tx = None;
        Ok(())
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<Result<WireFrame, TransportError>>,
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn recv(&mut self) -> Option<Result<WireFrame, TransportError>> {
        self.rx.recv().await
    }
}

/// The remote end of an in-memory pair.
#[derive(Debug)]
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<Result<WireFrame, TransportError>>>,
    rx: mpsc::UnboundedReceiver<WireFrame>,
    shared: Arc<Shared>,
}

impl MemoryPeer {
    /// Send a frame to the server side.
    ///
    /// Returns `false` if the server side is gone.
    pub fn send(&self, frame: WireFrame) -> bool {
        self.tx
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(frame)).is_ok())
    }

    /// Send a text frame.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(WireFrame::Text(text.into()))
    }

    /// Encode and send an envelope.
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        match codec::encode(envelope) {
            Ok(text) => self.send_text(text),
            Err(_) => false,
        }
    }

    /// Send a protocol ping.
    pub fn ping(&self, data: impl Into<Bytes>) -> bool {
        self.send(WireFrame::Ping(data.into()))
    }

    /// Make the server's next read fail.
    pub fn inject_error(&self, error: TransportError) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.send(Err(error)).is_ok())
    }

    /// Hang up: the server's stream ends.
    pub fn disconnect(&mut self) {
        self.tx = None;
    }

    /// Receive the next frame written by the server.
    ///
    /// Returns `None` once the server has closed the transport.
    pub async fn recv(&mut self) -> Option<WireFrame> {
        self.rx.recv().await
    }

    /// Receive the next data frame and decode it, skipping control frames.
    ///
    /// Returns `None` once the server has closed the transport or sent a
    /// frame that is not an envelope.
    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.recv().await? {
                WireFrame::Text(text) => return codec::decode(text.as_bytes()).ok(),
                WireFrame::Binary(data) => return codec::decode(&data).ok(),
                WireFrame::Close => return None,
                WireFrame::Ping(_) | WireFrame::Pong(_) => continue,
            }
        }
    }

    /// Take a frame if one is already buffered.
    pub fn try_recv(&mut self) -> Option<WireFrame> {
        self.rx.try_recv().ok()
    }

    /// Reject the upgrade handshake.
    pub fn reject_upgrade(&self) {
        self.shared.reject_upgrade.store(true, Ordering::SeqCst);
    }

    /// Make every server write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make server writes hang until they are cancelled.
    pub fn stall_writes(&self, stall: bool) {
        self.shared.stall_writes.store(stall, Ordering::SeqCst);
    }

    /// How many times the server side ran its close routine.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }
}
