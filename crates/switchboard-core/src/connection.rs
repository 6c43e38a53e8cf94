//! Managed duplex connections.
//!
//! A [`Connection`] owns one upgraded transport and drives it with up to
//! three tasks:
//!
//! - **inbound loop** - reads frames under a rolling read deadline, answers
//!   protocol pings, decodes envelopes and hands them to the owner
//! - **outbound loop** - the single consumer of the outbound queue; on
//!   termination it runs the transport's close handshake
//! - **liveness monitor** (optional) - pings the peer on a fixed tick and
//!   closes the connection once it has been idle past the timeout
//!
//! Every write to the transport goes through one write mutex, so the
//! outbound loop, pong replies, heartbeat pings and direct sends never
//! interleave.
//!
//! ```text
//!  peer ──▶ inbound loop ──▶ owner.on_message ──▶ direct_send ──┐
//!                                                              ▼
//!  send() ──▶ OutboundQueue ──▶ outbound loop ──▶ [write mutex] ──▶ peer
//!                                                              ▲
//!                            liveness monitor ──▶ ping ────────┘
//! ```
//!
//! Teardown happens exactly once, whichever of read error, write error,
//! heartbeat timeout or an explicit [`Connection::close`] comes first.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::FutureExt;
use parking_lot::RwLock;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use switchboard_protocol::{codec, Envelope};
use switchboard_transport::{Duplex, FrameSink, FrameStream, Upgrade, WireFrame};
use tokio::sync::{watch, Mutex};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::error::HubError;
use crate::identity::{ConnectionId, UserId};
use crate::queue::{self, EnqueueError, OutboundQueue, OutboundReceiver, QueuedFrame};

/// Per-connection timing and buffering configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Outbound queue capacity.
    pub queue_capacity: usize,
    /// How long `send` waits for queue space before dropping a message.
    pub send_grace: Duration,
    /// Deadline for a single frame write.
    pub write_timeout: Duration,
    /// Maximum silence between two inbound frames.
    pub read_timeout: Duration,
    /// Liveness monitor tick.
    pub heartbeat_interval: Duration,
    /// Idle time after which the liveness monitor closes the connection.
    pub heartbeat_timeout: Duration,
    /// Largest inbound frame the transport accepts, in bytes.
    pub max_message_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: queue::DEFAULT_QUEUE_CAPACITY,
            send_grace: Duration::from_secs(5),
            write_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            max_message_size: 64 * 1024,
        }
    }
}

/// The component a connection reports back to.
///
/// Implemented by the hub's per-connection binding.
#[async_trait]
pub trait ConnectionOwner: Send + Sync + 'static {
    /// Called exactly once, when the connection closes.
    fn on_close(&self, connection: &Connection);

    /// Called on the inbound task for every decoded envelope.
    ///
    /// Must not block for long: the next frame is not read until it returns.
    async fn on_message(&self, connection: &Arc<Connection>, envelope: Envelope);
}

#[derive(Debug)]
struct Liveness {
    alive: bool,
    last_active: Instant,
}

/// One managed duplex session bound to a user.
pub struct Connection {
    id: ConnectionId,
    user: UserId,
    remote_addr: Option<String>,
    config: ConnectionConfig,
    liveness: RwLock<Liveness>,
    outbound: OutboundQueue,
    writer: Mutex<Box<dyn FrameSink>>,
    shutdown: watch::Sender<bool>,
    owner: Arc<dyn ConnectionOwner>,
}

impl Connection {
    /// Upgrade a transport and start the connection's tasks.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if the upgrade handshake fails.
    pub async fn open<U: Upgrade>(
        upgrade: U,
        user: UserId,
        heartbeat: bool,
        config: ConnectionConfig,
        owner: Arc<dyn ConnectionOwner>,
    ) -> Result<Arc<Self>, HubError> {
        let Duplex {
            sink,
            stream,
            remote_addr,
        } = upgrade.upgrade().await.map_err(|e| {
            warn!(user = %user, error = %e, "Upgrade failed");
            HubError::Transport(e)
        })?;

        let (outbound, queue) = queue::bounded(config.queue_capacity);
        let (shutdown, _) = watch::channel(false);

        let connection = Arc::new(Self {
            id: ConnectionId::generate(),
            user,
            remote_addr,
            config,
            liveness: RwLock::new(Liveness {
                alive: true,
                last_active: Instant::now(),
            }),
            outbound,
            writer: Mutex::new(sink),
            shutdown,
            owner,
        });

        tokio::spawn(
            connection
                .clone()
                .inbound_loop(stream, connection.shutdown.subscribe()),
        );
        tokio::spawn(
            connection
                .clone()
                .outbound_loop(queue, connection.shutdown.subscribe()),
        );
        if heartbeat {
            tokio::spawn(
                connection
                    .clone()
                    .liveness_monitor(connection.shutdown.subscribe()),
            );
        }

        info!(
            connection = %connection.id,
            user = %connection.user,
            remote = connection.remote_addr.as_deref().unwrap_or("-"),
            heartbeat,
            "Connection opened"
        );

        Ok(connection)
    }

    /// Get the connection's unique identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the user this connection belongs to.
    #[must_use]
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Get the remote address, if the transport reported one.
    #[must_use]
    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    /// Check if the connection is still open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.liveness.read().alive
    }

    /// When the last inbound frame arrived.
    #[must_use]
    pub fn last_active(&self) -> Instant {
        self.liveness.read().last_active
    }

    /// Number of queued outbound messages.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.outbound.len()
    }

    /// Queue an envelope for delivery.
    ///
    /// Tries an immediate enqueue; on a full queue waits up to the send
    /// grace window, then drops the message. Returns `false` when the
    /// message was dropped or the connection is closed.
    pub async fn send(&self, envelope: &Envelope) -> bool {
        match codec::encode(envelope) {
            Ok(text) => self.send_frame(Arc::from(text)).await,
            Err(e) => {
                warn!(connection = %self.id, error = %e, "Dropping unencodable envelope");
                false
            }
        }
    }

    /// Queue an already encoded envelope. See [`Connection::send`].
    ///
    /// A send waiting for queue space gives up as soon as the connection
    /// closes.
    pub async fn send_frame(&self, frame: QueuedFrame) -> bool {
        let mut shutdown = self.shutdown.subscribe();
        if !self.is_connected() {
            return false;
        }

        let frame = match self.outbound.try_enqueue(frame) {
            Ok(()) => return true,
            Err(EnqueueError::Full(frame)) => frame,
            Err(e) => {
                debug!(connection = %self.id, error = %e, "Dropping message");
                return false;
            }
        };

        debug!(connection = %self.id, "Outbound queue full, waiting for space");
        let result = tokio::select! {
            _ = shutdown.changed() => {
                debug!(connection = %self.id, "Connection closed while waiting for queue space");
                return false;
            }
            result = self.outbound.enqueue_timeout(frame, self.config.send_grace) => result,
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    connection = %self.id,
                    user = %self.user,
                    pending = self.pending(),
                    error = %e,
                    "Dropping message"
                );
                false
            }
        }
    }

    /// Write an envelope immediately, bypassing the outbound queue.
    ///
    /// Used for replies to a specific request.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the connection is closed, or the
    /// write failure (which also closes the connection).
    pub async fn direct_send(&self, envelope: &Envelope) -> Result<(), HubError> {
        if !self.is_connected() {
            return Err(HubError::Closed);
        }
        let text = codec::encode(envelope)?;
        self.write(WireFrame::Text(text)).await
    }

    /// Close the connection.
    ///
    /// Idempotent and safe to call from any task; only the first call has
    /// an effect. The transport itself is released by the outbound loop as
    /// it unwinds.
    pub fn close(&self) {
        {
            let mut liveness = self.liveness.write();
            if !liveness.alive {
                return;
            }
            liveness.alive = false;
        }

        self.shutdown.send_replace(true);
        self.outbound.close();
        self.owner.on_close(self);

        info!(connection = %self.id, user = %self.user, "Connection closed");
    }

    fn touch(&self) {
        self.liveness.write().last_active = Instant::now();
    }

    /// Write one frame under the write mutex and write deadline.
    ///
    /// Transport failures are terminal for the connection. A write still in
    /// flight when the connection closes is abandoned, releasing the mutex
    /// for the close handshake.
    async fn write(&self, frame: WireFrame) -> Result<(), HubError> {
        let mut shutdown = self.shutdown.subscribe();
        let result = {
            let mut sink = self.writer.lock().await;
            if !self.is_connected() {
                return Err(HubError::Closed);
            }
            tokio::select! {
                _ = shutdown.changed() => return Err(HubError::Closed),
                result = time::timeout(self.config.write_timeout, sink.send(frame)) => match result {
                    Ok(result) => result.map_err(HubError::from),
                    Err(_) => Err(HubError::Timeout),
                },
            }
        };

        if let Err(e) = &result {
            warn!(connection = %self.id, user = %self.user, error = %e, "Write failed");
            self.close();
        }
        result
    }

    async fn inbound_loop(
        self: Arc<Self>,
        mut stream: Box<dyn FrameStream>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let next = tokio::select! {
                _ = shutdown.changed() => break,
                next = time::timeout(self.config.read_timeout, stream.recv()) => next,
            };

            let frame = match next {
                Ok(Some(Ok(frame))) => frame,
                Ok(Some(Err(e))) => {
                    warn!(connection = %self.id, user = %self.user, error = %e, "Read failed");
                    break;
                }
                Ok(None) => {
                    debug!(connection = %self.id, "Stream ended");
                    break;
                }
                Err(_) => {
                    warn!(connection = %self.id, user = %self.user, "Read deadline expired");
                    break;
                }
            };

            self.touch();

            let keep_going = match frame {
                WireFrame::Ping(data) => self.write(WireFrame::Pong(data)).await.is_ok(),
                WireFrame::Pong(_) => true,
                WireFrame::Close => {
                    debug!(connection = %self.id, "Received close frame");
                    false
                }
                WireFrame::Text(text) => self.dispatch(text.as_bytes()).await,
                WireFrame::Binary(data) => self.dispatch(&data).await,
            };

            if !keep_going {
                break;
            }
        }

        self.close();
        trace!(connection = %self.id, "Inbound loop finished");
    }

    /// Decode a data frame and hand it to the owner. Returns whether the
    /// inbound loop should continue.
    async fn dispatch(self: &Arc<Self>, raw: &[u8]) -> bool {
        let envelope = match codec::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(connection = %self.id, user = %self.user, error = %e, "Skipping malformed frame");
                return true;
            }
        };

        trace!(connection = %self.id, kind = %envelope.kind, "Inbound envelope");

        let callback = AssertUnwindSafe(self.owner.on_message(self, envelope)).catch_unwind();
        if callback.await.is_err() {
            error!(
                connection = %self.id,
                user = %self.user,
                "Message callback panicked, closing connection"
            );
            return false;
        }
        true
    }

    async fn outbound_loop(
        self: Arc<Self>,
        mut queue: OutboundReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => break,

                next = queue.recv() => {
                    let Some(frame) = next else { break };
                    if self.write(WireFrame::Text(frame.to_string())).await.is_err() {
                        break;
                    }
                }
            }
        }

        self.close();
        // Senders still waiting for space fail now rather than at the end
        // of the handshake.
        drop(queue);

        // Sole owner of the transport's close routine.
        let mut sink = self.writer.lock().await;
        match time::timeout(self.config.write_timeout, sink.close()).await {
            Ok(Ok(())) => debug!(connection = %self.id, "Transport closed"),
            Ok(Err(e)) => debug!(connection = %self.id, error = %e, "Close handshake failed"),
            Err(_) => debug!(connection = %self.id, "Close handshake timed out"),
        }
    }

    async fn liveness_monitor(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.heartbeat_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,

                _ = ticker.tick() => {
                    let idle = self.last_active().elapsed();
                    if idle > self.config.heartbeat_timeout {
                        warn!(
                            connection = %self.id,
                            user = %self.user,
                            idle_secs = idle.as_secs(),
                            "Heartbeat timed out"
                        );
                        self.close();
                        break;
                    }

                    if self.write(WireFrame::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }

        trace!(connection = %self.id, "Liveness monitor stopped");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("remote_addr", &self.remote_addr)
            .field("alive", &self.is_connected())
            .finish_non_exhaustive()
    }
}
