//! The hub: user registry, fan-out and request handling.
//!
//! The hub maps each [`UserId`] to every live [`Connection`] of that user.
//! Connections register themselves through [`Hub::add`] and unregister
//! through their owner binding when they close, so the registry only ever
//! holds live connections (modulo the instant between a close and its
//! callback).

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use switchboard_protocol::{codec, Envelope};
use switchboard_transport::Upgrade;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, ConnectionConfig, ConnectionOwner};
use crate::error::{HandlerError, HubError};
use crate::identity::{ConnectionId, UserId};
use crate::queue::QueuedFrame;
use crate::stats::HubStats;

/// Turns an inbound envelope into exactly one response envelope.
///
/// Runs on the connection's inbound task. An `Err` is sent back to the peer
/// as an error envelope and the connection stays open; so does a panic.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one envelope.
    ///
    /// # Errors
    ///
    /// Any [`HandlerError`] is reported to the peer.
    fn handle(
        &self,
        connection: &Arc<Connection>,
        envelope: Envelope,
    ) -> Result<Envelope, HandlerError>;
}

impl<F> MessageHandler for F
where
    F: Fn(&Arc<Connection>, Envelope) -> Result<Envelope, HandlerError> + Send + Sync + 'static,
{
    fn handle(
        &self,
        connection: &Arc<Connection>,
        envelope: Envelope,
    ) -> Result<Envelope, HandlerError> {
        self(connection, envelope)
    }
}

/// Wrap a closure as a shareable handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(&Arc<Connection>, Envelope) -> Result<Envelope, HandlerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

struct Shared {
    registry: DashMap<UserId, Vec<Arc<Connection>>>,
    stats: RwLock<HubStats>,
    config: ConnectionConfig,
}

impl Shared {
    fn remove(&self, user: &UserId, id: ConnectionId) -> bool {
        let (removed, remaining) = {
            let Some(mut connections) = self.registry.get_mut(user) else {
                return false;
            };
            let before = connections.len();
            connections.retain(|c| c.id() != id);
            (connections.len() < before, connections.len())
        };

        if remaining == 0 {
            self.registry.remove_if(user, |_, connections| connections.is_empty());
        }

        if removed {
            self.stats.write().connection_removed();
            info!(connection = %id, user = %user, remaining, "Connection removed");
        }
        removed
    }

    /// Enqueue one encoded frame on every target. Returns the number of
    /// successful enqueues.
    async fn deliver(&self, targets: &[Arc<Connection>], frame: QueuedFrame) -> usize {
        let results = join_all(targets.iter().map(|c| c.send_frame(frame.clone()))).await;
        let delivered = results.into_iter().filter(|ok| *ok).count();

        if delivered > 0 {
            self.stats.write().messages_sent += delivered as u64;
        }
        delivered
    }

    async fn handle_message(
        &self,
        handler: &dyn MessageHandler,
        connection: &Arc<Connection>,
        envelope: Envelope,
    ) {
        self.stats.write().messages_received += 1;

        let kind = envelope.kind.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(connection, envelope)));

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                debug!(connection = %connection.id(), kind = %kind, error = %e, "Handler rejected message");
                Envelope::error(e.to_string())
            }
            Err(_) => {
                error!(
                    connection = %connection.id(),
                    user = %connection.user(),
                    kind = %kind,
                    "Handler panicked"
                );
                Envelope::error(HandlerError::panicked().to_string())
            }
        };

        match connection.direct_send(&response).await {
            Ok(()) => {
                self.stats.write().messages_sent += 1;
            }
            Err(e) => debug!(connection = %connection.id(), error = %e, "Response not delivered"),
        }
    }
}

/// Ties a connection to its hub and handler.
struct Binding {
    hub: Weak<Shared>,
    handler: Arc<dyn MessageHandler>,
}

#[async_trait]
impl ConnectionOwner for Binding {
    fn on_close(&self, connection: &Connection) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(connection.user(), connection.id());
        }
    }

    async fn on_message(&self, connection: &Arc<Connection>, envelope: Envelope) {
        if let Some(hub) = self.hub.upgrade() {
            hub.handle_message(self.handler.as_ref(), connection, envelope)
                .await;
        }
    }
}

/// Registry of live connections grouped by user.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Hub {
    shared: Arc<Shared>,
}

impl Hub {
    /// Create a hub whose connections use `config`.
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        info!("Creating hub with config: {:?}", config);
        Self {
            shared: Arc::new(Shared {
                registry: DashMap::new(),
                stats: RwLock::new(HubStats::default()),
                config,
            }),
        }
    }

    /// Upgrade a transport into a connection for `user` and register it.
    ///
    /// Every envelope the peer sends is passed to `handler`, and its result
    /// written back on the same connection.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if the upgrade fails; nothing is
    /// registered in that case.
    pub async fn add<U: Upgrade>(
        &self,
        upgrade: U,
        user: impl Into<UserId>,
        heartbeat: bool,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Arc<Connection>, HubError> {
        let user = user.into();
        let binding = Arc::new(Binding {
            hub: Arc::downgrade(&self.shared),
            handler,
        });

        let connection = Connection::open(
            upgrade,
            user.clone(),
            heartbeat,
            self.shared.config.clone(),
            binding,
        )
        .await?;

        self.shared.stats.write().connection_added();
        let count = {
            let mut connections = self.shared.registry.entry(user.clone()).or_default();
            connections.push(connection.clone());
            connections.len()
        };

        info!(
            connection = %connection.id(),
            user = %user,
            connections = count,
            "Connection registered"
        );

        // Closed before it was registered: its close callback found nothing.
        if !connection.is_connected() {
            self.shared.remove(&user, connection.id());
        }

        Ok(connection)
    }

    /// Send an envelope to every connection of `user`.
    ///
    /// Returns how many connections accepted it. A user with no
    /// connections is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Protocol`] if the envelope cannot be encoded.
    pub async fn set_message(
        &self,
        user: impl Into<UserId>,
        envelope: &Envelope,
    ) -> Result<usize, HubError> {
        let user = user.into();
        let frame: QueuedFrame = Arc::from(codec::encode(envelope)?);

        let targets = self.connections(&user);
        if targets.is_empty() {
            debug!(user = %user, kind = %envelope.kind, "No connections for user");
            return Ok(0);
        }

        let delivered = self.shared.deliver(&targets, frame).await;
        if delivered < targets.len() {
            warn!(
                user = %user,
                delivered,
                targets = targets.len(),
                "Message not delivered to every connection"
            );
        } else {
            debug!(user = %user, delivered, "Message delivered");
        }
        Ok(delivered)
    }

    /// Send an envelope to every registered connection.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Protocol`] if the envelope cannot be encoded.
    pub async fn broadcast(&self, envelope: &Envelope) -> Result<usize, HubError> {
        let frame: QueuedFrame = Arc::from(codec::encode(envelope)?);

        let targets: Vec<Arc<Connection>> = self
            .shared
            .registry
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();

        let delivered = self.shared.deliver(&targets, frame).await;
        debug!(
            kind = %envelope.kind,
            delivered,
            targets = targets.len(),
            "Broadcast"
        );
        Ok(delivered)
    }

    /// Unregister a connection. Returns `false` if it was not registered.
    pub fn remove(&self, user: &UserId, connection: ConnectionId) -> bool {
        self.shared.remove(user, connection)
    }

    /// Get a snapshot of the statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        *self.shared.stats.read()
    }

    /// Close every connection and empty the registry.
    pub fn cleanup(&self) {
        let users: Vec<UserId> = self
            .shared
            .registry
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let mut drained = Vec::new();
        for user in users {
            if let Some((_, connections)) = self.shared.registry.remove(&user) {
                drained.extend(connections);
            }
        }
        self.shared.stats.write().active_connections = 0;

        let count = drained.len();
        for connection in drained {
            connection.close();
        }

        info!(connections = count, "Hub cleaned up");
    }

    /// Snapshot of a user's connections.
    #[must_use]
    pub fn connections(&self, user: &UserId) -> Vec<Arc<Connection>> {
        self.shared
            .registry
            .get(user)
            .map(|c| c.value().clone())
            .unwrap_or_default()
    }

    /// Number of connections a user has.
    #[must_use]
    pub fn user_connection_count(&self, user: &UserId) -> usize {
        self.shared.registry.get(user).map_or(0, |c| c.len())
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.registry.iter().map(|entry| entry.len()).sum()
    }

    /// Number of users with at least one connection.
    #[must_use]
    pub fn active_users(&self) -> usize {
        self.shared.registry.len()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(ConnectionConfig::default())
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("users", &self.active_users())
            .field("stats", &self.stats())
            .finish()
    }
}
