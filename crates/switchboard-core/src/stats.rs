//! Hub statistics.

use serde::Serialize;

/// Counters maintained by the hub.
///
/// `total_connections`, `messages_sent` and `messages_received` only ever
/// grow; `active_connections` tracks the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Connections ever registered.
    pub total_connections: u64,
    /// Connections currently registered.
    pub active_connections: u64,
    /// Successful deliveries, counted per connection.
    pub messages_sent: u64,
    /// Envelopes received from peers.
    pub messages_received: u64,
}

impl HubStats {
    pub(crate) fn connection_added(&mut self) {
        self.total_connections += 1;
        self.active_connections += 1;
    }

    pub(crate) fn connection_removed(&mut self) {
        self.active_connections = self.active_connections.saturating_sub(1);
    }
}
