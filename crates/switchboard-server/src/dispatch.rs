//! The server's built-in message handler.
//!
//! | type    | response                         |
//! |---------|----------------------------------|
//! | `ping`  | `pong` carrying the same data    |
//! | `echo`  | the envelope unchanged           |
//! | `stats` | `stats` carrying a hub snapshot  |
//! | other   | `error` envelope                 |

use std::sync::Arc;
use std::time::Instant;
use switchboard_core::{Connection, HandlerError, Hub, MessageHandler};
use switchboard_protocol::envelope::kinds;
use switchboard_protocol::Envelope;
use tracing::trace;

use crate::metrics;

/// Envelope type echoed back as-is.
pub const ECHO: &str = "echo";

/// Envelope type answered with hub statistics.
pub const STATS: &str = "stats";

/// Default handler for `/ws` connections.
pub struct DefaultHandler {
    hub: Hub,
}

impl DefaultHandler {
    /// Create a handler reporting statistics of `hub`.
    #[must_use]
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }
}

impl MessageHandler for DefaultHandler {
    fn handle(
        &self,
        connection: &Arc<Connection>,
        envelope: Envelope,
    ) -> Result<Envelope, HandlerError> {
        let started = Instant::now();
        let kind = envelope.kind.clone();
        metrics::record_message(&kind);
        trace!(connection = %connection.id(), kind = %kind, "Handling message");

        let result = match kind.as_str() {
            kinds::PING => Ok(Envelope::pong(envelope.data)),
            ECHO => Ok(envelope),
            STATS => serde_json::to_value(self.hub.stats())
                .map(|stats| Envelope::new(STATS, stats))
                .map_err(|e| HandlerError::new(e.to_string())),
            other => Err(HandlerError::new(format!(
                "unsupported message type: {other}"
            ))),
        };

        if result.is_err() {
            metrics::record_error("handler");
        }
        metrics::record_latency(started.elapsed().as_secs_f64());
        result
    }
}
