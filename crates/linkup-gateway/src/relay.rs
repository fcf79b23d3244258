//! Fire-and-forget delivery to live connections.
//!
//! Nothing here queues. If the target is not connected the event is dropped:
//! chat state is already persisted and the client catches up on its next
//! fetch, and stale SDP/ICE is useless anyway.

use serde_json::Value;
use tracing::{debug, trace};

use linkup_types::events::{ConnectionId, ServerEvent};

use crate::dispatcher::Dispatcher;

impl Dispatcher {
    /// Deliver a chat event to `user_id`'s live connection, if there is one.
    /// Returns whether the event was handed to a connection.
    pub async fn notify(&self, user_id: &str, event: ServerEvent) -> bool {
        let Some(conn_id) = self.presence().lookup(user_id).await else {
            debug!("{} is offline, dropping {}", user_id, event.kind());
            return false;
        };

        let sent = self.send_to_connection(conn_id, event).await;
        if !sent {
            debug!("{} maps to closed connection {}, dropping", user_id, conn_id);
        }
        sent
    }

    /// Forward a signaling payload verbatim to another connection.
    pub async fn relay_signal(&self, from: ConnectionId, to: ConnectionId, payload: Value) -> bool {
        let sent = self
            .send_to_connection(
                to,
                ServerEvent::Signal {
                    from_connection_id: from,
                    payload,
                },
            )
            .await;

        if sent {
            trace!("signal {} -> {}", from, to);
        } else {
            debug!("signal {} -> {} dropped, target not connected", from, to);
        }
        sent
    }
}
