use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tracing::{error, info, warn};
use uuid::Uuid;

use linkup_db::Database;
use linkup_types::events::{ConnectionId, ServerEvent};

use crate::presence::PresenceRegistry;
use crate::rooms::{JoinDecision, RoomStore, validate_join};

/// How long an empty meeting room keeps its chat buffer.
pub const DEFAULT_ROOM_GRACE: Duration = Duration::from_secs(30);

/// Owns every piece of shared real-time state: live connections, presence,
/// and meeting rooms. REST code only reads presence and sends notifications
/// through it.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for events every live connection receives
    broadcast_tx: broadcast::Sender<ServerEvent>,

    /// Live connections: conn_id -> outbound channel
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>>,

    presence: PresenceRegistry,

    /// Held across a presence change, its DB write and its broadcast, so
    /// status events go out in the same order the registry changed.
    presence_transition: Mutex<()>,

    rooms: RoomStore,

    db: Arc<Database>,
}

impl Dispatcher {
    pub fn new(db: Arc<Database>, room_grace: Duration) -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                connections: RwLock::new(HashMap::new()),
                presence: PresenceRegistry::new(),
                presence_transition: Mutex::new(()),
                rooms: RoomStore::new(room_grace),
                db,
            }),
        }
    }

    /// Subscribe to broadcast events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    pub fn rooms(&self) -> &RoomStore {
        &self.inner.rooms
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.inner.presence
    }

    pub(crate) fn db(&self) -> Arc<Database> {
        self.inner.db.clone()
    }

    /// Run a blocking database call off the async runtime.
    pub(crate) async fn with_db<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db();
        tokio::task::spawn_blocking(move || f(db.as_ref()))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                anyhow::anyhow!("database task failed: {}", e)
            })?
    }

    // -- Connections --

    /// Register a new live connection. Returns (conn_id, receiver).
    pub async fn open_connection(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.write().await.insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Tear down everything a connection owns. Safe to call more than once;
    /// only the first call has any effect.
    pub async fn close_connection(&self, conn_id: ConnectionId) {
        if self.inner.connections.write().await.remove(&conn_id).is_none() {
            return;
        }

        self.leave_call(conn_id).await;

        let _transition = self.inner.presence_transition.lock().await;
        if let Some(user_id) = self.inner.presence.unregister(conn_id).await {
            let last_seen = Utc::now();
            let uid = user_id.clone();
            if let Err(e) = self.with_db(move |db| db.set_user_offline(&uid, last_seen)).await {
                warn!("Failed to persist offline state for {}: {}", user_id, e);
            }

            info!("{} went offline ({})", user_id, conn_id);
            self.broadcast(ServerEvent::UserStatusChange {
                user_id,
                is_online: false,
                last_seen: Some(last_seen),
            });
        }
    }

    pub async fn is_connected(&self, conn_id: ConnectionId) -> bool {
        self.inner.connections.read().await.contains_key(&conn_id)
    }

    /// Send an event to one connection. Returns false if it is gone.
    pub async fn send_to_connection(&self, conn_id: ConnectionId, event: ServerEvent) -> bool {
        let connections = self.inner.connections.read().await;
        match connections.get(&conn_id) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    // -- Presence --

    /// Bind `user_id` to `conn_id`, mark the user online, and deliver
    /// everything that was waiting for them.
    pub async fn register_user(&self, user_id: &str, conn_id: ConnectionId) {
        if !self.is_connected(conn_id).await {
            return;
        }
        {
            let _transition = self.inner.presence_transition.lock().await;
            if !self.inner.presence.register(user_id, conn_id).await {
                return;
            }

            let uid = user_id.to_string();
            if let Err(e) = self.with_db(move |db| db.set_user_online(&uid)).await {
                warn!("Failed to persist online state for {}: {}", user_id, e);
            }

            info!("{} is online ({})", user_id, conn_id);
            self.broadcast(ServerEvent::UserStatusChange {
                user_id: user_id.to_string(),
                is_online: true,
                last_seen: None,
            });
        }

        if let Err(e) = self.flush_pending(user_id).await {
            warn!("Failed to flush pending messages for {}: {}", user_id, e);
        }
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.inner.presence.lookup(user_id).await.is_some()
    }

    // -- Meeting rooms --

    /// Check access and join `room_id`. On denial the connection gets a
    /// `call-denied` event and stays where it was.
    pub async fn join_call(&self, conn_id: ConnectionId, room_id: &str, user_id: Option<&str>) -> JoinDecision {
        let decision = validate_join(room_id, user_id);
        if let JoinDecision::Deny(reason) = &decision {
            info!("Join of room {} denied for {}: {}", room_id, conn_id, reason);
            self.send_to_connection(conn_id, ServerEvent::CallDenied { reason: reason.clone() })
                .await;
            return decision;
        }

        if let Some(current) = self.inner.rooms.room_of(conn_id).await {
            if current == room_id {
                return decision;
            }
            self.leave_call(conn_id).await;
        }

        let outcome = self.inner.rooms.join(room_id, conn_id).await;
        info!("{} joined room {} ({} members)", conn_id, room_id, outcome.members.len());

        for &member in outcome.members.iter().filter(|&&m| m != conn_id) {
            self.send_to_connection(
                member,
                ServerEvent::UserJoined {
                    connection_id: conn_id,
                    members: outcome.members.clone(),
                },
            )
            .await;
        }

        for line in &outcome.history {
            self.send_to_connection(conn_id, line.to_event()).await;
        }

        decision
    }

    pub async fn leave_call(&self, conn_id: ConnectionId) {
        let Some(outcome) = self.inner.rooms.leave(conn_id).await else {
            return;
        };
        info!("{} left room {} ({} members)", conn_id, outcome.room_id, outcome.members.len());

        for &member in &outcome.members {
            self.send_to_connection(
                member,
                ServerEvent::UserLeft {
                    connection_id: conn_id,
                    members: outcome.members.clone(),
                },
            )
            .await;
        }
    }

    /// Buffer an in-room chat line and deliver it to every member, origin included.
    pub async fn post_room_chat(&self, origin: ConnectionId, sender_label: String, payload: serde_json::Value) {
        let Some((line, members)) = self.inner.rooms.post(origin, sender_label, payload).await else {
            warn!("{} posted room chat outside a room", origin);
            return;
        };

        let event = line.to_event();
        for member in members {
            self.send_to_connection(member, event.clone()).await;
        }
    }
}
