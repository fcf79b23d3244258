//! Meeting rooms: who may join, who is in, and the in-room chat buffer.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use linkup_types::events::{ConnectionId, ServerEvent};

/// Two 24-char lowercase hex user ids joined by a hyphen.
static PRIVATE_ROOM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9a-f]{24})-([0-9a-f]{24})$").expect("private room pattern is valid")
});

const MAX_ROOM_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinDecision {
    Allow,
    Deny(String),
}

/// The two participants of a private room, or `None` for a public room id.
pub fn private_participants(room_id: &str) -> Option<(&str, &str)> {
    let caps = PRIVATE_ROOM.captures(room_id)?;
    let a = caps.get(1)?.as_str();
    let b = caps.get(2)?.as_str();
    Some((a, b))
}

/// Private rooms admit only their two participants, and only when logged in.
/// Anything else is a join-with-code room open to every connection.
pub fn validate_join(room_id: &str, user_id: Option<&str>) -> JoinDecision {
    if room_id.trim().is_empty() || room_id.len() > MAX_ROOM_ID_LEN {
        return JoinDecision::Deny("Invalid meeting code".into());
    }

    let Some((a, b)) = private_participants(room_id) else {
        return JoinDecision::Allow;
    };

    match user_id.filter(|u| !u.is_empty()) {
        None => JoinDecision::Deny("You must be logged in to join this private call".into()),
        Some(u) if u == a || u == b => JoinDecision::Allow,
        Some(_) => JoinDecision::Deny("You are not a participant in this private call".into()),
    }
}

/// One buffered in-room chat line.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomChatMessage {
    pub sender_label: String,
    pub payload: Value,
    pub origin_connection_id: ConnectionId,
}

impl RoomChatMessage {
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::VideoChatMessage {
            payload: self.payload.clone(),
            sender_label: self.sender_label.clone(),
            origin_connection_id: self.origin_connection_id,
        }
    }
}

#[derive(Debug)]
pub struct JoinOutcome {
    /// Membership after the join, in join order
    pub members: Vec<ConnectionId>,
    /// Chat lines posted before the join, in post order
    pub history: Vec<RoomChatMessage>,
}

#[derive(Debug)]
pub struct LeaveOutcome {
    pub room_id: String,
    /// Membership after the leave
    pub members: Vec<ConnectionId>,
}

#[derive(Default)]
struct Room {
    members: Vec<ConnectionId>,
    history: Vec<RoomChatMessage>,
    /// Bumped on every join so a pending cleanup can tell the room was reused.
    epoch: u64,
}

#[derive(Default)]
struct RoomState {
    rooms: HashMap<String, Room>,
    /// conn_id -> room it is in. A connection is in at most one room.
    memberships: HashMap<ConnectionId, String>,
}

/// In-memory room membership and chat buffers.
#[derive(Clone)]
pub struct RoomStore {
    state: Arc<RwLock<RoomState>>,
    grace: Duration,
}

impl RoomStore {
    pub fn new(grace: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(RoomState::default())),
            grace,
        }
    }

    /// Add `conn_id` to `room_id`, creating the room on first join.
    /// The caller must have left any previous room first.
    pub async fn join(&self, room_id: &str, conn_id: ConnectionId) -> JoinOutcome {
        let mut state = self.state.write().await;
        state.memberships.insert(conn_id, room_id.to_string());

        let room = state.rooms.entry(room_id.to_string()).or_default();
        room.epoch += 1;
        if !room.members.contains(&conn_id) {
            room.members.push(conn_id);
        }

        JoinOutcome {
            members: room.members.clone(),
            history: room.history.clone(),
        }
    }

    /// Remove `conn_id` from its room. When the room empties, its buffer is
    /// dropped after the grace window unless someone joins in the meantime.
    pub async fn leave(&self, conn_id: ConnectionId) -> Option<LeaveOutcome> {
        let (outcome, empty_epoch) = {
            let mut state = self.state.write().await;
            let room_id = state.memberships.remove(&conn_id)?;
            let room = state.rooms.get_mut(&room_id)?;
            room.members.retain(|c| *c != conn_id);

            let empty_epoch = room.members.is_empty().then_some(room.epoch);
            let outcome = LeaveOutcome {
                room_id,
                members: room.members.clone(),
            };
            (outcome, empty_epoch)
        };

        if let Some(epoch) = empty_epoch {
            self.schedule_cleanup(outcome.room_id.clone(), epoch);
        }

        Some(outcome)
    }

    /// Buffer a chat line in the sender's room. Returns the members to deliver it to.
    pub async fn post(&self, origin: ConnectionId, sender_label: String, payload: Value) -> Option<(RoomChatMessage, Vec<ConnectionId>)> {
        let mut state = self.state.write().await;
        let room_id = state.memberships.get(&origin)?.clone();
        let room = state.rooms.get_mut(&room_id)?;

        let message = RoomChatMessage {
            sender_label,
            payload,
            origin_connection_id: origin,
        };
        room.history.push(message.clone());
        Some((message, room.members.clone()))
    }

    pub async fn room_of(&self, conn_id: ConnectionId) -> Option<String> {
        self.state.read().await.memberships.get(&conn_id).cloned()
    }

    pub async fn members(&self, room_id: &str) -> Vec<ConnectionId> {
        self.state
            .read()
            .await
            .rooms
            .get(room_id)
            .map(|r| r.members.clone())
            .unwrap_or_default()
    }

    /// Whether the room (and so its chat buffer) still exists.
    pub async fn exists(&self, room_id: &str) -> bool {
        self.state.read().await.rooms.contains_key(room_id)
    }

    fn schedule_cleanup(&self, room_id: String, epoch: u64) {
        let state = self.state.clone();
        let grace = self.grace;
        debug!("Room {} is empty, dropping buffer in {:?}", room_id, grace);

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;

            let mut state = state.write().await;
            let still_idle = state
                .rooms
                .get(&room_id)
                .is_some_and(|r| r.members.is_empty() && r.epoch == epoch);
            if still_idle {
                state.rooms.remove(&room_id);
                info!("Room {} closed", room_id);
            }
        });
    }
}
