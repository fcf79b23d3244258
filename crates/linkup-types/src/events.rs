use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::MessageStatus;

/// Transient id of one live WebSocket connection. Signaling is addressed by
/// connection id, not by user id, so anonymous callers can take part.
pub type ConnectionId = Uuid;

/// Events sent from the server to a live connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// First frame on every connection: tells the client its connection id
    Ready {
        connection_id: ConnectionId,
        user_id: Option<String>,
    },

    /// A user came online or went offline
    UserStatusChange {
        user_id: String,
        is_online: bool,
        last_seen: Option<DateTime<Utc>>,
    },

    /// A chat message addressed to this user
    NewMessage { sender_id: String, message: Value },

    /// Delivery status of a message this user sent has advanced
    MessageStatusUpdate {
        message_id: String,
        status: MessageStatus,
    },

    /// `receiver_id` has read everything this user sent them, up to now
    MessagesReadUpdate { receiver_id: String },

    MessageUpdated {
        message_id: String,
        body: String,
        is_edited: bool,
    },

    MessageDeleted { message_id: String },

    /// A join-call request was refused; the connection stays open
    CallDenied { reason: String },

    /// A connection joined the room; `members` is the full membership after the join
    UserJoined {
        connection_id: ConnectionId,
        members: Vec<ConnectionId>,
    },

    /// A connection left the room; `members` is the membership after the leave
    UserLeft {
        connection_id: ConnectionId,
        members: Vec<ConnectionId>,
    },

    /// Opaque WebRTC signaling payload relayed from another connection
    Signal {
        from_connection_id: ConnectionId,
        payload: Value,
    },

    /// In-room chat line, live or replayed from the room buffer
    VideoChatMessage {
        payload: Value,
        sender_label: String,
        origin_connection_id: ConnectionId,
    },
}

impl ServerEvent {
    /// Wire name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::UserStatusChange { .. } => "user-status-change",
            Self::NewMessage { .. } => "new-message",
            Self::MessageStatusUpdate { .. } => "message-status-update",
            Self::MessagesReadUpdate { .. } => "messages-read-update",
            Self::MessageUpdated { .. } => "message-updated",
            Self::MessageDeleted { .. } => "message-deleted",
            Self::CallDenied { .. } => "call-denied",
            Self::UserJoined { .. } => "user-joined",
            Self::UserLeft { .. } => "user-left",
            Self::Signal { .. } => "signal",
            Self::VideoChatMessage { .. } => "video-chat-message",
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    /// Bind this connection to a user in the presence registry
    RegisterUser { user_id: String },

    /// Live-only forward of a chat message; persistence goes through REST
    SendChatMessage {
        sender_id: String,
        receiver_id: String,
        message: Value,
    },

    /// `receiver_id` (the reader) tells `sender_id` it has read their messages
    MarkAsRead {
        sender_id: String,
        receiver_id: String,
    },

    EditMessage {
        message_id: String,
        new_message: String,
        receiver_id: String,
    },

    DeleteMessage {
        message_id: String,
        receiver_id: String,
    },

    JoinCall {
        room_id: String,
        user_id: Option<String>,
    },

    LeaveCall,

    /// Forward `payload` verbatim to another connection
    Signal {
        to_connection_id: ConnectionId,
        payload: Value,
    },

    VideoChatMessage { payload: Value, sender_label: String },
}

impl ClientCommand {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RegisterUser { .. } => "register-user",
            Self::SendChatMessage { .. } => "send-chat-message",
            Self::MarkAsRead { .. } => "mark-as-read",
            Self::EditMessage { .. } => "edit-message",
            Self::DeleteMessage { .. } => "delete-message",
            Self::JoinCall { .. } => "join-call",
            Self::LeaveCall => "leave-call",
            Self::Signal { .. } => "signal",
            Self::VideoChatMessage { .. } => "video-chat-message",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn server_events_use_kebab_case_names() {
        let event = ServerEvent::UserStatusChange {
            user_id: "507f1f77bcf86cd799439011".into(),
            is_online: true,
            last_seen: None,
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["type"], "user-status-change");
        assert_eq!(v["data"]["userId"], "507f1f77bcf86cd799439011");
        assert_eq!(v["data"]["isOnline"], true);
    }

    #[test]
    fn status_update_carries_lowercase_status() {
        let event = ServerEvent::MessageStatusUpdate {
            message_id: "m1".into(),
            status: MessageStatus::Delivered,
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["type"], "message-status-update");
        assert_eq!(v["data"]["status"], "delivered");
    }

    #[test]
    fn parses_join_call_without_user() {
        let cmd: ClientCommand = serde_json::from_value(json!({
            "type": "join-call",
            "data": { "roomId": "standup-call-42" }
        }))
        .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::JoinCall {
                room_id: "standup-call-42".into(),
                user_id: None,
            }
        );
    }

    #[test]
    fn parses_unit_leave_call() {
        let cmd: ClientCommand = serde_json::from_value(json!({ "type": "leave-call" })).unwrap();
        assert_eq!(cmd, ClientCommand::LeaveCall);
    }

    #[test]
    fn signal_payload_is_kept_verbatim() {
        let to = Uuid::new_v4();
        let payload = json!({ "sdp": "v=0...", "weird": [1, 2, { "x": null }] });
        let cmd: ClientCommand = serde_json::from_value(json!({
            "type": "signal",
            "data": { "toConnectionId": to, "payload": payload.clone() }
        }))
        .unwrap();
        match cmd {
            ClientCommand::Signal { to_connection_id, payload: p } => {
                assert_eq!(to_connection_id, to);
                assert_eq!(p, payload);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
