//! Message delivery pipeline: persistence plus the sent -> delivered -> read
//! lifecycle, driven by REST calls and by presence changes.

use std::collections::HashMap;

use chrono::{SubsecRound, Utc};
use thiserror::Error;
use tracing::{debug, info};

use linkup_db::models::MessageRow;
use linkup_types::events::ServerEvent;
use linkup_types::ids::new_object_id;
use linkup_types::models::{ConversationSummary, Message, MessageStatus};

use crate::dispatcher::Dispatcher;

/// Body a soft-deleted message is left with.
pub const DELETED_PLACEHOLDER: &str = "This message was deleted";

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("message not found")]
    NotFound,

    #[error("only the sender may change this message")]
    Unauthorized,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl Dispatcher {
    /// Persist a new message. It starts out `delivered` if the receiver is
    /// online right now, `sent` otherwise. The receiver must exist.
    pub async fn send_message(&self, sender_id: &str, receiver_id: &str, body: &str) -> Result<Message, DeliveryError> {
        // Storage keeps microseconds
        let now = Utc::now().trunc_subsecs(6);
        let online = self.is_online(receiver_id).await;
        let message = Message {
            id: new_object_id(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            body: body.to_string(),
            created_at: now,
            status: if online { MessageStatus::Delivered } else { MessageStatus::Sent },
            delivered_at: online.then_some(now),
            read_at: None,
            is_edited: false,
            is_deleted: false,
        };

        let row = MessageRow::from_message(&message);
        self.with_db(move |db| db.insert_message(&row)).await?;

        debug!("{} -> {} message {} ({})", sender_id, receiver_id, message.id, message.status);
        Ok(message)
    }

    /// Advance everything still `sent` to `user_id` to `delivered` and tell
    /// the online senders. Re-running it is a no-op.
    pub async fn flush_pending(&self, user_id: &str) -> Result<usize, DeliveryError> {
        let uid = user_id.to_string();
        let delivered = self
            .with_db(move |db| db.mark_delivered_for_receiver(&uid, Utc::now()))
            .await?;

        if !delivered.is_empty() {
            info!("Delivered {} pending messages to {}", delivered.len(), user_id);
        }

        for row in &delivered {
            self.notify(
                &row.sender_id,
                ServerEvent::MessageStatusUpdate {
                    message_id: row.id.clone(),
                    status: MessageStatus::Delivered,
                },
            )
            .await;
        }

        Ok(delivered.len())
    }

    /// `reader_id` has read everything `peer_id` sent them. The peer gets a
    /// single conversation-level receipt, not one per message.
    pub async fn mark_read(&self, reader_id: &str, peer_id: &str) -> Result<usize, DeliveryError> {
        let (reader, peer) = (reader_id.to_string(), peer_id.to_string());
        let changed = self
            .with_db(move |db| db.mark_read(&reader, &peer, Utc::now()))
            .await?;

        if changed > 0 {
            self.notify(
                peer_id,
                ServerEvent::MessagesReadUpdate {
                    receiver_id: reader_id.to_string(),
                },
            )
            .await;
        }

        Ok(changed)
    }

    pub async fn get_message(&self, message_id: &str) -> Result<Message, DeliveryError> {
        let mid = message_id.to_string();
        let row = self
            .with_db(move |db| db.get_message(&mid))
            .await?
            .ok_or(DeliveryError::NotFound)?;
        Ok(row.into_message()?)
    }

    pub async fn edit_message(&self, requester_id: &str, message_id: &str, new_body: &str) -> Result<Message, DeliveryError> {
        let message = self.get_message(message_id).await?;
        if message.sender_id != requester_id {
            return Err(DeliveryError::Unauthorized);
        }

        let (mid, body) = (message_id.to_string(), new_body.to_string());
        let changed = self.with_db(move |db| db.update_message_body(&mid, &body)).await?;
        if changed == 0 {
            return Err(DeliveryError::NotFound);
        }

        let updated = self.get_message(message_id).await?;
        self.notify(
            &updated.receiver_id,
            ServerEvent::MessageUpdated {
                message_id: updated.id.clone(),
                body: updated.body.clone(),
                is_edited: true,
            },
        )
        .await;
        Ok(updated)
    }

    pub async fn soft_delete_message(&self, requester_id: &str, message_id: &str) -> Result<Message, DeliveryError> {
        let message = self.get_message(message_id).await?;
        if message.sender_id != requester_id {
            return Err(DeliveryError::Unauthorized);
        }

        let mid = message_id.to_string();
        let changed = self
            .with_db(move |db| db.soft_delete_message(&mid, DELETED_PLACEHOLDER))
            .await?;
        if changed == 0 {
            return Err(DeliveryError::NotFound);
        }

        let updated = self.get_message(message_id).await?;
        self.notify(
            &updated.receiver_id,
            ServerEvent::MessageDeleted {
                message_id: updated.id.clone(),
            },
        )
        .await;
        Ok(updated)
    }

    /// Clear `user_id`'s copy of the conversation with `peer_id`. The peer
    /// keeps their copy and is not told.
    pub async fn hide_for_user(&self, user_id: &str, peer_id: &str) -> Result<usize, DeliveryError> {
        let (uid, pid) = (user_id.to_string(), peer_id.to_string());
        Ok(self.with_db(move |db| db.hide_conversation(&uid, &pid)).await?)
    }

    pub async fn list_conversation(&self, user_id: &str, peer_id: &str) -> Result<Vec<Message>, DeliveryError> {
        let (uid, pid) = (user_id.to_string(), peer_id.to_string());
        let rows = self.with_db(move |db| db.get_conversation(&uid, &pid)).await?;
        rows.into_iter()
            .map(|r| r.into_message().map_err(DeliveryError::from))
            .collect()
    }

    /// One entry per peer, most recent conversation first.
    pub async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationSummary>, DeliveryError> {
        let uid = user_id.to_string();
        let rows = self.with_db(move |db| db.get_visible_messages(&uid)).await?;

        // Rows come newest first, so the first row per peer is its last message.
        let mut order: Vec<String> = Vec::new();
        let mut by_peer: HashMap<String, ConversationSummary> = HashMap::new();
        for row in rows {
            let message = row.into_message()?;
            let peer_id = message.peer_of(user_id).to_string();
            let unread = message.receiver_id == user_id && message.status != MessageStatus::Read;

            let entry = by_peer.entry(peer_id.clone()).or_insert_with(|| {
                order.push(peer_id.clone());
                ConversationSummary {
                    peer_id,
                    last_message: message,
                    unread_count: 0,
                }
            });
            if unread {
                entry.unread_count += 1;
            }
        }

        Ok(order
            .into_iter()
            .filter_map(|peer| by_peer.remove(&peer))
            .collect())
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<u64, DeliveryError> {
        let uid = user_id.to_string();
        Ok(self.with_db(move |db| db.count_unread(&uid)).await?)
    }
}
