//! Database row types — these map directly to SQLite rows.
//! Timestamps are stored as RFC 3339 text with microseconds so that
//! lexical order equals chronological order.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use linkup_types::models::{Message, User};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub is_online: bool,
    pub last_seen: Option<String>,
    pub created_at: String,
}

impl UserRow {
    pub fn into_user(self) -> Result<User> {
        Ok(User {
            last_seen: parse_opt_ts(self.last_seen.as_deref())?,
            created_at: parse_ts(&self.created_at)?,
            id: self.id,
            username: self.username,
            is_online: self.is_online,
        })
    }
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
    pub created_at: String,
    pub status: String,
    pub delivered_at: Option<String>,
    pub read_at: Option<String>,
    pub is_edited: bool,
    pub is_deleted: bool,
}

impl MessageRow {
    pub fn from_message(m: &Message) -> Self {
        Self {
            id: m.id.clone(),
            sender_id: m.sender_id.clone(),
            receiver_id: m.receiver_id.clone(),
            body: m.body.clone(),
            created_at: format_ts(m.created_at),
            status: m.status.as_str().to_string(),
            delivered_at: m.delivered_at.map(format_ts),
            read_at: m.read_at.map(format_ts),
            is_edited: m.is_edited,
            is_deleted: m.is_deleted,
        }
    }

    pub fn into_message(self) -> Result<Message> {
        let status = self
            .status
            .parse()
            .map_err(|e: String| anyhow::anyhow!("message {}: {}", self.id, e))?;
        Ok(Message {
            status,
            created_at: parse_ts(&self.created_at)?,
            delivered_at: parse_opt_ts(self.delivered_at.as_deref())?,
            read_at: parse_opt_ts(self.read_at.as_deref())?,
            id: self.id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            body: self.body,
            is_edited: self.is_edited,
            is_deleted: self.is_deleted,
        })
    }
}

/// A `sent` message that was just advanced to `delivered`.
pub struct DeliveredRow {
    pub id: String,
    pub sender_id: String,
}

pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    s.parse::<DateTime<Utc>>()
        .with_context(|| format!("corrupt timestamp '{}'", s))
}

fn parse_opt_ts(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    s.map(parse_ts).transpose()
}
