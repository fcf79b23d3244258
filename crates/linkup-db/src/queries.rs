use crate::Database;
use crate::models::{DeliveredRow, MessageRow, UserRow, format_ts};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};

const MESSAGE_COLUMNS: &str =
    "m.id, m.sender_id, m.receiver_id, m.body, m.created_at, m.status, m.delivered_at, m.read_at, m.is_edited, m.is_deleted";

/// `?1` is the viewing user.
const NOT_HIDDEN: &str =
    "NOT EXISTS (SELECT 1 FROM message_hidden h WHERE h.message_id = m.id AND h.user_id = ?1)";

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn user_exists(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM users WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn set_user_online(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE users SET is_online = 1 WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    pub fn set_user_offline(&self, id: &str, last_seen: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_online = 0, last_seen = ?2 WHERE id = ?1",
                (id, format_ts(last_seen)),
            )?;
            Ok(())
        })
    }

    // -- Messages --

    pub fn insert_message(&self, row: &MessageRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, body, created_at, status, delivered_at, read_at, is_edited, is_deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    row.id,
                    row.sender_id,
                    row.receiver_id,
                    row.body,
                    row.created_at,
                    row.status,
                    row.delivered_at,
                    row.read_at,
                    row.is_edited,
                    row.is_deleted,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM messages m WHERE m.id = ?1", MESSAGE_COLUMNS);
            let row = conn.query_row(&sql, [id], map_message).optional()?;
            Ok(row)
        })
    }

    /// Messages between `user_id` and `peer_id`, oldest first, minus the ones
    /// `user_id` has hidden.
    pub fn get_conversation(&self, user_id: &str, peer_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages m
                 WHERE ((m.sender_id = ?1 AND m.receiver_id = ?2) OR (m.sender_id = ?2 AND m.receiver_id = ?1))
                   AND {}
                 ORDER BY m.created_at ASC, m.rowid ASC",
                MESSAGE_COLUMNS, NOT_HIDDEN
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id, peer_id], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Every message `user_id` takes part in and has not hidden, newest first.
    pub fn get_visible_messages(&self, user_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages m
                 WHERE (m.sender_id = ?1 OR m.receiver_id = ?1) AND {}
                 ORDER BY m.created_at DESC, m.rowid DESC",
                MESSAGE_COLUMNS, NOT_HIDDEN
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_unread(&self, user_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT COUNT(*) FROM messages m
                 WHERE m.receiver_id = ?1 AND m.status != 'read' AND {}",
                NOT_HIDDEN
            );
            let count: i64 = conn.query_row(&sql, [user_id], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    /// Advance every `sent` message addressed to `receiver_id` to `delivered`.
    /// Messages already delivered or read are untouched.
    pub fn mark_delivered_for_receiver(
        &self,
        receiver_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveredRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "UPDATE messages SET status = 'delivered', delivered_at = ?2
                 WHERE receiver_id = ?1 AND status = 'sent'
                 RETURNING id, sender_id",
            )?;
            let rows = stmt
                .query_map((receiver_id, format_ts(now)), |row| {
                    Ok(DeliveredRow {
                        id: row.get(0)?,
                        sender_id: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mark everything `sender_id` sent to `reader_id` as read. Returns the
    /// number of messages that changed.
    pub fn mark_read(&self, reader_id: &str, sender_id: &str, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages
                 SET status = 'read', read_at = ?3, delivered_at = COALESCE(delivered_at, ?3)
                 WHERE receiver_id = ?1 AND sender_id = ?2 AND status != 'read'",
                (reader_id, sender_id, format_ts(now)),
            )?;
            Ok(changed)
        })
    }

    pub fn update_message_body(&self, id: &str, body: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET body = ?2, is_edited = 1 WHERE id = ?1",
                (id, body),
            )?;
            Ok(changed)
        })
    }

    pub fn soft_delete_message(&self, id: &str, placeholder: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET body = ?2, is_deleted = 1 WHERE id = ?1",
                (id, placeholder),
            )?;
            Ok(changed)
        })
    }

    /// Hide every message between the two users from `user_id` only.
    pub fn hide_conversation(&self, user_id: &str, peer_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO message_hidden (message_id, user_id)
                 SELECT m.id, ?1 FROM messages m
                 WHERE (m.sender_id = ?1 AND m.receiver_id = ?2) OR (m.sender_id = ?2 AND m.receiver_id = ?1)",
                (user_id, peer_id),
            )?;
            Ok(changed)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, password, is_online, last_seen, created_at FROM users WHERE {} = ?1",
        column
    );
    let row = conn
        .query_row(&sql, [value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                is_online: row.get(3)?,
                last_seen: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        body: row.get(3)?,
        created_at: row.get(4)?,
        status: row.get(5)?,
        delivered_at: row.get(6)?,
        read_at: row.get(7)?,
        is_edited: row.get(8)?,
        is_deleted: row.get(9)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use linkup_types::models::{Message, MessageStatus};

    const ALICE: &str = "507f1f77bcf86cd799439011";
    const BOB: &str = "507f191e810c19729de860ea";

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user(ALICE, "alice", "x").unwrap();
        db.create_user(BOB, "bob", "x").unwrap();
        db
    }

    fn insert(db: &Database, id: &str, from: &str, to: &str, status: MessageStatus, at: DateTime<Utc>) {
        let delivered_at = (status >= MessageStatus::Delivered).then_some(at);
        let read_at = (status == MessageStatus::Read).then_some(at);
        let msg = Message {
            id: id.into(),
            sender_id: from.into(),
            receiver_id: to.into(),
            body: format!("body of {}", id),
            created_at: at,
            status,
            delivered_at,
            read_at,
            is_edited: false,
            is_deleted: false,
        };
        db.insert_message(&MessageRow::from_message(&msg)).unwrap();
    }

    #[test]
    fn user_presence_fields_round_trip() {
        let db = setup();
        db.set_user_online(ALICE).unwrap();
        let alice = db.get_user_by_id(ALICE).unwrap().unwrap().into_user().unwrap();
        assert!(alice.is_online);
        assert!(alice.last_seen.is_none());

        let seen = Utc::now();
        db.set_user_offline(ALICE, seen).unwrap();
        let alice = db.get_user_by_id(ALICE).unwrap().unwrap().into_user().unwrap();
        assert!(!alice.is_online);
        assert_eq!(alice.last_seen.map(format_ts), Some(format_ts(seen)));
        assert!(!db.user_exists("000000000000000000000000").unwrap());
    }

    #[test]
    fn delivered_advancement_skips_read_and_is_idempotent() {
        let db = setup();
        let t = Utc::now();
        insert(&db, "m1", ALICE, BOB, MessageStatus::Sent, t);
        insert(&db, "m2", ALICE, BOB, MessageStatus::Read, t + Duration::seconds(1));
        insert(&db, "m3", BOB, ALICE, MessageStatus::Sent, t + Duration::seconds(2));

        let advanced = db.mark_delivered_for_receiver(BOB, Utc::now()).unwrap();
        assert_eq!(advanced.len(), 1);
        assert_eq!(advanced[0].id, "m1");
        assert_eq!(advanced[0].sender_id, ALICE);

        assert!(db.mark_delivered_for_receiver(BOB, Utc::now()).unwrap().is_empty());
        let m2 = db.get_message("m2").unwrap().unwrap();
        assert_eq!(m2.status, "read");
        let m3 = db.get_message("m3").unwrap().unwrap();
        assert_eq!(m3.status, "sent");
    }

    #[test]
    fn mark_read_fills_delivered_at_for_sent_messages() {
        let db = setup();
        insert(&db, "m1", ALICE, BOB, MessageStatus::Sent, Utc::now());
        assert_eq!(db.mark_read(BOB, ALICE, Utc::now()).unwrap(), 1);
        let m1 = db.get_message("m1").unwrap().unwrap().into_message().unwrap();
        assert_eq!(m1.status, MessageStatus::Read);
        assert!(m1.delivered_at.is_some());
        assert!(m1.read_at.is_some());
        assert_eq!(db.mark_read(BOB, ALICE, Utc::now()).unwrap(), 0);
    }

    #[test]
    fn hidden_messages_only_disappear_for_the_hider() {
        let db = setup();
        let t = Utc::now();
        insert(&db, "m1", ALICE, BOB, MessageStatus::Sent, t);
        insert(&db, "m2", BOB, ALICE, MessageStatus::Sent, t + Duration::seconds(1));

        assert_eq!(db.hide_conversation(ALICE, BOB).unwrap(), 2);
        assert_eq!(db.hide_conversation(ALICE, BOB).unwrap(), 0);

        assert!(db.get_conversation(ALICE, BOB).unwrap().is_empty());
        assert_eq!(db.get_conversation(BOB, ALICE).unwrap().len(), 2);
        assert_eq!(db.count_unread(ALICE).unwrap(), 0);
        assert_eq!(db.count_unread(BOB).unwrap(), 1);
    }

    #[test]
    fn conversation_is_ordered_oldest_first() {
        let db = setup();
        let t = Utc::now();
        insert(&db, "late", BOB, ALICE, MessageStatus::Sent, t + Duration::seconds(5));
        insert(&db, "early", ALICE, BOB, MessageStatus::Sent, t);
        let ids: Vec<String> = db
            .get_conversation(ALICE, BOB)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["early", "late"]);
    }
}
