use anyhow::Result;
use chrono::{DateTime, Utc};
use courier_types::models::Message;
use rusqlite::Connection;
use uuid::Uuid;

use crate::Database;
use crate::models::{MessageRow, UserRow};

impl Database {
    // -- Users --

    /// Timestamps are written here as RFC 3339, the same format every
    /// reader parses, rather than relying on SQLite's `datetime('now')`.
    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id, username, password_hash, Utc::now().to_rfc3339()),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(conn, "WHERE username = ?1", username)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "WHERE id = ?1", id))
    }

    pub fn user_exists(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM users WHERE id = ?1", [id], |row| {
                    row.get(0)
                })?;
            Ok(count > 0)
        })
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, password, is_online, last_seen, created_at
                 FROM users ORDER BY username",
            )?;
            let rows = stmt
                .query_map([], read_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The user-update path of the presence lifecycle: `last_seen` is NULL
    /// while online, the disconnect timestamp otherwise.
    pub fn set_presence(
        &self,
        id: &str,
        is_online: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_online = ?2, last_seen = ?3 WHERE id = ?1",
                rusqlite::params![id, is_online, last_seen.map(|ts| ts.to_rfc3339())],
            )?;
            Ok(())
        })
    }

    // -- Messages --

    /// Insert the fully-formed row. The caller (the delivery coordinator)
    /// assigns id and timestamps so both transports persist byte-identical
    /// rows; this is the single durable write per logical send.
    pub fn insert_message(&self, msg: &Message) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages
                    (id, sender_id, receiver_id, text, delivered, read, edited, deleted, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    msg.id.to_string(),
                    msg.sender.to_string(),
                    msg.receiver.to_string(),
                    msg.text,
                    msg.delivered,
                    msg.read,
                    msg.edited,
                    msg.deleted,
                    msg.created_at.to_rfc3339(),
                    msg.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<Message>> {
        let row = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{MESSAGE_SELECT} WHERE id = ?1"))?;
            let row = stmt.query_row([id], read_message_row).optional()?;
            Ok(row)
        })?;
        row.map(MessageRow::into_model).transpose()
    }

    /// id, sender, receiver and created_at are immutable; an edit only
    /// touches text, the edited flag and updated_at.
    pub fn apply_edit(&self, id: &str, new_text: &str, updated_at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET text = ?2, edited = 1, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id, new_text, updated_at.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Soft delete: the text is replaced by the tombstone and the deleted
    /// flag set; the row itself stays so history length is stable.
    pub fn apply_delete(&self, id: &str, tombstone: &str, updated_at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET text = ?2, deleted = 1, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id, tombstone, updated_at.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// All messages between the unordered pair {a, b}, ascending by
    /// creation time (id breaks ties for a stable order). Soft-deleted
    /// rows are included with their tombstone text.
    pub fn conversation(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{MESSAGE_SELECT}
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let rows = stmt
                .query_map([a.to_string(), b.to_string()], read_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(MessageRow::into_model).collect()
    }

    /// Unread messages for `receiver`, grouped by sender.
    pub fn unread_counts(&self, receiver: Uuid) -> Result<Vec<(Uuid, u64)>> {
        let raw = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sender_id, COUNT(*) FROM messages
                 WHERE receiver_id = ?1 AND read = 0
                 GROUP BY sender_id",
            )?;
            let rows = stmt
                .query_map([receiver.to_string()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        raw.into_iter()
            .map(|(sender, count)| Ok((sender.parse::<Uuid>()?, count as u64)))
            .collect()
    }

    /// Mark everything `partner` sent to `receiver` as read. `read` only
    /// ever transitions 0 -> 1, so repeated calls are no-ops.
    pub fn mark_read(&self, partner: Uuid, receiver: Uuid) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET read = 1
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND read = 0",
                [partner.to_string(), receiver.to_string()],
            )?;
            Ok(changed)
        })
    }
}

const MESSAGE_SELECT: &str = "SELECT id, sender_id, receiver_id, text, delivered, read, edited, deleted, created_at, updated_at
     FROM messages";

fn read_message_row(row: &rusqlite::Row) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        text: row.get(3)?,
        delivered: row.get(4)?,
        read: row.get(5)?,
        edited: row.get(6)?,
        deleted: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn read_user_row(row: &rusqlite::Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        is_online: row.get(3)?,
        last_seen: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn query_user(conn: &Connection, filter: &str, param: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, username, password, is_online, last_seen, created_at FROM users {filter}"
    ))?;
    let row = stmt.query_row([param], read_user_row).optional()?;
    Ok(row)
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

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&ALICE.to_string(), "alice", "hash-a").unwrap();
        db.create_user(&BOB.to_string(), "bob", "hash-b").unwrap();
        db
    }

    const ALICE: Uuid = Uuid::from_u128(1);
    const BOB: Uuid = Uuid::from_u128(2);

    fn message(sender: Uuid, receiver: Uuid, text: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender,
            receiver,
            text: text.to_string(),
            delivered: true,
            read: false,
            edited: false,
            deleted: false,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn insert_then_get_round_trips_the_row() {
        let db = test_db();
        let msg = message(ALICE, BOB, "hi", Utc::now());
        db.insert_message(&msg).unwrap();

        let loaded = db.get_message(&msg.id.to_string()).unwrap().unwrap();
        assert_eq!(loaded, msg);
        assert!(loaded.delivered);
    }

    #[test]
    fn conversation_is_symmetric_and_ordered() {
        let db = test_db();
        let t0 = Utc::now();
        let m1 = message(ALICE, BOB, "first", t0);
        let m2 = message(BOB, ALICE, "second", t0 + Duration::seconds(1));
        let m3 = message(ALICE, BOB, "third", t0 + Duration::seconds(2));
        // Insert out of order; the query must sort by creation time.
        db.insert_message(&m2).unwrap();
        db.insert_message(&m3).unwrap();
        db.insert_message(&m1).unwrap();

        let ab = db.conversation(ALICE, BOB).unwrap();
        let ba = db.conversation(BOB, ALICE).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(
            ab.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(),
            ["first", "second", "third"]
        );
    }

    #[test]
    fn deleted_rows_stay_in_history() {
        let db = test_db();
        let msg = message(ALICE, BOB, "oops", Utc::now());
        db.insert_message(&msg).unwrap();
        db.apply_delete(&msg.id.to_string(), "This message was deleted", Utc::now())
            .unwrap();

        let history = db.conversation(ALICE, BOB).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].deleted);
        assert_eq!(history[0].text, "This message was deleted");
        // Immutable fields untouched by the soft delete.
        assert_eq!(history[0].sender, ALICE);
        assert_eq!(history[0].created_at, msg.created_at);
    }

    #[test]
    fn unread_counts_group_by_sender() {
        let db = test_db();
        let carol = Uuid::from_u128(3);
        db.create_user(&carol.to_string(), "carol", "hash-c").unwrap();

        let t0 = Utc::now();
        db.insert_message(&message(ALICE, BOB, "a1", t0)).unwrap();
        db.insert_message(&message(ALICE, BOB, "a2", t0)).unwrap();
        db.insert_message(&message(carol, BOB, "c1", t0)).unwrap();
        // Bob's own outgoing message must not count.
        db.insert_message(&message(BOB, ALICE, "b1", t0)).unwrap();

        let mut counts = db.unread_counts(BOB).unwrap();
        counts.sort();
        assert_eq!(counts, vec![(ALICE, 2), (carol, 1)]);
    }

    #[test]
    fn mark_read_is_idempotent_and_one_directional() {
        let db = test_db();
        let t0 = Utc::now();
        db.insert_message(&message(ALICE, BOB, "a1", t0)).unwrap();
        db.insert_message(&message(ALICE, BOB, "a2", t0)).unwrap();

        assert_eq!(db.mark_read(ALICE, BOB).unwrap(), 2);
        assert_eq!(db.mark_read(ALICE, BOB).unwrap(), 0);
        assert!(db.unread_counts(BOB).unwrap().is_empty());
        // The reverse direction is untouched: Alice still has nothing unread.
        assert!(db.unread_counts(ALICE).unwrap().is_empty());
    }

    #[test]
    fn presence_updates_round_trip() {
        let db = test_db();
        db.set_presence(&ALICE.to_string(), true, None).unwrap();
        let row = db.get_user_by_id(&ALICE.to_string()).unwrap().unwrap();
        assert!(row.is_online);
        assert!(row.last_seen.is_none());

        let now = Utc::now();
        db.set_presence(&ALICE.to_string(), false, Some(now)).unwrap();
        let user = db
            .get_user_by_id(&ALICE.to_string())
            .unwrap()
            .unwrap()
            .into_model()
            .unwrap();
        assert!(!user.is_online);
        assert_eq!(user.last_seen.unwrap(), now);
    }

    #[test]
    fn freshly_created_users_convert_to_the_public_model() {
        let db = test_db();

        let row = db.get_user_by_id(&ALICE.to_string()).unwrap().unwrap();
        let user = row.into_model().unwrap();
        assert_eq!(user.username, "alice");
        assert!(!user.is_online);
        assert!(user.last_seen.is_none());

        // The directory listing must include every registered user.
        let listed: Vec<_> = db
            .list_users()
            .unwrap()
            .into_iter()
            .map(|row| row.into_model().unwrap())
            .collect();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|u| u.id == ALICE));
        assert!(listed.iter().any(|u| u.id == BOB));
    }

    #[test]
    fn duplicate_usernames_are_rejected() {
        let db = test_db();
        let err = db.create_user(&Uuid::from_u128(9).to_string(), "alice", "hash");
        assert!(err.is_err());
    }
}
