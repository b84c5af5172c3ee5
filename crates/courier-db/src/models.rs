//! Database row types — these map directly to SQLite rows.
//! Distinct from the courier-types API models to keep the DB layer
//! independent; conversion to the public models parses the TEXT-encoded
//! ids and timestamps.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use courier_types::models::{Message, User};
use uuid::Uuid;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub is_online: bool,
    pub last_seen: Option<String>,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: String,
    pub delivered: bool,
    pub read: bool,
    pub edited: bool,
    pub deleted: bool,
    pub created_at: String,
    pub updated_at: String,
}

fn parse_uuid(field: &str, raw: &str) -> Result<Uuid> {
    raw.parse::<Uuid>()
        .with_context(|| format!("corrupt {field} '{raw}'"))
}

fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("corrupt {field} '{raw}'"))
}

impl UserRow {
    /// Public view; drops the credential hash.
    pub fn into_model(self) -> Result<User> {
        Ok(User {
            id: parse_uuid("user id", &self.id)?,
            username: self.username,
            is_online: self.is_online,
            last_seen: self
                .last_seen
                .as_deref()
                .map(|ts| parse_timestamp("last_seen", ts))
                .transpose()?,
            created_at: parse_timestamp("created_at", &self.created_at)?,
        })
    }
}

impl MessageRow {
    pub fn into_model(self) -> Result<Message> {
        Ok(Message {
            id: parse_uuid("message id", &self.id)?,
            sender: parse_uuid("sender_id", &self.sender_id)?,
            receiver: parse_uuid("receiver_id", &self.receiver_id)?,
            text: self.text,
            delivered: self.delivered,
            read: self.read,
            edited: self.edited,
            deleted: self.deleted,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}
