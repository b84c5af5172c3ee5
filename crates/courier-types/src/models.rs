use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public view of a user. The credential hash never leaves courier-db.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub is_online: bool,
    /// None while the user is online.
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A direct message. This is the durable row and the realtime payload —
/// exactly one row exists per logical send, and every gateway event carries
/// the persisted state, never a transport-local copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender: Uuid,
    pub receiver: Uuid,
    pub text: String,
    /// Accepted by the server, not necessarily seen by the receiver.
    pub delivered: bool,
    pub read: bool,
    pub edited: bool,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Conversations are unordered pairs: a message belongs to the
    /// conversation between `a` and `b` regardless of direction.
    pub fn in_conversation(&self, a: Uuid, b: Uuid) -> bool {
        (self.sender == a && self.receiver == b) || (self.sender == b && self.receiver == a)
    }
}
