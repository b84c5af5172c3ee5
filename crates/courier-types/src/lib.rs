pub mod api;
pub mod error;
pub mod events;
pub mod models;

/// Text substituted for the body of a soft-deleted message. Once a message
/// carries this tombstone its text never changes again.
pub const DELETED_TOMBSTONE: &str = "This message was deleted";
