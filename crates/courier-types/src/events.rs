use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events sent FROM client TO server over the WebSocket gateway.
///
/// Wire names and payload fields follow the original `event:verb` protocol
/// so existing clients keep working unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientEvent {
    /// Declare identity and go online; binds the connection to the user.
    #[serde(rename = "user:online", rename_all = "camelCase")]
    UserOnline { user_id: Uuid },

    #[serde(rename = "message:send", rename_all = "camelCase")]
    MessageSend {
        sender: Uuid,
        receiver: Uuid,
        text: String,
    },

    #[serde(rename = "message:edit", rename_all = "camelCase")]
    MessageEdit {
        message_id: Uuid,
        new_text: String,
        editor: Uuid,
    },

    #[serde(rename = "message:delete", rename_all = "camelCase")]
    MessageDelete { message_id: Uuid, requester: Uuid },

    #[serde(rename = "typing:start", rename_all = "camelCase")]
    TypingStart { sender: Uuid, receiver: Uuid },

    #[serde(rename = "typing:stop", rename_all = "camelCase")]
    TypingStop { sender: Uuid, receiver: Uuid },
}

/// Events sent FROM server TO clients over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// Presence transition, broadcast to every connection.
    /// `last_seen` is present only for offline transitions.
    #[serde(rename = "user:status", rename_all = "camelCase")]
    UserStatus {
        user_id: Uuid,
        is_online: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_seen: Option<DateTime<Utc>>,
    },

    /// New message, pushed to the receiver only.
    #[serde(rename = "message:new")]
    MessageNew(Message),

    /// Acknowledgment carrying the persisted row, pushed to the sender only.
    #[serde(rename = "message:sent")]
    MessageSent(Message),

    /// Pushed to both parties after an edit.
    #[serde(rename = "message:edited")]
    MessageEdited(Message),

    /// Pushed to both parties after a soft delete; text is the tombstone.
    #[serde(rename = "message:deleted")]
    MessageDeleted(Message),

    #[serde(rename = "typing:start", rename_all = "camelCase")]
    TypingStart { sender: Uuid },

    #[serde(rename = "typing:stop", rename_all = "camelCase")]
    TypingStop { sender: Uuid },

    /// Error signal, delivered only to the initiating connection.
    #[serde(rename = "error")]
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_use_original_wire_names() {
        let raw = r#"{"type":"message:send","data":{"sender":"6a7b0f2e-0000-0000-0000-000000000001","receiver":"6a7b0f2e-0000-0000-0000-000000000002","text":"hi"}}"#;
        let evt: ClientEvent = serde_json::from_str(raw).unwrap();
        match evt {
            ClientEvent::MessageSend { text, .. } => assert_eq!(text, "hi"),
            other => panic!("unexpected event: {other:?}"),
        }

        let raw = r#"{"type":"message:edit","data":{"messageId":"6a7b0f2e-0000-0000-0000-000000000003","newText":"fixed","editor":"6a7b0f2e-0000-0000-0000-000000000001"}}"#;
        let evt: ClientEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(evt, ClientEvent::MessageEdit { .. }));
    }

    #[test]
    fn user_status_omits_last_seen_while_online() {
        let evt = ServerEvent::UserStatus {
            user_id: Uuid::nil(),
            is_online: true,
            last_seen: None,
        };
        let json = serde_json::to_string(&evt).unwrap();
        assert!(json.contains(r#""type":"user:status""#));
        assert!(json.contains(r#""isOnline":true"#));
        assert!(!json.contains("lastSeen"));
    }
}
