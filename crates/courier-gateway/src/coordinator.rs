use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use courier_db::Database;
use courier_types::DELETED_TOMBSTONE;
use courier_types::error::DeliveryError;
use courier_types::events::ServerEvent;
use courier_types::models::Message;

use crate::registry::PresenceRegistry;

/// The single authoritative implementation of send/edit/delete, invoked by
/// both the WebSocket command handler and the REST fallback handlers.
///
/// Persistence always happens first and is authoritative; push is
/// best-effort and a skipped fan-out (receiver offline) is still a
/// successful operation.
#[derive(Clone)]
pub struct Coordinator {
    db: Arc<Database>,
    registry: PresenceRegistry,
}

impl Coordinator {
    pub fn new(db: Arc<Database>, registry: PresenceRegistry) -> Self {
        Self { db, registry }
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Accept a send intent: persist exactly one row with `delivered` set
    /// (accepted by the server, not seen by the receiver), then push
    /// `message:new` to the receiver and `message:sent` back to the sender
    /// where those connections are bound. Returns the persisted row so the
    /// request/response path can hand it back synchronously.
    pub async fn send(
        &self,
        sender: Uuid,
        receiver: Uuid,
        text: String,
    ) -> Result<Message, DeliveryError> {
        if text.trim().is_empty() {
            return Err(DeliveryError::Validation("text must not be empty".into()));
        }

        let receiver_id = receiver.to_string();
        if !self
            .with_db(move |db| db.user_exists(&receiver_id))
            .await?
        {
            return Err(DeliveryError::NotFound("receiver"));
        }

        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            sender,
            receiver,
            text,
            delivered: true,
            read: false,
            edited: false,
            deleted: false,
            created_at: now,
            updated_at: now,
        };

        let row = message.clone();
        self.with_db(move |db| db.insert_message(&row)).await?;

        if !self
            .registry
            .send_to_user(receiver, ServerEvent::MessageNew(message.clone()))
            .await
        {
            debug!(%receiver, "receiver offline, message:new skipped");
        }
        self.registry
            .send_to_user(sender, ServerEvent::MessageSent(message.clone()))
            .await;

        Ok(message)
    }

    /// Edit a message's text. Only the original sender may edit, and a
    /// deleted message is frozen forever. Fan-out goes to both parties.
    pub async fn edit(
        &self,
        message_id: Uuid,
        new_text: String,
        editor: Uuid,
    ) -> Result<Message, DeliveryError> {
        if new_text.trim().is_empty() {
            return Err(DeliveryError::Validation("text must not be empty".into()));
        }

        let mut message = self.load(message_id).await?;
        if message.sender != editor || message.deleted {
            return Err(DeliveryError::Forbidden);
        }

        message.text = new_text;
        message.edited = true;
        message.updated_at = Utc::now();

        let (id, text, updated_at) =
            (message.id.to_string(), message.text.clone(), message.updated_at);
        self.with_db(move |db| db.apply_edit(&id, &text, updated_at))
            .await?;

        self.push_to_both_parties(&message, ServerEvent::MessageEdited)
            .await;
        Ok(message)
    }

    /// Soft-delete a message: the text becomes the fixed tombstone and the
    /// row stays in history. Only the original sender may delete.
    pub async fn delete(
        &self,
        message_id: Uuid,
        requester: Uuid,
    ) -> Result<Message, DeliveryError> {
        let mut message = self.load(message_id).await?;
        if message.sender != requester || message.deleted {
            return Err(DeliveryError::Forbidden);
        }

        message.text = DELETED_TOMBSTONE.to_string();
        message.deleted = true;
        message.updated_at = Utc::now();

        let (id, updated_at) = (message.id.to_string(), message.updated_at);
        self.with_db(move |db| db.apply_delete(&id, DELETED_TOMBSTONE, updated_at))
            .await?;

        self.push_to_both_parties(&message, ServerEvent::MessageDeleted)
            .await;
        Ok(message)
    }

    /// Stateless typing relay: forwarded to the receiver's connection if
    /// bound, silently dropped otherwise. Nothing is persisted.
    pub async fn typing(&self, sender: Uuid, receiver: Uuid, started: bool) {
        let event = if started {
            ServerEvent::TypingStart { sender }
        } else {
            ServerEvent::TypingStop { sender }
        };
        self.registry.send_to_user(receiver, event).await;
    }

    async fn load(&self, message_id: Uuid) -> Result<Message, DeliveryError> {
        let id = message_id.to_string();
        self.with_db(move |db| db.get_message(&id))
            .await?
            .ok_or(DeliveryError::NotFound("message"))
    }

    async fn push_to_both_parties<F>(&self, message: &Message, event: F)
    where
        F: Fn(Message) -> ServerEvent,
    {
        self.registry
            .send_to_user(message.sender, event(message.clone()))
            .await;
        self.registry
            .send_to_user(message.receiver, event(message.clone()))
            .await;
    }

    /// Run a blocking store operation off the async runtime so connection
    /// tasks never stall behind another user's write.
    async fn with_db<T, F>(&self, f: F) -> Result<T, DeliveryError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(DeliveryError::persistence)?
            .map_err(DeliveryError::persistence)
    }
}
