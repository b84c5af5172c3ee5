use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_db::Database;
use courier_types::events::{ClientEvent, ServerEvent};

use crate::coordinator::Coordinator;
use crate::registry::ConnId;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long an unauthenticated connection may sit before we hang up.
const BIND_TIMEOUT: Duration = Duration::from_secs(10);

/// Drive one WebSocket connection through its lifecycle:
/// Unauthenticated (awaiting `user:online`) -> Bound -> Closed.
///
/// The `user:online` signal carries a claimed user id and is trusted as-is,
/// matching the original protocol; every later `message:*` event is checked
/// against the bound identity, so a connection can only act as the user it
/// declared at bind time.
pub async fn handle_connection(socket: WebSocket, coordinator: Coordinator) {
    let (mut sender, mut receiver) = socket.split();

    let user_id = match wait_for_online(&mut receiver, coordinator.db()).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to declare identity, closing");
            return;
        }
    };

    info!(%user_id, "connected to gateway");

    // Bind before the presence write so a racing close sees the new handle.
    let (conn_id, mut user_rx) = coordinator.registry().bind(user_id).await;

    // Replay who is already online so the new client starts consistent.
    for uid in coordinator.registry().online_users().await {
        let event = ServerEvent::UserStatus {
            user_id: uid,
            is_online: true,
            last_seen: None,
        };
        if send_event(&mut sender, &event).await.is_err() {
            finish(&coordinator, user_id, conn_id).await;
            return;
        }
    }

    if let Err(e) = persist_presence(coordinator.db(), user_id, None).await {
        warn!(%user_id, "failed to persist online presence: {e:#}");
    }
    coordinator.registry().broadcast(ServerEvent::UserStatus {
        user_id,
        is_online: true,
        last_seen: None,
    });

    let mut broadcast_rx = coordinator.registry().subscribe();
    let coordinator_recv = coordinator.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read client events.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                WsMessage::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => handle_event(&coordinator_recv, user_id, event).await,
                    Err(e) => {
                        warn!(
                            %user_id,
                            "bad event: {} -- raw: {}",
                            e,
                            truncate_for_log(&text)
                        );
                    }
                },
                WsMessage::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    // Whichever half finishes first tears down the other.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    finish(&coordinator, user_id, conn_id).await;
    info!(%user_id, "disconnected from gateway");
}

/// Closed-state handling: guarded unbind, then the offline presence write
/// and broadcast — but only if this connection was still the bound one.
/// A stale close after a reconnect must not flip the user offline.
async fn finish(coordinator: &Coordinator, user_id: Uuid, conn_id: ConnId) {
    if !coordinator.registry().unbind(user_id, conn_id).await {
        debug!(%user_id, "stale close, newer connection owns the user");
        return;
    }

    let last_seen = Utc::now();
    if let Err(e) = persist_presence(coordinator.db(), user_id, Some(last_seen)).await {
        warn!(%user_id, "failed to persist offline presence: {e:#}");
    }
    coordinator.registry().broadcast(ServerEvent::UserStatus {
        user_id,
        is_online: false,
        last_seen: Some(last_seen),
    });
}

async fn handle_event(coordinator: &Coordinator, user_id: Uuid, event: ClientEvent) {
    let result = match event {
        // Already bound; a second declaration is ignored.
        ClientEvent::UserOnline { .. } => Ok(()),

        ClientEvent::MessageSend {
            sender,
            receiver,
            text,
        } => {
            if sender != user_id {
                reject_impersonation(coordinator, user_id, sender).await;
                return;
            }
            coordinator.send(sender, receiver, text).await.map(drop)
        }

        ClientEvent::MessageEdit {
            message_id,
            new_text,
            editor,
        } => {
            if editor != user_id {
                reject_impersonation(coordinator, user_id, editor).await;
                return;
            }
            coordinator.edit(message_id, new_text, editor).await.map(drop)
        }

        ClientEvent::MessageDelete {
            message_id,
            requester,
        } => {
            if requester != user_id {
                reject_impersonation(coordinator, user_id, requester).await;
                return;
            }
            coordinator.delete(message_id, requester).await.map(drop)
        }

        ClientEvent::TypingStart { sender, receiver } => {
            if sender == user_id {
                coordinator.typing(sender, receiver, true).await;
            }
            Ok(())
        }
        ClientEvent::TypingStop { sender, receiver } => {
            if sender == user_id {
                coordinator.typing(sender, receiver, false).await;
            }
            Ok(())
        }
    };

    // Only the initiating connection hears about failures; the other party
    // never sees a push for a rejected operation.
    if let Err(e) = result {
        debug!(%user_id, "operation rejected: {e}");
        coordinator
            .registry()
            .send_to_user(user_id, ServerEvent::Error {
                message: e.to_string(),
            })
            .await;
    }
}

async fn reject_impersonation(coordinator: &Coordinator, bound: Uuid, claimed: Uuid) {
    warn!(%bound, %claimed, "event claims an identity other than the bound user");
    coordinator
        .registry()
        .send_to_user(bound, ServerEvent::Error {
            message: "forbidden".into(),
        })
        .await;
}

/// Unauthenticated state: wait for the declarative `user:online` signal.
/// The claimed id must at least reference a registered user.
async fn wait_for_online(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    db: &Arc<Database>,
) -> Option<Uuid> {
    let timeout = tokio::time::timeout(BIND_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let WsMessage::Text(text) = msg {
                if let Ok(ClientEvent::UserOnline { user_id }) =
                    serde_json::from_str::<ClientEvent>(&text)
                {
                    return Some(user_id);
                }
            }
        }
        None
    });

    let user_id = timeout.await.ok().flatten()?;

    let db = db.clone();
    let id = user_id.to_string();
    let exists = tokio::task::spawn_blocking(move || db.user_exists(&id))
        .await
        .ok()?
        .ok()?;
    if !exists {
        warn!(%user_id, "bind rejected, unknown user");
        return None;
    }
    Some(user_id)
}

/// Cap logged client payloads, backing off to a char boundary so a
/// multi-byte character straddling the cut cannot panic the recv task.
fn truncate_for_log(text: &str) -> &str {
    let mut end = text.len().min(200);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, WsMessage>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).map_err(axum::Error::new)?;
    sender.send(WsMessage::Text(text.into())).await
}

/// `last_seen` is None for the online transition, the disconnect instant
/// for the offline one — the same value the status broadcast carries.
async fn persist_presence(
    db: &Arc<Database>,
    user_id: Uuid,
    last_seen: Option<chrono::DateTime<Utc>>,
) -> anyhow::Result<()> {
    let db = db.clone();
    let id = user_id.to_string();
    tokio::task::spawn_blocking(move || db.set_presence(&id, last_seen.is_none(), last_seen)).await?
}

#[cfg(test)]
mod tests {
    use super::truncate_for_log;

    #[test]
    fn log_truncation_respects_char_boundaries() {
        // 100 euro signs = 300 bytes; byte 200 lands mid-character.
        let multibyte = "\u{20ac}".repeat(100);
        let truncated = truncate_for_log(&multibyte);
        assert!(truncated.len() <= 200);
        assert!(truncated.chars().all(|c| c == '\u{20ac}'));

        let short = "hello";
        assert_eq!(truncate_for_log(short), "hello");

        let long_ascii = "x".repeat(500);
        assert_eq!(truncate_for_log(&long_ascii).len(), 200);
    }
}
