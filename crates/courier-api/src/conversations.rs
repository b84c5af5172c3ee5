//! On-demand reconstruction of conversation state for clients that were
//! offline or are opening a thread: full history, unread counters and the
//! read-state transition. This is the pull side of the dual delivery
//! design — whatever the push channel dropped is recovered here.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use courier_types::api::UnreadCount;
use courier_types::models::Message;

use crate::AppState;
use crate::middleware::Claims;

/// Full history between the caller and a partner, ascending by creation
/// time. Symmetric: either party sees the identical sequence, including
/// soft-deleted messages with their tombstone text.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(partner_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    let db = state.db.clone();
    let viewer = claims.sub;
    let messages = tokio::task::spawn_blocking(move || db.conversation(viewer, partner_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(messages))
}

/// Unread-message counts for the caller, grouped by sender.
pub async fn unread_counts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<UnreadCount>>, StatusCode> {
    let db = state.db.clone();
    let viewer = claims.sub;
    let counts = tokio::task::spawn_blocking(move || db.unread_counts(viewer))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(
        counts
            .into_iter()
            .map(|(sender, count)| UnreadCount { sender, count })
            .collect(),
    ))
}

/// Mark everything the partner sent to the caller as read. One-directional
/// and idempotent: `read` never transitions back, repeat calls are no-ops.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(partner_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let viewer = claims.sub;
    tokio::task::spawn_blocking(move || db.mark_read(partner_id, viewer))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(StatusCode::NO_CONTENT)
}
