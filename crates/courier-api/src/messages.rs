//! Request/response fallback for send/edit/delete. Clients without a live
//! push channel hit these routes and get the persisted row back
//! synchronously; the handlers delegate to the same delivery coordinator
//! the WebSocket path uses, so both transports share one persistence path.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use courier_types::api::{EditMessageRequest, ErrorBody, SendMessageRequest};
use courier_types::error::DeliveryError;

use crate::AppState;
use crate::middleware::Claims;

/// Sender identity comes from the verified bearer token, never the body.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let message = state
        .coordinator
        .send(claims.sub, req.receiver, req.text)
        .await
        .map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn edit_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<EditMessageRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let message = state
        .coordinator
        .edit(message_id, req.new_text, claims.sub)
        .await
        .map_err(error_response)?;

    Ok(Json(message))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let message = state
        .coordinator
        .delete(message_id, claims.sub)
        .await
        .map_err(error_response)?;

    Ok(Json(message))
}

fn error_response(err: DeliveryError) -> (StatusCode, Json<ErrorBody>) {
    let status = match &err {
        DeliveryError::Validation(_) => StatusCode::BAD_REQUEST,
        DeliveryError::Forbidden => StatusCode::FORBIDDEN,
        DeliveryError::NotFound(_) => StatusCode::NOT_FOUND,
        DeliveryError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_errors_map_to_expected_status_codes() {
        let (status, _) = error_response(DeliveryError::Validation("empty".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = error_response(DeliveryError::Forbidden);
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = error_response(DeliveryError::NotFound("message"));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error, "message not found");
        let (status, _) = error_response(DeliveryError::Persistence("disk".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
