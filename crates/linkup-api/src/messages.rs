use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::error;

use linkup_gateway::DeliveryError;
use linkup_types::api::{EditMessageRequest, SendMessageRequest, UnreadCount, UpdatedCount};
use linkup_types::events::ServerEvent;

use crate::auth::AppState;
use crate::middleware::Claims;

const MAX_BODY_LEN: usize = 4000;

fn delivery_status(err: DeliveryError) -> StatusCode {
    match err {
        DeliveryError::NotFound => StatusCode::NOT_FOUND,
        DeliveryError::Unauthorized => StatusCode::FORBIDDEN,
        DeliveryError::Storage(e) => {
            error!("storage error: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn validate_body(body: &str) -> Result<(), StatusCode> {
    if body.trim().is_empty() || body.len() > MAX_BODY_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(())
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    validate_body(&req.body)?;
    if req.receiver_id == claims.sub {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let receiver_id = req.receiver_id.clone();
    let exists = tokio::task::spawn_blocking(move || db.user_exists(&receiver_id))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if !exists {
        return Err(StatusCode::NOT_FOUND);
    }

    let message = state
        .dispatcher
        .send_message(&claims.sub, &req.receiver_id, &req.body)
        .await
        .map_err(delivery_status)?;

    let payload = serde_json::to_value(&message).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    state
        .dispatcher
        .notify(
            &message.receiver_id,
            ServerEvent::NewMessage {
                sender_id: message.sender_id.clone(),
                message: payload,
            },
        )
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn edit_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<EditMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    validate_body(&req.body)?;

    let message = state
        .dispatcher
        .get_message(&message_id)
        .await
        .map_err(delivery_status)?;

    let age = Utc::now().signed_duration_since(message.created_at);
    if age.to_std().unwrap_or_default() > state.edit_window {
        return Err(StatusCode::FORBIDDEN);
    }

    let updated = state
        .dispatcher
        .edit_message(&claims.sub, &message_id, &req.body)
        .await
        .map_err(delivery_status)?;

    Ok(Json(updated))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let deleted = state
        .dispatcher
        .soft_delete_message(&claims.sub, &message_id)
        .await
        .map_err(delivery_status)?;

    Ok(Json(deleted))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let conversations = state
        .dispatcher
        .list_conversations(&claims.sub)
        .await
        .map_err(delivery_status)?;

    Ok(Json(conversations))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(peer_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let messages = state
        .dispatcher
        .list_conversation(&claims.sub, &peer_id)
        .await
        .map_err(delivery_status)?;

    Ok(Json(messages))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(peer_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let updated = state
        .dispatcher
        .mark_read(&claims.sub, &peer_id)
        .await
        .map_err(delivery_status)?;

    Ok(Json(UpdatedCount { updated }))
}

/// Clear history on the caller's side only.
pub async fn hide_conversation(
    State(state): State<AppState>,
    Path(peer_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let updated = state
        .dispatcher
        .hide_for_user(&claims.sub, &peer_id)
        .await
        .map_err(delivery_status)?;

    Ok(Json(UpdatedCount { updated }))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let count = state
        .dispatcher
        .unread_count(&claims.sub)
        .await
        .map_err(delivery_status)?;

    Ok(Json(UnreadCount { count }))
}
