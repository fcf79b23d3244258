use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;

use linkup_types::api::PresenceResponse;

use crate::auth::AppState;

/// Live status comes from the registry; `last_seen` from the store.
pub async fn get_presence(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let uid = user_id.clone();
    let user = tokio::task::spawn_blocking(move || db.get_user_by_id(&uid))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?
        .into_user()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(PresenceResponse {
        is_online: state.dispatcher.is_online(&user_id).await,
        user_id: user.id,
        last_seen: user.last_seen,
    }))
}
