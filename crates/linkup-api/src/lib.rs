pub mod auth;
pub mod messages;
pub mod middleware;
pub mod presence;

use axum::{
    Router,
    routing::{get, patch, post},
};

use crate::auth::AppState;
use crate::middleware::require_auth;

/// REST routes. The WebSocket gateway is mounted separately by the server.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/messages", post(messages::send_message))
        .route(
            "/messages/{message_id}",
            patch(messages::edit_message).delete(messages::delete_message),
        )
        .route("/conversations", get(messages::list_conversations))
        .route(
            "/conversations/{peer_id}",
            axum::routing::delete(messages::hide_conversation),
        )
        .route("/conversations/{peer_id}/messages", get(messages::get_conversation))
        .route("/conversations/{peer_id}/read", post(messages::mark_read))
        .route("/unread-count", get(messages::unread_count))
        .route("/users/{user_id}/presence", get(presence::get_presence))
        .layer(axum::middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
