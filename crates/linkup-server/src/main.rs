mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use linkup_api::auth::{AppState, AppStateInner};
use linkup_api::middleware::decode_claims;
use linkup_gateway::connection::{self, Identity};
use linkup_gateway::dispatcher::Dispatcher;

use crate::config::ServerConfig;

#[derive(Clone)]
struct ServerState {
    dispatcher: Dispatcher,
    jwt_secret: String,
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "linkup=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Init database
    let db = Arc::new(linkup_db::Database::open(&config.db_path)?);

    // Shared state
    let dispatcher = Dispatcher::new(db.clone(), config.room_grace);
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        dispatcher: dispatcher.clone(),
        edit_window: config.edit_window,
    });

    let state = ServerState {
        dispatcher,
        jwt_secret: config.jwt_secret.clone(),
    };

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(linkup_api::router(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Linkup server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Upgrade to the gateway. A token is optional: without one the connection
/// is anonymous, but a token that is present must be valid.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let identity = match query.token.as_deref() {
        Some(token) => {
            let claims = decode_claims(&state.jwt_secret, token).ok_or_else(|| {
                warn!("Rejected gateway upgrade with invalid token");
                StatusCode::UNAUTHORIZED
            })?;
            Some(Identity {
                user_id: claims.sub,
                username: claims.username,
            })
        }
        None => None,
    };

    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, identity)
    }))
}
