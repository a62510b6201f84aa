use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;

use crate::{auth, error::AppError, services::websocket_service, state::SharedState};

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    token: String,
}

#[utoipa::path(
    get,
    path = "/ws",
    params(("token" = String, Query, description = "Bearer token authenticating the connection")),
    responses(
        (status = 101, description = "Switching protocols to WebSocket"),
        (status = 401, description = "Invalid or missing token"),
    )
)]
/// Authenticate the caller, then upgrade the connection into a game session.
pub async fn ws_handler(
    State(state): State<SharedState>,
    Query(query): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let user_id = auth::verify_token(&query.token, &state.config().jwt_secret)?;

    let shared_state = state.clone();
    Ok(ws.on_upgrade(move |socket| {
        websocket_service::handle_socket(shared_state.clone(), socket, user_id)
    }))
}

/// Configure the WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/ws", get(ws_handler))
}
