use axum::{
    Json, Router,
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    auth,
    dto::game::{CreateRoomRequest, RoomSummary},
    error::{AppError, ServiceError},
    services::room_service,
    state::SharedState,
};

/// Authenticated caller from the `Authorization: Bearer` header.
fn bearer_user(state: &SharedState, headers: &HeaderMap) -> Result<Uuid, AppError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ServiceError::Auth("missing bearer token".into()))?;
    auth::verify_token(token, &state.config().jwt_secret).map_err(Into::into)
}

#[utoipa::path(
    post,
    path = "/rooms",
    request_body = CreateRoomRequest,
    responses(
        (status = 200, description = "Room created", body = RoomSummary),
        (status = 400, description = "Invalid settings"),
        (status = 409, description = "No free room code"),
    )
)]
pub async fn create_room_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<CreateRoomRequest>,
) -> Result<Json<RoomSummary>, AppError> {
    let user_id = bearer_user(&state, &headers)?;
    let summary = room_service::create_room(&state, user_id, request).await?;
    Ok(Json(summary))
}

#[utoipa::path(
    get,
    path = "/rooms",
    responses((status = 200, description = "Open public rooms", body = [RoomSummary]))
)]
pub async fn list_rooms_handler(State(state): State<SharedState>) -> Json<Vec<RoomSummary>> {
    // Snapshot the registry first; holding a shard entry across an await
    // would stall concurrent lookups.
    let handles: Vec<_> = state
        .rooms()
        .iter()
        .map(|entry| entry.value().clone())
        .collect();

    let mut summaries = Vec::new();
    for handle in handles {
        let inner = handle.lock().await;
        if !inner.room.settings.is_private && !inner.room.state.is_terminal() {
            summaries.push(room_service::summarize(
                &inner.room,
                inner.players.len() as u32,
            ));
        }
    }
    summaries.sort_by(|a, b| a.code.cmp(&b.code));
    Json(summaries)
}

#[utoipa::path(
    get,
    path = "/rooms/{code}",
    params(("code" = String, Path, description = "6-character room code")),
    responses(
        (status = 200, description = "Room found", body = RoomSummary),
        (status = 404, description = "No such room"),
    )
)]
pub async fn find_room_handler(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<RoomSummary>, AppError> {
    let code = code.to_uppercase();
    let handle = state
        .room_by_code(&code)
        .ok_or_else(|| ServiceError::NotFound(format!("no room with code `{code}`")))?;
    let inner = handle.lock().await;
    Ok(Json(room_service::summarize(
        &inner.room,
        inner.players.len() as u32,
    )))
}

pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/rooms", post(create_room_handler).get(list_rooms_handler))
        .route("/rooms/{code}", get(find_room_handler))
}
