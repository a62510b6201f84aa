use axum::{Json, Router, routing::get};
use utoipa::OpenApi;

use crate::state::SharedState;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::health_handler,
        crate::routes::rooms::create_room_handler,
        crate::routes::rooms::list_rooms_handler,
        crate::routes::rooms::find_room_handler,
        crate::routes::websocket::ws_handler,
    ),
    components(schemas(
        crate::routes::health::HealthStatus,
        crate::dto::game::CreateRoomRequest,
        crate::dto::game::RoomSummary,
        crate::dto::game::GameSnapshot,
        crate::dto::game::PlayerView,
        crate::dto::ws::ClientMessage,
        crate::dto::ws::ServerMessage,
        crate::dto::ws::VoteCount,
        crate::dto::ws::RoleReveal,
        crate::dto::ws::PotionKind,
    )),
    info(
        title = "werewolf-back",
        description = "Real-time multiplayer werewolf game server"
    )
)]
struct ApiDoc;

/// Serve the generated OpenAPI document.
pub async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/docs/openapi.json", get(openapi_handler))
}
