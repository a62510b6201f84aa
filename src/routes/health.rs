use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::SharedState;

/// Liveness/readiness payload.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthStatus {
    pub status: &'static str,
    /// Whether the backend currently runs without a storage connection.
    pub degraded: bool,
    pub active_rooms: usize,
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service health", body = HealthStatus))
)]
pub async fn health_handler(State(state): State<SharedState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        degraded: state.is_degraded().await,
        active_rooms: state.rooms().len(),
    })
}

pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/health", get(health_handler))
}
