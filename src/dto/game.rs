use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::dto::validation::{validate_player_bounds, validate_room_name};
use crate::state::phase::RoomPhase;
use crate::state::room::{GameRole, PlayerState, RoomSettings, RoomState};

fn default_min_players() -> u8 {
    5
}

fn default_max_players() -> u8 {
    15
}

fn default_night_duration() -> u32 {
    90
}

fn default_day_duration() -> u32 {
    180
}

fn default_vote_duration() -> u32 {
    60
}

/// Payload used to open a new room.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[validate(schema(function = validate_player_bounds))]
pub struct CreateRoomRequest {
    #[validate(custom(function = validate_room_name))]
    pub name: String,
    #[serde(default = "default_min_players")]
    #[validate(range(min = 5, max = 15))]
    pub min_players: u8,
    #[serde(default = "default_max_players")]
    #[validate(range(min = 5, max = 15))]
    pub max_players: u8,
    #[serde(default)]
    pub is_private: bool,
    pub password: Option<String>,
    /// Seconds.
    #[serde(default = "default_night_duration")]
    #[validate(range(min = 30, max = 180))]
    pub night_duration: u32,
    #[serde(default = "default_day_duration")]
    #[validate(range(min = 60, max = 300))]
    pub day_duration: u32,
    #[serde(default = "default_vote_duration")]
    #[validate(range(min = 30, max = 120))]
    pub vote_duration: u32,
}

impl From<CreateRoomRequest> for RoomSettings {
    fn from(value: CreateRoomRequest) -> Self {
        Self {
            name: value.name.trim().to_owned(),
            min_players: value.min_players,
            max_players: value.max_players,
            is_private: value.is_private,
            password: value.password,
            night_duration: value.night_duration,
            day_duration: value.day_duration,
            vote_duration: value.vote_duration,
        }
    }
}

/// Public listing entry for a room.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoomSummary {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub state: RoomState,
    pub phase: RoomPhase,
    pub player_count: u32,
    pub min_players: u8,
    pub max_players: u8,
    pub is_private: bool,
}

/// Player entry inside a snapshot. `role` is present only when the requester
/// is allowed to see it (their own role, or a publicly revealed one).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlayerView {
    pub id: Uuid,
    pub name: String,
    pub position: u8,
    pub state: PlayerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<GameRole>,
    pub is_revealed: bool,
    pub is_host: bool,
}

/// Full room snapshot tailored to one requester. The authoritative catch-up
/// mechanism: clients never reconstruct state from the event stream.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GameSnapshot {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub state: RoomState,
    pub phase: RoomPhase,
    pub day_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_ends_at: Option<u64>,
    pub players: Vec<PlayerView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub my_role: Option<GameRole>,
    pub alive_count: u32,
    pub dead_players: Vec<Uuid>,
    pub min_players: u8,
    pub max_players: u8,
    pub can_start: bool,
    pub is_host: bool,
}
