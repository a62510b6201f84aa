//! Persistence entities mirrored from the domain model, plus the filter and
//! write-batch types consumed by the store facade.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::state::{
    phase::RoomPhase,
    room::{
        Ability, AbilityType, ActionType, EndReason, GameAction, GameEventRecord, GameRole,
        Player, PlayerState, Room, RoomSettings, RoomState, Team,
    },
};

/// Persisted room row with its settings flattened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomEntity {
    pub id: Uuid,
    pub code: String,
    pub host_user_id: Uuid,
    pub state: RoomState,
    pub phase: RoomPhase,
    pub day_number: u32,
    pub phase_started_at: Option<SystemTime>,
    pub phase_ends_at: Option<SystemTime>,
    pub name: String,
    pub min_players: u8,
    pub max_players: u8,
    pub is_private: bool,
    pub password: Option<String>,
    pub night_duration: u32,
    pub day_duration: u32,
    pub vote_duration: u32,
    pub winning_team: Option<Team>,
    pub end_reason: Option<EndReason>,
    pub created_at: SystemTime,
}

impl From<Room> for RoomEntity {
    fn from(value: Room) -> Self {
        Self {
            id: value.id,
            code: value.code,
            host_user_id: value.host_user_id,
            state: value.state,
            phase: value.phase,
            day_number: value.day_number,
            phase_started_at: value.phase_started_at,
            phase_ends_at: value.phase_ends_at,
            name: value.settings.name,
            min_players: value.settings.min_players,
            max_players: value.settings.max_players,
            is_private: value.settings.is_private,
            password: value.settings.password,
            night_duration: value.settings.night_duration,
            day_duration: value.settings.day_duration,
            vote_duration: value.settings.vote_duration,
            winning_team: value.winning_team,
            end_reason: value.end_reason,
            created_at: value.created_at,
        }
    }
}

impl From<RoomEntity> for Room {
    fn from(value: RoomEntity) -> Self {
        Self {
            id: value.id,
            code: value.code,
            host_user_id: value.host_user_id,
            state: value.state,
            phase: value.phase,
            day_number: value.day_number,
            phase_started_at: value.phase_started_at,
            phase_ends_at: value.phase_ends_at,
            settings: RoomSettings {
                name: value.name,
                min_players: value.min_players,
                max_players: value.max_players,
                is_private: value.is_private,
                password: value.password,
                night_duration: value.night_duration,
                day_duration: value.day_duration,
                vote_duration: value.vote_duration,
            },
            winning_team: value.winning_team,
            end_reason: value.end_reason,
            created_at: value.created_at,
        }
    }
}

/// Persisted player row, scoped to its room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerEntity {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub position: u8,
    pub role: GameRole,
    pub state: PlayerState,
    pub died_at: Option<SystemTime>,
    pub linked_to: Option<Uuid>,
    pub is_revealed: bool,
}

impl PlayerEntity {
    pub fn from_domain(room_id: Uuid, player: &Player) -> Self {
        Self {
            id: player.id,
            room_id,
            user_id: player.user_id,
            name: player.name.clone(),
            position: player.position,
            role: player.role,
            state: player.state,
            died_at: player.died_at,
            linked_to: player.linked_to,
            is_revealed: player.is_revealed,
        }
    }

    pub fn into_domain(self) -> Player {
        Player {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            position: self.position,
            role: self.role,
            state: self.state,
            died_at: self.died_at,
            linked_to: self.linked_to,
            is_revealed: self.is_revealed,
        }
    }
}

/// Persisted ability row, keyed by `(player_id, kind)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbilityEntity {
    pub room_id: Uuid,
    pub player_id: Uuid,
    pub kind: AbilityType,
    pub uses_left: u8,
    pub max_uses: u8,
    pub cooldown_days: u32,
    pub last_used_day: Option<u32>,
    pub metadata: Option<Value>,
}

impl AbilityEntity {
    pub fn from_domain(room_id: Uuid, ability: &Ability) -> Self {
        Self {
            room_id,
            player_id: ability.player_id,
            kind: ability.kind,
            uses_left: ability.uses_left,
            max_uses: ability.max_uses,
            cooldown_days: ability.cooldown_days,
            last_used_day: ability.last_used_day,
            metadata: ability.metadata.clone(),
        }
    }

    pub fn into_domain(self) -> Ability {
        Ability {
            player_id: self.player_id,
            kind: self.kind,
            uses_left: self.uses_left,
            max_uses: self.max_uses,
            cooldown_days: self.cooldown_days,
            last_used_day: self.last_used_day,
            metadata: self.metadata,
        }
    }
}

/// Persisted action row. Same shape as the domain action.
pub type ActionEntity = GameAction;

/// Persisted audit record. Same shape as the domain record.
pub type EventEntity = GameEventRecord;

/// Durable phase-expiry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerEntity {
    pub room_id: Uuid,
    pub phase: RoomPhase,
    pub deadline: SystemTime,
}

/// Accumulated per-user statistics delta applied at game end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStatsDelta {
    pub user_id: Uuid,
    pub games_played: u32,
    pub wins: u32,
}

/// Filter over persisted actions.
#[derive(Debug, Clone, Default)]
pub struct ActionFilter {
    pub room_id: Option<Uuid>,
    pub performer_id: Option<Uuid>,
    pub kind: Option<ActionType>,
    pub day_number: Option<u32>,
    pub phase: Option<RoomPhase>,
}

impl ActionFilter {
    pub fn for_room(room_id: Uuid) -> Self {
        Self {
            room_id: Some(room_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, action: &ActionEntity) -> bool {
        self.room_id.is_none_or(|id| action.room_id == id)
            && self.performer_id.is_none_or(|id| action.performer_id == id)
            && self.kind.is_none_or(|kind| action.kind == kind)
            && self.day_number.is_none_or(|day| action.day_number == day)
            && self.phase.is_none_or(|phase| action.phase == phase)
    }
}

/// Atomic per-room write batch: the unit in which a phase transition commits.
/// Either every write in the batch lands or none does.
#[derive(Debug, Clone, Default)]
pub struct RoomWriteBatch {
    pub room_id: Uuid,
    pub room: Option<RoomEntity>,
    pub players: Vec<PlayerEntity>,
    pub abilities: Vec<AbilityEntity>,
    pub actions: Vec<ActionEntity>,
    pub purge_actions: Option<ActionFilter>,
    pub events: Vec<EventEntity>,
    pub timers: Vec<TimerEntity>,
    pub clear_timers: bool,
    pub stats: Vec<UserStatsDelta>,
}

impl RoomWriteBatch {
    pub fn new(room_id: Uuid) -> Self {
        Self {
            room_id,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.room.is_none()
            && self.players.is_empty()
            && self.abilities.is_empty()
            && self.actions.is_empty()
            && self.purge_actions.is_none()
            && self.events.is_empty()
            && self.timers.is_empty()
            && !self.clear_timers
            && self.stats.is_empty()
    }
}
