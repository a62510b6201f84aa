use mongodb::bson::{Binary, Bson, DateTime, Document, doc, spec::BinarySubtype};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::error::{MongoDaoError, MongoResult};
use crate::dao::models::{
    AbilityEntity, ActionEntity, EventEntity, PlayerEntity, RoomEntity, TimerEntity,
};
use crate::state::{
    phase::RoomPhase,
    room::{AbilityType, ActionType, EndReason, GameRole, PlayerState, RoomState, Team},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRoomDocument {
    #[serde(rename = "_id")]
    id: Uuid,
    code: String,
    host_user_id: Uuid,
    state: RoomState,
    phase: RoomPhase,
    day_number: u32,
    phase_started_at: Option<DateTime>,
    phase_ends_at: Option<DateTime>,
    name: String,
    min_players: u8,
    max_players: u8,
    is_private: bool,
    password: Option<String>,
    night_duration: u32,
    day_duration: u32,
    vote_duration: u32,
    winning_team: Option<Team>,
    end_reason: Option<EndReason>,
    created_at: DateTime,
}

impl From<RoomEntity> for MongoRoomDocument {
    fn from(value: RoomEntity) -> Self {
        Self {
            id: value.id,
            code: value.code,
            host_user_id: value.host_user_id,
            state: value.state,
            phase: value.phase,
            day_number: value.day_number,
            phase_started_at: value.phase_started_at.map(DateTime::from_system_time),
            phase_ends_at: value.phase_ends_at.map(DateTime::from_system_time),
            name: value.name,
            min_players: value.min_players,
            max_players: value.max_players,
            is_private: value.is_private,
            password: value.password,
            night_duration: value.night_duration,
            day_duration: value.day_duration,
            vote_duration: value.vote_duration,
            winning_team: value.winning_team,
            end_reason: value.end_reason,
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl From<MongoRoomDocument> for RoomEntity {
    fn from(value: MongoRoomDocument) -> Self {
        Self {
            id: value.id,
            code: value.code,
            host_user_id: value.host_user_id,
            state: value.state,
            phase: value.phase,
            day_number: value.day_number,
            phase_started_at: value.phase_started_at.map(DateTime::to_system_time),
            phase_ends_at: value.phase_ends_at.map(DateTime::to_system_time),
            name: value.name,
            min_players: value.min_players,
            max_players: value.max_players,
            is_private: value.is_private,
            password: value.password,
            night_duration: value.night_duration,
            day_duration: value.day_duration,
            vote_duration: value.vote_duration,
            winning_team: value.winning_team,
            end_reason: value.end_reason,
            created_at: value.created_at.to_system_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPlayerDocument {
    #[serde(rename = "_id")]
    id: Uuid,
    room_id: Uuid,
    user_id: Uuid,
    name: String,
    position: u8,
    role: GameRole,
    state: PlayerState,
    died_at: Option<DateTime>,
    linked_to: Option<Uuid>,
    is_revealed: bool,
}

impl From<PlayerEntity> for MongoPlayerDocument {
    fn from(value: PlayerEntity) -> Self {
        Self {
            id: value.id,
            room_id: value.room_id,
            user_id: value.user_id,
            name: value.name,
            position: value.position,
            role: value.role,
            state: value.state,
            died_at: value.died_at.map(DateTime::from_system_time),
            linked_to: value.linked_to,
            is_revealed: value.is_revealed,
        }
    }
}

impl From<MongoPlayerDocument> for PlayerEntity {
    fn from(value: MongoPlayerDocument) -> Self {
        Self {
            id: value.id,
            room_id: value.room_id,
            user_id: value.user_id,
            name: value.name,
            position: value.position,
            role: value.role,
            state: value.state,
            died_at: value.died_at.map(DateTime::to_system_time),
            linked_to: value.linked_to,
            is_revealed: value.is_revealed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoAbilityDocument {
    room_id: Uuid,
    player_id: Uuid,
    kind: AbilityType,
    uses_left: u8,
    max_uses: u8,
    cooldown_days: u32,
    last_used_day: Option<u32>,
    metadata: Option<Value>,
}

impl From<AbilityEntity> for MongoAbilityDocument {
    fn from(value: AbilityEntity) -> Self {
        Self {
            room_id: value.room_id,
            player_id: value.player_id,
            kind: value.kind,
            uses_left: value.uses_left,
            max_uses: value.max_uses,
            cooldown_days: value.cooldown_days,
            last_used_day: value.last_used_day,
            metadata: value.metadata,
        }
    }
}

impl From<MongoAbilityDocument> for AbilityEntity {
    fn from(value: MongoAbilityDocument) -> Self {
        Self {
            room_id: value.room_id,
            player_id: value.player_id,
            kind: value.kind,
            uses_left: value.uses_left,
            max_uses: value.max_uses,
            cooldown_days: value.cooldown_days,
            last_used_day: value.last_used_day,
            metadata: value.metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoActionDocument {
    room_id: Uuid,
    performer_id: Uuid,
    kind: ActionType,
    day_number: u32,
    phase: RoomPhase,
    target_id: Option<Uuid>,
    metadata: Option<Value>,
    result: Option<Value>,
    created_at: DateTime,
}

impl From<ActionEntity> for MongoActionDocument {
    fn from(value: ActionEntity) -> Self {
        Self {
            room_id: value.room_id,
            performer_id: value.performer_id,
            kind: value.kind,
            day_number: value.day_number,
            phase: value.phase,
            target_id: value.target_id,
            metadata: value.metadata,
            result: value.result,
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl From<MongoActionDocument> for ActionEntity {
    fn from(value: MongoActionDocument) -> Self {
        Self {
            room_id: value.room_id,
            performer_id: value.performer_id,
            kind: value.kind,
            day_number: value.day_number,
            phase: value.phase,
            target_id: value.target_id,
            metadata: value.metadata,
            result: value.result,
            created_at: value.created_at.to_system_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoEventDocument {
    room_id: Uuid,
    event_type: String,
    day_number: u32,
    data: Value,
    created_at: DateTime,
}

impl From<EventEntity> for MongoEventDocument {
    fn from(value: EventEntity) -> Self {
        Self {
            room_id: value.room_id,
            event_type: value.event_type,
            day_number: value.day_number,
            data: value.data,
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoTimerDocument {
    pub room_id: Uuid,
    pub phase: RoomPhase,
    pub deadline: DateTime,
}

impl From<TimerEntity> for MongoTimerDocument {
    fn from(value: TimerEntity) -> Self {
        Self {
            room_id: value.room_id,
            phase: value.phase,
            deadline: DateTime::from_system_time(value.deadline),
        }
    }
}

impl From<MongoTimerDocument> for TimerEntity {
    fn from(value: MongoTimerDocument) -> Self {
        Self {
            room_id: value.room_id,
            phase: value.phase,
            deadline: value.deadline.to_system_time(),
        }
    }
}

pub fn uuid_as_binary(id: Uuid) -> Binary {
    Binary {
        subtype: BinarySubtype::Uuid,
        bytes: id.into_bytes().to_vec(),
    }
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": uuid_as_binary(id)}
}

/// Encode a serde value (enum tags, mostly) into BSON for use in filters.
pub fn encode_bson<T: Serialize>(collection: &'static str, value: &T) -> MongoResult<Bson> {
    mongodb::bson::to_bson(value).map_err(|source| MongoDaoError::Encode { collection, source })
}
