//! Serialization and publication helpers for outbound events, plus the
//! append-only audit trail. Publishing is fire-and-forget.

use std::time::SystemTime;

use bytes::Bytes;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dto::ws::ServerMessage,
    services::event_bus::{PubSub, player_topic, room_topic},
    state::{RoomInner, SharedState},
};

/// Publish an event to everyone in the room.
pub fn publish_room(state: &SharedState, room_id: Uuid, message: &ServerMessage) {
    publish(state, &room_topic(room_id), message);
}

/// Publish an event to a single player of the room.
pub fn publish_player(state: &SharedState, room_id: Uuid, player_id: Uuid, message: &ServerMessage) {
    publish(state, &player_topic(room_id, player_id), message);
}

fn publish(state: &SharedState, topic: &str, message: &ServerMessage) {
    match serde_json::to_vec(message) {
        Ok(payload) => state.bus().publish(topic, Bytes::from(payload)),
        Err(err) => warn!(topic, error = %err, "failed to serialize outbound event"),
    }
}

/// Append an audit record to the room's in-memory event log slice of the next
/// write batch. The caller owns persistence.
pub fn audit_record(
    inner: &RoomInner,
    event_type: &str,
    data: Value,
) -> crate::dao::models::EventEntity {
    crate::dao::models::EventEntity {
        room_id: inner.room.id,
        event_type: event_type.to_owned(),
        day_number: inner.room.day_number,
        data,
        created_at: SystemTime::now(),
    }
}
