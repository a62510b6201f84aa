//! Per-requester room snapshots: the catch-up mechanism for fresh joins and
//! reconnects.

use uuid::Uuid;

use crate::{
    dto::{
        epoch_millis,
        game::{GameSnapshot, PlayerView},
    },
    state::RoomInner,
    state::room::{PlayerState, RoomState},
};

/// Build the full snapshot as seen by `requester` (a player id, or `None`
/// for a spectator-less anonymous view). A player's role is exposed only to
/// themselves, or to everyone once it has been publicly revealed.
pub fn build_snapshot(inner: &RoomInner, requester: Option<Uuid>) -> GameSnapshot {
    let room = &inner.room;

    let players: Vec<PlayerView> = inner
        .players
        .values()
        .map(|p| PlayerView {
            id: p.id,
            name: p.name.clone(),
            position: p.position,
            state: p.state,
            role: (requester == Some(p.id) || p.is_revealed).then_some(p.role),
            is_revealed: p.is_revealed,
            is_host: p.user_id == room.host_user_id,
        })
        .collect();

    let dead_players: Vec<Uuid> = inner
        .players
        .values()
        .filter(|p| p.state == PlayerState::Dead)
        .map(|p| p.id)
        .collect();

    let requester_player = requester.and_then(|id| inner.player(id));

    GameSnapshot {
        id: room.id,
        code: room.code.clone(),
        name: room.settings.name.clone(),
        state: room.state,
        phase: room.phase,
        day_number: room.day_number,
        phase_ends_at: room.phase_ends_at.map(epoch_millis),
        players,
        my_role: requester_player.map(|p| p.role),
        alive_count: inner.alive_count(),
        dead_players,
        min_players: room.settings.min_players,
        max_players: room.settings.max_players,
        can_start: room.state == RoomState::Waiting
            && inner.players.len() as u8 >= room.settings.min_players,
        is_host: requester_player.is_some_and(|p| p.user_id == room.host_user_id),
    }
}
