//! Room lifecycle: creation with code allocation, joining and leaving, host
//! succession, game start, the disconnect grace window, and the reaper that
//! cancels abandoned lobbies.

use std::{sync::Arc, time::SystemTime};

use rand::Rng;
use serde_json::json;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        game::{CreateRoomRequest, PlayerView, RoomSummary},
        ws::ServerMessage,
    },
    error::ServiceError,
    services::{phase_service, role_service, room_events},
    state::{
        RoomHandle, RoomInner, SharedState,
        phase::RoomPhase,
        room::{EndReason, Player, PlayerState, Room, RoomState},
    },
};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LENGTH: usize = 6;
const CODE_RETRIES: usize = 10;

/// Open a new room for `user_id` as host.
pub async fn create_room(
    state: &SharedState,
    user_id: Uuid,
    request: CreateRoomRequest,
) -> Result<RoomSummary, ServiceError> {
    if !state.accepting_rooms() {
        return Err(ServiceError::Precondition(
            "the server is shutting down and not accepting new rooms".into(),
        ));
    }
    if state.is_degraded().await {
        return Err(ServiceError::Degraded);
    }
    request
        .validate()
        .map_err(|err| ServiceError::Validation(err.to_string()))?;

    let code = allocate_code(state)?;
    let room = Room::new(code.clone(), user_id, request.into());

    if let Some(store) = state.game_store().await {
        store.create_room(room.clone().into()).await?;
    }

    let summary = summarize(&room, 0);
    let handle = RoomHandle::new(room);
    state.insert_room(code, handle);
    info!(room_id = %summary.id, code = %summary.code, "room created");

    Ok(summary)
}

/// Uniform random 6-character code, retried on collision a bounded number of
/// times before giving up.
fn allocate_code(state: &SharedState) -> Result<String, ServiceError> {
    let mut rng = rand::rng();
    for _ in 0..CODE_RETRIES {
        let code: String = (0..CODE_LENGTH)
            .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        if state.room_by_code(&code).is_none() {
            return Ok(code);
        }
    }
    Err(ServiceError::Conflict(
        "could not allocate a unique room code".into(),
    ))
}

pub fn summarize(room: &Room, player_count: u32) -> RoomSummary {
    RoomSummary {
        id: room.id,
        code: room.code.clone(),
        name: room.settings.name.clone(),
        state: room.state,
        phase: room.phase,
        player_count,
        min_players: room.settings.min_players,
        max_players: room.settings.max_players,
        is_private: room.settings.is_private,
    }
}

/// Attach a user to a room: a fresh join while the lobby is open, or a
/// reconnect that revives a disconnected seat. Returns the player id.
pub async fn join_room(
    state: &SharedState,
    inner: &mut RoomInner,
    user_id: Uuid,
    name: Option<String>,
) -> Result<Uuid, ServiceError> {
    inner.touch();

    if let Some(player) = inner.player_by_user(user_id) {
        let player_id = player.id;
        if inner.player(player_id).map(|p| p.state) == Some(PlayerState::Disconnected) {
            inner
                .player_mut(player_id)
                .expect("player exists")
                .state = PlayerState::Alive;
            phase_service::commit_room_snapshot(state, inner, Vec::new(), Vec::new()).await?;
        }
        return Ok(player_id);
    }

    if inner.room.state != RoomState::Waiting {
        return Err(ServiceError::Precondition(
            "the game has already started".into(),
        ));
    }
    if inner.players.len() as u8 >= inner.room.settings.max_players {
        return Err(ServiceError::Conflict("the room is full".into()));
    }

    let name = name
        .map(|n| n.trim().to_owned())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ServiceError::Validation("a display name is required to join".into()))?;

    let position = inner.next_position();
    let player = Player::new(user_id, name, position);
    let player_id = player.id;
    let view = PlayerView {
        id: player.id,
        name: player.name.clone(),
        position: player.position,
        state: player.state,
        role: None,
        is_revealed: false,
        is_host: user_id == inner.room.host_user_id,
    };
    inner.players.insert(player_id, player);

    phase_service::commit_room_snapshot(
        state,
        inner,
        Vec::new(),
        vec![room_events::audit_record(
            inner,
            "player_joined",
            json!({ "player_id": player_id, "position": position }),
        )],
    )
    .await?;

    room_events::publish_room(state, inner.room.id, &ServerMessage::PlayerJoined { player: view });

    Ok(player_id)
}

/// Remove a player from an open lobby, or detach them from a running game.
/// Handles host succession and cancels an emptied lobby.
pub async fn leave_room(
    state: &SharedState,
    inner: &mut RoomInner,
    player_id: Uuid,
) -> Result<(), ServiceError> {
    let Some(player) = inner.player(player_id) else {
        return Ok(());
    };
    let user_id = player.user_id;
    inner.touch();

    if inner.room.state != RoomState::Waiting {
        // Mid-game leavers keep their seat but stop counting as alive.
        if inner.player(player_id).is_some_and(|p| p.is_alive()) {
            inner
                .player_mut(player_id)
                .expect("player exists")
                .state = PlayerState::Disconnected;
            phase_service::commit_room_snapshot(state, inner, Vec::new(), Vec::new()).await?;
        }
        return Ok(());
    }

    inner.players.shift_remove(&player_id);
    if let Some(store) = state.game_store().await {
        store.delete_player(inner.room.id, player_id).await?;
    }

    let mut new_host = None;
    if inner.room.host_user_id == user_id {
        // Host succession: the lowest seat inherits the lobby.
        let successor = inner
            .players
            .values()
            .min_by_key(|p| p.position)
            .map(|p| p.user_id);
        match successor {
            Some(successor) => {
                inner.room.host_user_id = successor;
                new_host = Some(successor);
            }
            None => {
                cancel_room(state, inner, EndReason::HostLeft).await?;
                return Ok(());
            }
        }
    }

    room_events::publish_room(
        state,
        inner.room.id,
        &ServerMessage::PlayerLeft {
            player_id,
            new_host_user_id: new_host,
        },
    );
    phase_service::commit_room_snapshot(state, inner, Vec::new(), Vec::new()).await?;

    Ok(())
}

/// Terminal lobby shutdown: no winner, code freed, registry entry dropped.
pub async fn cancel_room(
    state: &SharedState,
    inner: &mut RoomInner,
    reason: EndReason,
) -> Result<(), ServiceError> {
    state.timers().cancel(inner.room.id);
    inner.room.state = RoomState::Cancelled;
    inner.room.end_reason = Some(reason);
    inner.room.phase_ends_at = None;

    let code = inner.room.code.clone();
    state.remove_room(inner.room.id, &code);

    let mut batch = inner.full_batch();
    batch.clear_timers = true;
    batch.events.push(room_events::audit_record(
        inner,
        "room_cancelled",
        json!({ "reason": reason }),
    ));
    phase_service::commit_batch(state, batch).await?;
    info!(room_id = %inner.room.id, ?reason, "room cancelled");

    Ok(())
}

/// Start the game: host-only, lobby-only, quorum required. Assigns roles,
/// whispers each player theirs, and enters the role-assignment interlude.
pub async fn start_game(
    state: &SharedState,
    inner: &mut RoomInner,
    user_id: Uuid,
) -> Result<(), ServiceError> {
    if inner.room.state != RoomState::Waiting {
        return Err(ServiceError::Precondition(
            "the game has already started".into(),
        ));
    }
    if inner.room.host_user_id != user_id {
        return Err(ServiceError::Auth("only the host can start the game".into()));
    }
    if (inner.players.len() as u8) < inner.room.settings.min_players {
        return Err(ServiceError::Precondition(format!(
            "at least {} players are required",
            inner.room.settings.min_players
        )));
    }

    role_service::assign_roles(inner, &mut rand::rng());

    let room_id = inner.room.id;
    for player in inner.players.values() {
        room_events::publish_player(
            state,
            room_id,
            player.id,
            &ServerMessage::RoleAssigned { role: player.role },
        );
    }

    phase_service::transition_to(state, inner, RoomPhase::RoleAssignment).await
}

/// Grace-window expiry for a vanished connection: lobby members lose their
/// seat, in-game players are marked disconnected but keep it.
pub async fn disconnect_timeout(state: &SharedState, room_id: Uuid, player_id: Uuid) {
    let Some(handle) = state.room(room_id) else {
        return;
    };
    let mut inner = handle.lock().await;

    if state.connections().contains_key(&(room_id, player_id)) {
        // Reconnected during the grace window.
        return;
    }
    let Some(is_alive) = inner.player(player_id).map(|p| p.is_alive()) else {
        return;
    };

    let result = if inner.room.state == RoomState::Waiting {
        leave_room(state, &mut inner, player_id).await
    } else if is_alive {
        inner
            .player_mut(player_id)
            .expect("player exists")
            .state = PlayerState::Disconnected;
        phase_service::commit_room_snapshot(state, &inner, Vec::new(), Vec::new()).await
    } else {
        Ok(())
    };

    if let Err(err) = result {
        warn!(%room_id, %player_id, error = %err, "failed to apply disconnect timeout");
    }
}

/// Background sweep cancelling lobbies idle for longer than the configured
/// abandonment window.
pub async fn run_reaper(state: SharedState) {
    let interval = std::time::Duration::from_secs(60);
    loop {
        sleep(interval).await;

        let cutoff = SystemTime::now() - state.config().abandoned_after;
        let handles: Vec<Arc<RoomHandle>> = state
            .rooms()
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for handle in handles {
            let mut inner = handle.lock().await;
            if inner.room.state == RoomState::Waiting && inner.last_activity < cutoff {
                if let Err(err) = cancel_room(&state, &mut inner, EndReason::Abandoned).await {
                    warn!(room_id = %inner.room.id, error = %err, "failed to cancel abandoned room");
                }
            }
        }
    }
}

/// Graceful shutdown: stop intake, persist every live room, and let the
/// caller close the listener and stores afterwards.
pub async fn shutdown(state: &SharedState) {
    state.stop_accepting_rooms();

    let handles: Vec<Arc<RoomHandle>> = state
        .rooms()
        .iter()
        .map(|entry| entry.value().clone())
        .collect();

    for handle in handles {
        let inner = handle.lock().await;
        if inner.room.state.is_terminal() {
            continue;
        }
        if let Err(err) =
            phase_service::commit_room_snapshot(state, &inner, Vec::new(), Vec::new()).await
        {
            warn!(room_id = %inner.room.id, error = %err, "failed to persist room during shutdown");
        }
    }
    info!("room states persisted for shutdown");
}
