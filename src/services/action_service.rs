//! Validation and recording of player-submitted actions. Failures surface
//! only to the submitter; nothing here leaks a secret submission to the rest
//! of the room.

use std::time::SystemTime;

use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
    dto::ws::ServerMessage,
    error::ServiceError,
    services::{death_pipeline, phase_service, room_events},
    state::{
        RoomInner, SharedState,
        phase::RoomPhase,
        room::{
            Ability, AbilityType, ActionType, DeathCause, GameAction, GameRole, UNLIMITED_USES,
            passive_immune,
        },
    },
};

/// Record a night action for the performer after validating phase, role,
/// ability budget, and target.
pub async fn submit_night_action(
    state: &SharedState,
    inner: &mut RoomInner,
    user_id: Uuid,
    kind: ActionType,
    target_id: Option<Uuid>,
    metadata: Option<Value>,
) -> Result<(), ServiceError> {
    if inner.room.phase != RoomPhase::NightPhase {
        return Err(ServiceError::Precondition(
            "night actions are only accepted at night".into(),
        ));
    }

    let performer = inner
        .player_by_user(user_id)
        .ok_or_else(|| ServiceError::NotFound("player is not in this room".into()))?;
    if !performer.is_alive() {
        return Err(ServiceError::Precondition("dead players cannot act".into()));
    }
    let performer_id = performer.id;
    let role = performer.role;
    let day = inner.room.day_number;

    let role_matches = match kind {
        ActionType::WerewolfVote => role.is_werewolf(),
        ActionType::WhiteWolfDevour => role == GameRole::WhiteWolf,
        ActionType::BlackWolfConvert => role == GameRole::BlackWolf,
        ActionType::WitchHeal | ActionType::WitchPoison => role == GameRole::Witch,
        ActionType::SeerInvestigate => {
            matches!(role, GameRole::Seer | GameRole::TalkativeSeer)
        }
        ActionType::GuardProtect => role == GameRole::Guard,
        ActionType::CupidLink => role == GameRole::Cupid,
        ActionType::HeirChoose => role == GameRole::Heir,
        _ => {
            return Err(ServiceError::Validation(
                "not a night action".into(),
            ));
        }
    };
    if !role_matches {
        return Err(ServiceError::Precondition(
            "your role cannot perform this action".into(),
        ));
    }

    if matches!(kind, ActionType::CupidLink | ActionType::HeirChoose) && day != 1 {
        return Err(ServiceError::Precondition(
            "this action is only available on the first night".into(),
        ));
    }

    if let Some(ability_kind) = consumable_for(kind) {
        let ability = inner
            .ability(performer_id, ability_kind)
            .ok_or_else(|| ServiceError::NotFound("ability not found".into()))?;
        if ability.uses_left == 0 {
            return Err(ServiceError::Precondition("no ability uses left".into()));
        }
        if !ability.ready(day) {
            return Err(ServiceError::Precondition("ability is on cooldown".into()));
        }
    }

    let metadata = match kind {
        ActionType::CupidLink => Some(validate_link_metadata(inner, performer_id, metadata)?),
        _ => {
            validate_target(inner, performer_id, kind, target_id, day)?;
            metadata
        }
    };

    let action = GameAction {
        room_id: inner.room.id,
        performer_id,
        kind,
        day_number: day,
        phase: RoomPhase::NightPhase,
        target_id,
        metadata,
        result: None,
        created_at: SystemTime::now(),
    };
    inner.upsert_action(action.clone());
    inner.touch();

    if let Some(store) = state.game_store().await {
        store.upsert_action(action).await?;
    }

    Ok(())
}

fn consumable_for(kind: ActionType) -> Option<AbilityType> {
    match kind {
        ActionType::WhiteWolfDevour => Some(AbilityType::WhiteWolfDevour),
        ActionType::BlackWolfConvert => Some(AbilityType::BlackWolfConvert),
        ActionType::WitchHeal => Some(AbilityType::WitchHeal),
        ActionType::WitchPoison => Some(AbilityType::WitchPoison),
        _ => None,
    }
}

fn validate_target(
    inner: &RoomInner,
    performer_id: Uuid,
    kind: ActionType,
    target_id: Option<Uuid>,
    day: u32,
) -> Result<(), ServiceError> {
    let target_id = target_id
        .ok_or_else(|| ServiceError::Validation("this action requires a target".into()))?;
    let target = inner
        .player(target_id)
        .ok_or_else(|| ServiceError::NotFound("target is not in this room".into()))?;
    if !target.is_alive() {
        return Err(ServiceError::Precondition("target is not alive".into()));
    }

    match kind {
        ActionType::GuardProtect => {
            if target_id == performer_id {
                return Err(ServiceError::Validation(
                    "the guard cannot protect themselves".into(),
                ));
            }
            // The repeat ban only binds against the immediately previous
            // night; a skipped night clears it.
            let guard = inner.ability(performer_id, AbilityType::GuardProtect);
            let protected_last_night =
                guard.is_some_and(|a| a.last_used_day == Some(day.saturating_sub(1)));
            let last_target = guard
                .and_then(|a| a.metadata.as_ref())
                .and_then(|m| m.get("last_target"))
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<Uuid>().ok());
            if protected_last_night && last_target == Some(target_id) {
                return Err(ServiceError::Validation(
                    "the guard cannot protect the same player on consecutive nights".into(),
                ));
            }
        }
        ActionType::HeirChoose => {
            if target_id == performer_id {
                return Err(ServiceError::Validation(
                    "the heir cannot designate themselves".into(),
                ));
            }
        }
        _ => {}
    }

    Ok(())
}

fn validate_link_metadata(
    inner: &RoomInner,
    performer_id: Uuid,
    metadata: Option<Value>,
) -> Result<Value, ServiceError> {
    let metadata =
        metadata.ok_or_else(|| ServiceError::Validation("cupid must name two players".into()))?;
    let parse = |key: &str| -> Result<Uuid, ServiceError> {
        metadata
            .get(key)
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ServiceError::Validation(format!("missing or malformed `{key}`")))
    };
    let first = parse("player1_id")?;
    let second = parse("player2_id")?;

    if first == second {
        return Err(ServiceError::Validation(
            "cupid must link two different players".into(),
        ));
    }
    for id in [first, second] {
        let player = inner
            .player(id)
            .ok_or_else(|| ServiceError::NotFound("linked player is not in this room".into()))?;
        if !player.is_alive() {
            return Err(ServiceError::Precondition("linked player is not alive".into()));
        }
    }
    let _ = performer_id;

    Ok(json!({
        "player1_id": first.to_string(),
        "player2_id": second.to_string(),
    }))
}

/// Resolve an armed Hunter's revenge shot.
pub async fn hunter_revenge(
    state: &SharedState,
    inner: &mut RoomInner,
    user_id: Uuid,
    target_id: Uuid,
) -> Result<(), ServiceError> {
    let hunter = inner
        .player_by_user(user_id)
        .ok_or_else(|| ServiceError::NotFound("player is not in this room".into()))?;
    let hunter_id = hunter.id;

    let pending = inner
        .pending_revenge
        .ok_or_else(|| ServiceError::Precondition("no revenge shot is pending".into()))?;
    if pending.hunter_id != hunter_id {
        return Err(ServiceError::Auth("the revenge shot is not yours".into()));
    }
    if SystemTime::now() > pending.expires_at {
        inner.pending_revenge = None;
        return Err(ServiceError::Precondition("the revenge window has closed".into()));
    }

    let target = inner
        .player(target_id)
        .ok_or_else(|| ServiceError::NotFound("target is not in this room".into()))?;
    if !target.is_alive() {
        return Err(ServiceError::Precondition("target is not alive".into()));
    }
    if target_id == hunter_id {
        return Err(ServiceError::Validation("the hunter cannot shoot themselves".into()));
    }

    inner.pending_revenge = None;

    let action = GameAction {
        room_id: inner.room.id,
        performer_id: hunter_id,
        kind: ActionType::HunterShoot,
        day_number: inner.room.day_number,
        phase: inner.room.phase,
        target_id: Some(target_id),
        metadata: None,
        result: None,
        created_at: SystemTime::now(),
    };
    inner.upsert_action(action.clone());

    let report = death_pipeline::kill_all(
        inner,
        vec![(target_id, DeathCause::HunterRevenge)],
        SystemTime::now(),
    );

    room_events::publish_room(
        state,
        inner.room.id,
        &ServerMessage::HunterRevengeCompleted {
            hunter_id,
            target_id,
        },
    );
    phase_service::announce_deaths(state, inner, &report);

    let events = phase_service::death_audit_events(inner, &report);
    phase_service::commit_room_snapshot(state, inner, vec![action], events).await?;
    phase_service::check_win_and_maybe_end(state, inner).await?;

    Ok(())
}

/// Resolve a Dictator's coup attempt: a correct accusation executes the wolf
/// and crowns the Dictator as Mayor, a wrong one costs the Dictator their
/// life.
pub async fn dictator_coup(
    state: &SharedState,
    inner: &mut RoomInner,
    user_id: Uuid,
    target_id: Uuid,
) -> Result<(), ServiceError> {
    if !matches!(
        inner.room.phase,
        RoomPhase::DayDiscussion | RoomPhase::DayVoting
    ) {
        return Err(ServiceError::Precondition(
            "a coup can only be staged during the day".into(),
        ));
    }

    let dictator = inner
        .player_by_user(user_id)
        .ok_or_else(|| ServiceError::NotFound("player is not in this room".into()))?;
    if dictator.role != GameRole::Dictator {
        return Err(ServiceError::Precondition("only the dictator can stage a coup".into()));
    }
    if !dictator.is_alive() {
        return Err(ServiceError::Precondition("dead players cannot act".into()));
    }
    let dictator_id = dictator.id;

    let target = inner
        .player(target_id)
        .ok_or_else(|| ServiceError::NotFound("target is not in this room".into()))?;
    if !target.is_alive() {
        return Err(ServiceError::Precondition("target is not alive".into()));
    }
    let success = target.role.is_werewolf();

    let action = GameAction {
        room_id: inner.room.id,
        performer_id: dictator_id,
        kind: ActionType::DictatorCoup,
        day_number: inner.room.day_number,
        phase: inner.room.phase,
        target_id: Some(target_id),
        metadata: None,
        result: Some(json!({ "success": success })),
        created_at: SystemTime::now(),
    };
    inner.upsert_action(action.clone());
    inner.touch();

    let report = if success {
        inner.upsert_ability(Ability {
            player_id: dictator_id,
            kind: AbilityType::MayorVote,
            uses_left: UNLIMITED_USES,
            max_uses: UNLIMITED_USES,
            cooldown_days: 0,
            last_used_day: None,
            metadata: None,
        });
        room_events::publish_room(
            state,
            inner.room.id,
            &ServerMessage::DictatorSuccess {
                dictator_id,
                target_id,
            },
        );

        let alive = inner.alive_players();
        let immune = inner
            .player(target_id)
            .is_some_and(|p| passive_immune(&alive, p, DeathCause::VotedOut));
        drop(alive);
        if immune {
            room_events::publish_room(
                state,
                inner.room.id,
                &ServerMessage::VoteProtection { player_id: target_id },
            );
            death_pipeline::DeathReport::default()
        } else {
            death_pipeline::kill_all(
                inner,
                vec![(target_id, DeathCause::VotedOut)],
                SystemTime::now(),
            )
        }
    } else {
        room_events::publish_room(
            state,
            inner.room.id,
            &ServerMessage::DictatorFailed { dictator_id },
        );
        death_pipeline::kill_all(
            inner,
            vec![(dictator_id, DeathCause::FailedCoup)],
            SystemTime::now(),
        )
    };

    phase_service::announce_deaths(state, inner, &report);
    let events = phase_service::death_audit_events(inner, &report);
    phase_service::commit_room_snapshot(state, inner, vec![action], events).await?;
    phase_service::check_win_and_maybe_end(state, inner).await?;

    Ok(())
}
