//! Phase transitions. `transition_to` is the only place a room changes
//! phase: it clears the old timer, runs the outgoing phase's resolution,
//! checks win conditions, updates the room, runs the incoming phase's
//! opening, arms the next timer, and commits the whole step as one atomic
//! store batch. Callers hold the room's critical section.

use std::time::SystemTime;

use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::{
        models::{ActionFilter, EventEntity, RoomWriteBatch, TimerEntity, UserStatsDelta},
        retry::commit_with_retry,
    },
    dto::{epoch_millis, ws::{RoleReveal, ServerMessage}},
    error::ServiceError,
    services::{
        death_pipeline::{self, DeathReport},
        night_resolver, room_events, vote_service,
        win_evaluator::{self, GameOutcome},
    },
    state::{
        NightReport, PendingRevenge, RoomInner, SharedState,
        phase::{RoomPhase, check_transition},
        room::{
            AbilityType, ActionType, DeathCause, EndReason, GameRole, Player, Team,
        },
    },
};

/// Move a room into `next`, running the full transition contract.
pub async fn transition_to(
    state: &SharedState,
    inner: &mut RoomInner,
    next: RoomPhase,
) -> Result<(), ServiceError> {
    let from = inner.room.phase;
    check_transition(from, next).map_err(|err| ServiceError::Precondition(err.to_string()))?;

    let room_id = inner.room.id;
    state.timers().cancel(room_id);
    let mut batch = RoomWriteBatch::new(room_id);
    batch.clear_timers = true;

    match from {
        RoomPhase::NightPhase => end_of_night(state, inner, &mut batch),
        RoomPhase::DayVoting => end_of_voting(state, inner, &mut batch),
        _ => {}
    }

    if inner.room.phase == RoomPhase::GameEnd {
        snapshot_into(inner, &mut batch);
        return commit_batch(state, batch).await;
    }

    if let Some(outcome) = win_evaluator::evaluate(inner.players.values()) {
        enter_game_end(state, inner, outcome, &mut batch);
        snapshot_into(inner, &mut batch);
        return commit_batch(state, batch).await;
    }

    let now = SystemTime::now();
    inner.room.phase = next;
    inner.room.state = next.room_state();
    inner.room.phase_started_at = Some(now);
    inner.room.phase_ends_at = next.duration(&inner.room.settings).map(|d| now + d);
    if next == RoomPhase::NightPhase {
        inner.room.day_number += 1;
    }

    match next {
        RoomPhase::NightPhase => night_start(state, inner, &mut batch),
        RoomPhase::DayDiscussion => day_start(state, inner, &mut batch),
        RoomPhase::DayVoting => voting_start(state, inner, &mut batch),
        _ => {}
    }

    // The night opening can kill (the Little Girl's roll) and end the game.
    if inner.room.phase == RoomPhase::GameEnd {
        snapshot_into(inner, &mut batch);
        return commit_batch(state, batch).await;
    }

    if let Some(deadline) = inner.room.phase_ends_at {
        state.timers().schedule(room_id, next, deadline);
        batch.timers.push(TimerEntity {
            room_id,
            phase: next,
            deadline,
        });
    }

    room_events::publish_room(
        state,
        room_id,
        &ServerMessage::PhaseChange {
            phase: inner.room.phase,
            state: inner.room.state,
            day_number: inner.room.day_number,
            phase_ends_at: inner.room.phase_ends_at.map(epoch_millis),
        },
    );
    batch.events.push(room_events::audit_record(
        inner,
        "phase_change",
        json!({ "phase": inner.room.phase, "day_number": inner.room.day_number }),
    ));

    snapshot_into(inner, &mut batch);
    commit_batch(state, batch).await
}

/// Resolve the night's actions, apply their effects, and run the deaths
/// through the cascade. Announcements of the victims wait for day start.
fn end_of_night(state: &SharedState, inner: &mut RoomInner, batch: &mut RoomWriteBatch) {
    let room_id = inner.room.id;
    let day = inner.room.day_number;
    let outcome = night_resolver::resolve(inner);

    if let Some((first, second)) = outcome.lovers {
        if let Some(player) = inner.player_mut(first) {
            player.linked_to = Some(second);
        }
        if let Some(player) = inner.player_mut(second) {
            player.linked_to = Some(first);
        }
        room_events::publish_player(
            state,
            room_id,
            first,
            &ServerMessage::BecameLover { partner_id: second },
        );
        room_events::publish_player(
            state,
            room_id,
            second,
            &ServerMessage::BecameLover { partner_id: first },
        );
        batch.events.push(room_events::audit_record(
            inner,
            "became_lover",
            json!({ "player1_id": first, "player2_id": second }),
        ));
    }

    for ability in &outcome.ability_updates {
        inner.upsert_ability(ability.clone());
    }

    if let Some(converted) = outcome.conversion {
        if let Some(player) = inner.player_mut(converted) {
            player.role = GameRole::Werewolf;
        }
        inner.reset_abilities_for_role(converted, GameRole::Werewolf);
        room_events::publish_player(
            state,
            room_id,
            converted,
            &ServerMessage::RoleChanged {
                role: GameRole::Werewolf,
            },
        );
        batch.events.push(room_events::audit_record(
            inner,
            "role_changed",
            json!({ "player_id": converted, "role": GameRole::Werewolf }),
        ));
    }

    let mut announcements = Vec::new();
    for investigation in &outcome.investigations {
        let updated = inner.actions.iter_mut().find(|a| {
            a.performer_id == investigation.seer_id
                && a.kind == ActionType::SeerInvestigate
                && a.day_number == day
                && a.phase == RoomPhase::NightPhase
        });
        if let Some(action) = updated {
            action.result = Some(json!({ "role": investigation.role }));
            batch.actions.push(action.clone());
        }
        room_events::publish_player(
            state,
            room_id,
            investigation.seer_id,
            &ServerMessage::InvestigationResult {
                target_id: investigation.target_id,
                role: investigation.role,
            },
        );
        if investigation.public {
            announcements.push((investigation.target_id, investigation.role));
        }
    }

    let report = death_pipeline::kill_all(inner, outcome.deaths.clone(), SystemTime::now());
    batch.events.extend(death_audit_events(inner, &report));
    announce_cascade_extras(state, inner, &report);

    inner.night_report = Some(NightReport {
        deaths: report.deaths.clone(),
        saves: outcome.saves.clone(),
        announcements,
    });
}

/// Close the vote and apply its verdict, including the day-one Mercenary
/// resolution.
fn end_of_voting(state: &SharedState, inner: &mut RoomInner, batch: &mut RoomWriteBatch) {
    let room_id = inner.room.id;
    let outcome = vote_service::finalize(inner, &mut rand::rng());

    room_events::publish_room(
        state,
        room_id,
        &ServerMessage::VoteResults {
            counts: outcome.counts.clone(),
            eliminated: outcome.eliminated,
            tie: outcome.tie,
            decided_by_mayor: outcome.decided_by_mayor,
        },
    );
    batch.events.push(room_events::audit_record(
        inner,
        "vote_results",
        json!({
            "counts": outcome.counts,
            "eliminated": outcome.eliminated,
            "tie": outcome.tie,
        }),
    ));

    if let Some(player_id) = outcome.vote_protected {
        room_events::publish_room(state, room_id, &ServerMessage::VoteProtection { player_id });
    }

    if let Some(mercenary_id) = outcome.mercenary_converted {
        room_events::publish_player(
            state,
            room_id,
            mercenary_id,
            &ServerMessage::RoleChanged {
                role: GameRole::Villager,
            },
        );
    }

    if let Some(eliminated) = outcome.eliminated {
        let report = death_pipeline::kill_all(
            inner,
            vec![(eliminated, DeathCause::VotedOut)],
            SystemTime::now(),
        );
        batch.events.extend(death_audit_events(inner, &report));
        announce_deaths(state, inner, &report);
    }

    if let Some(mercenary_id) = outcome.mercenary_win {
        room_events::publish_room(
            state,
            room_id,
            &ServerMessage::MercenaryVictory {
                player_id: mercenary_id,
            },
        );
        enter_game_end(state, inner, GameOutcome::Winner(Team::Solo), batch);
    }
}

/// Open the night: wipe any stale submissions for this night, prompt the
/// night-capable roles, and roll the Little Girl's gamble.
fn night_start(state: &SharedState, inner: &mut RoomInner, batch: &mut RoomWriteBatch) {
    let room_id = inner.room.id;
    let day = inner.room.day_number;

    inner.purge_actions(day, RoomPhase::NightPhase);
    batch.purge_actions = Some(ActionFilter {
        room_id: Some(room_id),
        day_number: Some(day),
        phase: Some(RoomPhase::NightPhase),
        ..ActionFilter::default()
    });
    inner.night_report = None;
    inner.little_girl_spying = false;

    let prompts: Vec<(Uuid, Vec<ActionType>, bool)> = inner
        .players
        .values()
        .filter(|p| p.is_alive())
        .map(|p| (p.id, night_prompts(inner, p), p.role.first_night_only()))
        .collect();
    for (player_id, actions, first_night) in prompts {
        for action in actions {
            room_events::publish_player(
                state,
                room_id,
                player_id,
                &ServerMessage::NightAbilityAvailable { action },
            );
        }
        if first_night && day == 1 {
            let role = inner.player(player_id).map(|p| p.role);
            let action = match role {
                Some(GameRole::Cupid) => Some(ActionType::CupidLink),
                Some(GameRole::Heir) => Some(ActionType::HeirChoose),
                _ => None,
            };
            if let Some(action) = action {
                room_events::publish_player(
                    state,
                    room_id,
                    player_id,
                    &ServerMessage::FirstNightAction { action },
                );
            }
        }
    }

    let little_girl = inner
        .players
        .values()
        .find(|p| p.is_alive() && p.role == GameRole::LittleGirl)
        .map(|p| p.id);
    if let Some(little_girl_id) = little_girl {
        let caught = rand::random::<f64>() < state.config().little_girl_catch_probability;
        if caught {
            let report = death_pipeline::kill_all(
                inner,
                vec![(little_girl_id, DeathCause::CaughtSpying)],
                SystemTime::now(),
            );
            batch.events.extend(death_audit_events(inner, &report));
            announce_cascade_extras(state, inner, &report);
            inner.night_report = Some(NightReport {
                deaths: report.deaths.clone(),
                ..NightReport::default()
            });
            if let Some(outcome) = win_evaluator::evaluate(inner.players.values()) {
                enter_game_end(state, inner, outcome, batch);
            }
        } else {
            inner.little_girl_spying = true;
        }
    }
}

/// Open the day: announce what the night produced.
fn day_start(state: &SharedState, inner: &mut RoomInner, _batch: &mut RoomWriteBatch) {
    let room_id = inner.room.id;
    let Some(report) = inner.night_report.take() else {
        return;
    };

    for (player_id, cause, role) in &report.deaths {
        room_events::publish_room(
            state,
            room_id,
            &ServerMessage::PlayerDied {
                player_id: *player_id,
                cause: *cause,
                role: *role,
            },
        );
    }
    for (player_id, _cause) in &report.saves {
        room_events::publish_room(
            state,
            room_id,
            &ServerMessage::PlayerSaved {
                player_id: *player_id,
            },
        );
    }
    for (target_id, role) in &report.announcements {
        room_events::publish_room(
            state,
            room_id,
            &ServerMessage::TalkativeSeerResult {
                target_id: *target_id,
                role: *role,
            },
        );
    }
}

/// Open the vote: wipe stale ballots, remind the day-one Mercenary, announce
/// the deadline.
fn voting_start(state: &SharedState, inner: &mut RoomInner, batch: &mut RoomWriteBatch) {
    let room_id = inner.room.id;
    let day = inner.room.day_number;

    inner.purge_actions(day, RoomPhase::DayVoting);
    batch.purge_actions = Some(ActionFilter {
        room_id: Some(room_id),
        day_number: Some(day),
        phase: Some(RoomPhase::DayVoting),
        ..ActionFilter::default()
    });

    if day == 1 {
        let mercenary = inner
            .players
            .values()
            .find(|p| p.is_alive() && p.role == GameRole::Mercenary)
            .map(|p| p.id);
        if let Some(mercenary_id) = mercenary {
            let target = inner
                .ability(mercenary_id, AbilityType::MercenaryTarget)
                .and_then(death_pipeline::target_from_metadata);
            if let Some(target_id) = target {
                room_events::publish_player(
                    state,
                    room_id,
                    mercenary_id,
                    &ServerMessage::MercenaryReminder { target_id },
                );
            }
        }
    }

    room_events::publish_room(
        state,
        room_id,
        &ServerMessage::VotingStarted {
            ends_at: inner.room.phase_ends_at.map(epoch_millis),
        },
    );
}

/// Announce a cascade in full: the deaths themselves plus everything they
/// triggered.
pub fn announce_deaths(state: &SharedState, inner: &mut RoomInner, report: &DeathReport) {
    let room_id = inner.room.id;
    for (player_id, cause, role) in &report.deaths {
        room_events::publish_room(
            state,
            room_id,
            &ServerMessage::PlayerDied {
                player_id: *player_id,
                cause: *cause,
                role: *role,
            },
        );
    }
    announce_cascade_extras(state, inner, report);
}

/// The non-death consequences of a cascade: inheritances, lapsed immunities,
/// and armed Hunters. Safe to call while the deaths themselves are still
/// embargoed until morning.
pub fn announce_cascade_extras(state: &SharedState, inner: &mut RoomInner, report: &DeathReport) {
    let room_id = inner.room.id;

    for inheritance in &report.inheritances {
        let message = if inheritance.stolen {
            ServerMessage::RoleStolen {
                role: inheritance.role,
                from_player_id: inheritance.from_player_id,
            }
        } else {
            ServerMessage::RoleInherited {
                role: inheritance.role,
                from_player_id: inheritance.from_player_id,
            }
        };
        room_events::publish_player(state, room_id, inheritance.player_id, &message);
    }

    for (player_id, reason) in &report.lapsed_immunities {
        room_events::publish_player(
            state,
            room_id,
            *player_id,
            &ServerMessage::ProtectionLost {
                reason: reason.clone(),
            },
        );
    }

    for hunter_id in &report.hunters_armed {
        let now = SystemTime::now();
        let mut grace = state.config().hunter_grace;
        if let Some(ends_at) = inner.room.phase_ends_at {
            if let Ok(remaining) = ends_at.duration_since(now) {
                grace = grace.min(remaining);
            }
        }
        let expires_at = now + grace;
        inner.pending_revenge = Some(PendingRevenge {
            hunter_id: *hunter_id,
            expires_at,
        });
        room_events::publish_player(
            state,
            room_id,
            *hunter_id,
            &ServerMessage::HunterTriggered {
                expires_at: epoch_millis(expires_at),
            },
        );
    }
}

/// Audit records for a cascade.
pub fn death_audit_events(inner: &RoomInner, report: &DeathReport) -> Vec<EventEntity> {
    let mut events = Vec::new();
    for (player_id, cause, role) in &report.deaths {
        events.push(room_events::audit_record(
            inner,
            "player_died",
            json!({ "player_id": player_id, "cause": cause, "role": role }),
        ));
    }
    for inheritance in &report.inheritances {
        let event_type = if inheritance.stolen {
            "role_stolen"
        } else {
            "role_inherited"
        };
        events.push(room_events::audit_record(
            inner,
            event_type,
            json!({
                "player_id": inheritance.player_id,
                "role": inheritance.role,
                "from_player_id": inheritance.from_player_id,
            }),
        ));
    }
    events
}

/// Terminate the game: set the verdict, reveal every role, update per-user
/// statistics, free the room code, and announce.
fn enter_game_end(
    state: &SharedState,
    inner: &mut RoomInner,
    outcome: GameOutcome,
    batch: &mut RoomWriteBatch,
) {
    state.timers().cancel(inner.room.id);
    batch.clear_timers = true;

    let winner = match outcome {
        GameOutcome::Winner(team) => Some(team),
        GameOutcome::Draw => None,
    };

    inner.room.phase = RoomPhase::GameEnd;
    inner.room.state = RoomPhase::GameEnd.room_state();
    inner.room.phase_started_at = Some(SystemTime::now());
    inner.room.phase_ends_at = None;
    inner.room.winning_team = winner;
    inner.room.end_reason = Some(match winner {
        Some(_) => EndReason::Victory,
        None => EndReason::Draw,
    });
    inner.pending_revenge = None;

    for player in inner.players.values_mut() {
        player.is_revealed = true;
    }

    for player in inner.players.values() {
        let won = winner == Some(player.role.team());
        batch.stats.push(UserStatsDelta {
            user_id: player.user_id,
            games_played: 1,
            wins: u32::from(won),
        });
    }

    state.release_code(&inner.room.code);

    let roles: Vec<RoleReveal> = inner
        .players
        .values()
        .map(|p: &Player| RoleReveal {
            player_id: p.id,
            role: p.role,
        })
        .collect();
    room_events::publish_room(
        state,
        inner.room.id,
        &ServerMessage::GameEnded {
            winning_team: winner,
            roles: roles.clone(),
        },
    );
    batch.events.push(room_events::audit_record(
        inner,
        "game_ended",
        json!({ "winning_team": winner, "roles": roles }),
    ));
}

/// Evaluate win conditions and, when the game is over, finalize and commit.
/// Returns whether the room is now (or already was) terminal.
pub async fn check_win_and_maybe_end(
    state: &SharedState,
    inner: &mut RoomInner,
) -> Result<bool, ServiceError> {
    if inner.room.phase == RoomPhase::GameEnd {
        return Ok(true);
    }
    let Some(outcome) = win_evaluator::evaluate(inner.players.values()) else {
        return Ok(false);
    };

    let mut batch = RoomWriteBatch::new(inner.room.id);
    enter_game_end(state, inner, outcome, &mut batch);
    snapshot_into(inner, &mut batch);
    commit_batch(state, batch).await?;
    Ok(true)
}

/// Persist the room as-is together with extra action and event rows. Used by
/// mid-phase mutations (revenge shots, coups, joins).
pub async fn commit_room_snapshot(
    state: &SharedState,
    inner: &RoomInner,
    actions: Vec<crate::dao::models::ActionEntity>,
    events: Vec<EventEntity>,
) -> Result<(), ServiceError> {
    let mut batch = inner.full_batch();
    batch.actions = actions;
    batch.events = events;
    commit_batch(state, batch).await
}

fn snapshot_into(inner: &RoomInner, batch: &mut RoomWriteBatch) {
    let full = inner.full_batch();
    batch.room = full.room;
    batch.players = full.players;
    batch.abilities = full.abilities;
}

/// Persist a batch through the installed store, retrying transient
/// conflicts; a missing store (degraded mode) downgrades to memory-only.
pub async fn commit_batch(state: &SharedState, batch: RoomWriteBatch) -> Result<(), ServiceError> {
    let Some(store) = state.game_store().await else {
        warn!(room_id = %batch.room_id, "no storage backend; room state held in memory only");
        return Ok(());
    };
    commit_with_retry(move || store.commit(batch.clone()))
        .await
        .map_err(Into::into)
}

/// Actions a role is prompted for at nightfall, filtered by ability budget.
fn night_prompts(inner: &RoomInner, player: &Player) -> Vec<ActionType> {
    let day = inner.room.day_number;
    let ready = |kind: AbilityType| {
        inner
            .ability(player.id, kind)
            .is_some_and(|a| a.ready(day))
    };

    let mut prompts = Vec::new();
    if player.role.is_werewolf() {
        prompts.push(ActionType::WerewolfVote);
    }
    match player.role {
        GameRole::BlackWolf if ready(AbilityType::BlackWolfConvert) => {
            prompts.push(ActionType::BlackWolfConvert);
        }
        GameRole::WhiteWolf if ready(AbilityType::WhiteWolfDevour) => {
            prompts.push(ActionType::WhiteWolfDevour);
        }
        GameRole::Seer | GameRole::TalkativeSeer => prompts.push(ActionType::SeerInvestigate),
        GameRole::Witch => {
            if ready(AbilityType::WitchHeal) {
                prompts.push(ActionType::WitchHeal);
            }
            if ready(AbilityType::WitchPoison) {
                prompts.push(ActionType::WitchPoison);
            }
        }
        GameRole::Guard => prompts.push(ActionType::GuardProtect),
        _ => {}
    }
    prompts
}
