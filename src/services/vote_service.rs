//! Day-vote casting and tallying. Votes are upserts (change of mind keeps the
//! latest), an explicit `None` abstains, and the phase ends early once every
//! alive player has spoken.

use std::time::SystemTime;

use rand::Rng;
use rand::seq::IndexedRandom;
use uuid::Uuid;

use crate::{
    dto::ws::{ServerMessage, VoteCount},
    error::ServiceError,
    services::room_events,
    state::{
        RoomInner, SharedState,
        phase::RoomPhase,
        room::{AbilityType, ActionType, DeathCause, GameAction, GameRole, passive_immune},
    },
};

/// Result of closing a day vote.
#[derive(Debug, Clone, Default)]
pub struct VoteOutcome {
    /// Final per-target counts, highest first.
    pub counts: Vec<VoteCount>,
    pub eliminated: Option<Uuid>,
    pub tie: bool,
    pub decided_by_mayor: bool,
    /// Candidate spared by a passive vote immunity.
    pub vote_protected: Option<Uuid>,
    /// Mercenary whose day-one target was eliminated.
    pub mercenary_win: Option<Uuid>,
    /// Mercenary converted to Villager at the end of day one.
    pub mercenary_converted: Option<Uuid>,
}

/// Record or change a vote. Emits a `vote:update` tally to the room and arms
/// an immediate expiry once all alive players have cast or abstained.
pub async fn cast_vote(
    state: &SharedState,
    inner: &mut RoomInner,
    voter_user_id: Uuid,
    target_id: Option<Uuid>,
) -> Result<(), ServiceError> {
    if inner.room.phase != RoomPhase::DayVoting {
        return Err(ServiceError::Precondition(
            "votes are only cast during the day vote".into(),
        ));
    }

    let voter = inner
        .player_by_user(voter_user_id)
        .ok_or_else(|| ServiceError::NotFound("player is not in this room".into()))?;
    if !voter.is_alive() {
        return Err(ServiceError::Precondition("dead players cannot vote".into()));
    }
    let voter_id = voter.id;

    if let Some(target_id) = target_id {
        let target = inner
            .player(target_id)
            .ok_or_else(|| ServiceError::NotFound("vote target is not in this room".into()))?;
        if !target.is_alive() {
            return Err(ServiceError::Precondition("vote target is not alive".into()));
        }
    }

    let action = GameAction {
        room_id: inner.room.id,
        performer_id: voter_id,
        kind: ActionType::DayVote,
        day_number: inner.room.day_number,
        phase: RoomPhase::DayVoting,
        target_id,
        metadata: None,
        result: None,
        created_at: SystemTime::now(),
    };
    inner.upsert_action(action.clone());
    inner.touch();

    if let Some(store) = state.game_store().await {
        store.upsert_action(action).await?;
    }

    let (tally, voters) = current_tally(inner);
    let alive = inner.alive_count();
    room_events::publish_room(
        state,
        inner.room.id,
        &ServerMessage::VoteUpdate {
            tally,
            voters,
            alive,
        },
    );

    // Everyone has spoken: let the dispatcher close the phase instead of
    // transitioning from inside the vote write.
    if voters == alive {
        state
            .timers()
            .schedule(inner.room.id, RoomPhase::DayVoting, SystemTime::now());
    }

    Ok(())
}

/// Current non-abstain counts plus the number of distinct alive voters who
/// have cast anything at all (votes and explicit abstentions alike).
fn current_tally(inner: &RoomInner) -> (Vec<VoteCount>, u32) {
    let mut counts: Vec<VoteCount> = Vec::new();
    let mut voters = 0u32;

    for action in inner.actions_for(inner.room.day_number, RoomPhase::DayVoting) {
        if action.kind != ActionType::DayVote {
            continue;
        }
        if !inner
            .player(action.performer_id)
            .is_some_and(|p| p.is_alive())
        {
            continue;
        }
        voters += 1;
        let Some(target_id) = action.target_id else {
            continue;
        };
        match counts.iter_mut().find(|c| c.target_id == target_id) {
            Some(entry) => entry.votes += 1,
            None => counts.push(VoteCount {
                target_id,
                votes: 1,
            }),
        }
    }

    counts.sort_by(|a, b| b.votes.cmp(&a.votes));
    (counts, voters)
}

/// Close the vote: apply the Mayor's double vote, pick the candidate (tie
/// policy: a live Mayor's choice, modelled as a uniform pick; otherwise no
/// elimination), honour vote immunities, and resolve the day-one Mercenary.
pub fn finalize(inner: &mut RoomInner, rng: &mut impl Rng) -> VoteOutcome {
    let mut outcome = VoteOutcome::default();
    let (mut counts, _) = current_tally(inner);

    for mayor in mayors(inner) {
        let doubled = inner
            .actions_for(inner.room.day_number, RoomPhase::DayVoting)
            .into_iter()
            .find(|a| a.kind == ActionType::DayVote && a.performer_id == mayor)
            .and_then(|a| a.target_id);
        if let Some(target_id) = doubled {
            if let Some(entry) = counts.iter_mut().find(|c| c.target_id == target_id) {
                entry.votes += 1;
            }
        }
    }
    counts.sort_by(|a, b| b.votes.cmp(&a.votes));

    let top_votes = counts.first().map(|c| c.votes).unwrap_or(0);
    let candidate = if top_votes == 0 {
        None
    } else {
        let candidates: Vec<Uuid> = counts
            .iter()
            .filter(|c| c.votes == top_votes)
            .map(|c| c.target_id)
            .collect();
        if candidates.len() == 1 {
            Some(candidates[0])
        } else {
            outcome.tie = true;
            if mayors(inner).is_empty() {
                None
            } else {
                outcome.decided_by_mayor = true;
                candidates.choose(rng).copied()
            }
        }
    };

    if let Some(candidate_id) = candidate {
        let alive = inner.alive_players();
        let immune = inner
            .player(candidate_id)
            .is_some_and(|p| passive_immune(&alive, p, DeathCause::VotedOut));
        if immune {
            outcome.vote_protected = Some(candidate_id);
        } else {
            outcome.eliminated = Some(candidate_id);
        }
    }

    outcome.counts = counts;

    // Day-one Mercenary resolution: win on a matching elimination, then the
    // contract expires and the Mercenary becomes a plain Villager.
    if inner.room.day_number == 1 {
        let mercenary = inner
            .players
            .values()
            .find(|p| p.is_alive() && p.role == GameRole::Mercenary)
            .map(|p| p.id);
        if let Some(mercenary_id) = mercenary {
            let contract = inner
                .ability(mercenary_id, AbilityType::MercenaryTarget)
                .and_then(crate::services::death_pipeline::target_from_metadata);
            if contract.is_some() && contract == outcome.eliminated {
                outcome.mercenary_win = Some(mercenary_id);
            }
            inner
                .player_mut(mercenary_id)
                .expect("mercenary exists")
                .role = GameRole::Villager;
            inner.reset_abilities_for_role(mercenary_id, GameRole::Villager);
            outcome.mercenary_converted = Some(mercenary_id);
        }
    }

    outcome
}

fn mayors(inner: &RoomInner) -> Vec<Uuid> {
    inner
        .players
        .values()
        .filter(|p| {
            p.is_alive()
                && inner
                    .ability(p.id, AbilityType::MayorVote)
                    .is_some()
        })
        .map(|p| p.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::state::room::{Ability, Player, Room, RoomSettings, UNLIMITED_USES};

    fn voting_room(roles: &[GameRole]) -> RoomInner {
        let mut room = Room::new(
            "VOTE01".into(),
            Uuid::new_v4(),
            RoomSettings::with_defaults("tally"),
        );
        room.day_number = 2;
        room.phase = RoomPhase::DayVoting;
        let mut inner = RoomInner::new(room);
        for (i, role) in roles.iter().enumerate() {
            let mut p = Player::new(Uuid::new_v4(), format!("p{i}"), (i + 1) as u8);
            p.role = *role;
            inner.players.insert(p.id, p);
        }
        inner
    }

    fn vote(inner: &mut RoomInner, voter: Uuid, target: Option<Uuid>, at_ms: u64) {
        let action = GameAction {
            room_id: inner.room.id,
            performer_id: voter,
            kind: ActionType::DayVote,
            day_number: inner.room.day_number,
            phase: RoomPhase::DayVoting,
            target_id: target,
            metadata: None,
            result: None,
            created_at: SystemTime::UNIX_EPOCH + Duration::from_millis(at_ms),
        };
        inner.upsert_action(action);
    }

    fn id_at(inner: &RoomInner, index: usize) -> Uuid {
        *inner.players.get_index(index).unwrap().0
    }

    #[test]
    fn plurality_target_is_eliminated() {
        let mut inner = voting_room(&[
            GameRole::Werewolf,
            GameRole::Villager,
            GameRole::Villager,
            GameRole::Seer,
        ]);
        let wolf = id_at(&inner, 0);
        for i in 1..4 {
            let voter = id_at(&inner, i);
            vote(&mut inner, voter, Some(wolf), i as u64);
        }
        let target = id_at(&inner, 1);
        vote(&mut inner, wolf, Some(target), 4);

        let outcome = finalize(&mut inner, &mut rand::rng());
        assert_eq!(outcome.eliminated, Some(wolf));
        assert!(!outcome.tie);
    }

    #[test]
    fn revote_replaces_earlier_choice() {
        let mut inner = voting_room(&[GameRole::Villager, GameRole::Villager, GameRole::Werewolf]);
        let (a, b, wolf) = (id_at(&inner, 0), id_at(&inner, 1), id_at(&inner, 2));
        vote(&mut inner, a, Some(b), 1);
        vote(&mut inner, a, Some(wolf), 2);
        vote(&mut inner, b, Some(wolf), 3);

        let outcome = finalize(&mut inner, &mut rand::rng());
        assert_eq!(outcome.eliminated, Some(wolf));
        assert_eq!(outcome.counts[0].votes, 2);
    }

    #[test]
    fn all_abstentions_eliminate_nobody() {
        let mut inner = voting_room(&[GameRole::Villager, GameRole::Villager, GameRole::Werewolf]);
        for i in 0..3 {
            let voter = id_at(&inner, i);
            vote(&mut inner, voter, None, i as u64);
        }

        let outcome = finalize(&mut inner, &mut rand::rng());
        assert_eq!(outcome.eliminated, None);
        assert!(!outcome.tie);
    }

    #[test]
    fn tie_without_mayor_spares_everyone() {
        let mut inner = voting_room(&[GameRole::Villager, GameRole::Villager, GameRole::Werewolf]);
        let (a, b) = (id_at(&inner, 0), id_at(&inner, 1));
        vote(&mut inner, a, Some(b), 1);
        vote(&mut inner, b, Some(a), 2);

        let outcome = finalize(&mut inner, &mut rand::rng());
        assert!(outcome.tie);
        assert_eq!(outcome.eliminated, None);
        assert!(!outcome.decided_by_mayor);
    }

    #[test]
    fn mayor_double_vote_breaks_parity() {
        let mut inner = voting_room(&[GameRole::Villager, GameRole::Villager, GameRole::Werewolf]);
        let (mayor, b, wolf) = (id_at(&inner, 0), id_at(&inner, 1), id_at(&inner, 2));
        inner.upsert_ability(Ability {
            player_id: mayor,
            kind: AbilityType::MayorVote,
            uses_left: UNLIMITED_USES,
            max_uses: UNLIMITED_USES,
            cooldown_days: 0,
            last_used_day: None,
            metadata: None,
        });
        vote(&mut inner, mayor, Some(wolf), 1);
        vote(&mut inner, b, Some(wolf), 2);
        vote(&mut inner, wolf, Some(b), 3);

        let outcome = finalize(&mut inner, &mut rand::rng());
        // Mayor's vote counts twice: wolf has 3 against b's 1.
        assert_eq!(outcome.eliminated, Some(wolf));
        assert_eq!(outcome.counts[0].votes, 3);
    }

    #[test]
    fn mercenary_wins_on_day_one_contract() {
        let mut inner = voting_room(&[
            GameRole::Mercenary,
            GameRole::Villager,
            GameRole::Villager,
            GameRole::Werewolf,
        ]);
        inner.room.day_number = 1;
        let (merc, v1, v2) = (id_at(&inner, 0), id_at(&inner, 1), id_at(&inner, 2));

        let mut contract = Ability::from_spec(merc, GameRole::Mercenary.ability_specs()[0]);
        contract.metadata = Some(crate::services::death_pipeline::target_metadata(v1));
        inner.upsert_ability(contract);

        vote(&mut inner, merc, Some(v1), 1);
        vote(&mut inner, v2, Some(v1), 2);
        vote(&mut inner, v1, None, 3);

        let outcome = finalize(&mut inner, &mut rand::rng());
        assert_eq!(outcome.eliminated, Some(v1));
        assert_eq!(outcome.mercenary_win, Some(merc));
        assert_eq!(outcome.mercenary_converted, Some(merc));
        assert_eq!(inner.player(merc).unwrap().role, GameRole::Villager);
    }
}
