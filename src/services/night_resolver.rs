//! Priority-ordered resolution of the night's secret actions. The resolver is
//! a pure function over the room state: re-running it over the same committed
//! action set and ability state yields the same outcome, which is what makes
//! a crashed night transition safely re-runnable.

use std::collections::{HashMap, HashSet};

use serde_json::json;
use uuid::Uuid;

use crate::state::{
    RoomInner,
    phase::RoomPhase,
    room::{Ability, AbilityType, ActionType, DeathCause, GameRole, passive_immune},
};

/// One Seer reading. `public` readings are re-announced at day start.
#[derive(Debug, Clone, PartialEq)]
pub struct Investigation {
    pub seer_id: Uuid,
    pub target_id: Uuid,
    pub role: GameRole,
    pub public: bool,
}

/// Everything one night resolves into. Deaths are final (protection and
/// passive immunities already applied); ability rows carry their decrements
/// and cooldown stamps and must be committed atomically with the rest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NightOutcome {
    pub deaths: Vec<(Uuid, DeathCause)>,
    pub saves: Vec<(Uuid, DeathCause)>,
    pub lovers: Option<(Uuid, Uuid)>,
    pub heir_choice: Option<(Uuid, Uuid)>,
    /// Pack victim converted by the Black Wolf instead of dying.
    pub conversion: Option<Uuid>,
    pub investigations: Vec<Investigation>,
    pub ability_updates: Vec<Ability>,
}

/// Resolve the night actions of the room's current day.
pub fn resolve(inner: &RoomInner) -> NightOutcome {
    let day = inner.room.day_number;
    let actions: Vec<_> = inner
        .actions_for(day, RoomPhase::NightPhase)
        .into_iter()
        .cloned()
        .collect();

    let mut out = NightOutcome::default();
    let mut touched: Vec<Ability> = Vec::new();
    let mut protected: HashSet<Uuid> = HashSet::new();
    let mut pending: Vec<(Uuid, DeathCause)> = Vec::new();

    let alive = |id: Uuid| inner.player(id).is_some_and(|p| p.is_alive());
    let role_of = |id: Uuid| inner.player(id).map(|p| p.role);

    // 1. Guard protection.
    for action in actions.iter().filter(|a| a.kind == ActionType::GuardProtect) {
        let Some(target) = action.target_id else {
            continue;
        };
        if !alive(action.performer_id) || role_of(action.performer_id) != Some(GameRole::Guard) {
            continue;
        }
        protected.insert(target);
        if let Some(ability) = ability_entry(
            &mut touched,
            inner,
            action.performer_id,
            AbilityType::GuardProtect,
        ) {
            ability.metadata = Some(json!({ "last_target": target.to_string() }));
            ability.consume(day);
        }
    }

    // 2. Cupid's link, first night only.
    if day == 1 {
        for action in actions.iter().filter(|a| a.kind == ActionType::CupidLink) {
            if !alive(action.performer_id) || role_of(action.performer_id) != Some(GameRole::Cupid)
            {
                continue;
            }
            let Some((first, second)) = link_targets(action.metadata.as_ref()) else {
                continue;
            };
            if first != second && alive(first) && alive(second) {
                out.lovers = Some((first, second));
            }
        }
    }

    // 3. Heir designation, first night only.
    if day == 1 {
        for action in actions.iter().filter(|a| a.kind == ActionType::HeirChoose) {
            let Some(target) = action.target_id else {
                continue;
            };
            if !alive(action.performer_id) || role_of(action.performer_id) != Some(GameRole::Heir) {
                continue;
            }
            if alive(target) && target != action.performer_id {
                if let Some(ability) = ability_entry(
                    &mut touched,
                    inner,
                    action.performer_id,
                    AbilityType::HeirTarget,
                ) {
                    ability.metadata = Some(json!({ "target_id": target.to_string() }));
                }
                out.heir_choice = Some((action.performer_id, target));
            }
        }
    }

    // 4. Werewolf pack vote; ties broken by lowest seat number.
    let mut pack_votes: HashMap<Uuid, u32> = HashMap::new();
    for action in actions.iter().filter(|a| a.kind == ActionType::WerewolfVote) {
        let Some(target) = action.target_id else {
            continue;
        };
        let is_pack = role_of(action.performer_id).is_some_and(GameRole::is_werewolf);
        if alive(action.performer_id) && is_pack && alive(target) {
            *pack_votes.entry(target).or_default() += 1;
        }
    }
    let mut pack_target = pack_choice(inner, &pack_votes);

    // 5. White Wolf devour, gated on its two-night cooldown.
    for action in actions
        .iter()
        .filter(|a| a.kind == ActionType::WhiteWolfDevour)
    {
        let Some(target) = action.target_id else {
            continue;
        };
        if !alive(action.performer_id)
            || role_of(action.performer_id) != Some(GameRole::WhiteWolf)
            || !alive(target)
        {
            continue;
        }
        let Some(ability) = ability_entry(
            &mut touched,
            inner,
            action.performer_id,
            AbilityType::WhiteWolfDevour,
        ) else {
            continue;
        };
        if !ability.ready(day) {
            continue;
        }
        ability.consume(day);
        pending.push((target, DeathCause::WhiteWolfDevour));
    }

    // 6. Black Wolf conversion: only effective against the pack's own victim,
    // and only then is a use consumed.
    for action in actions
        .iter()
        .filter(|a| a.kind == ActionType::BlackWolfConvert)
    {
        let Some(target) = action.target_id else {
            continue;
        };
        if !alive(action.performer_id) || role_of(action.performer_id) != Some(GameRole::BlackWolf)
        {
            continue;
        }
        if pack_target != Some(target) {
            continue;
        }
        let Some(ability) = ability_entry(
            &mut touched,
            inner,
            action.performer_id,
            AbilityType::BlackWolfConvert,
        ) else {
            continue;
        };
        if !ability.ready(day) {
            continue;
        }
        ability.consume(day);
        pack_target = None;
        out.conversion = Some(target);
    }

    // 7. Witch heal: only effective on the pack's victim.
    for action in actions.iter().filter(|a| a.kind == ActionType::WitchHeal) {
        let Some(target) = action.target_id else {
            continue;
        };
        if !alive(action.performer_id) || role_of(action.performer_id) != Some(GameRole::Witch) {
            continue;
        }
        if pack_target != Some(target) {
            continue;
        }
        let Some(ability) =
            ability_entry(&mut touched, inner, action.performer_id, AbilityType::WitchHeal)
        else {
            continue;
        };
        if !ability.ready(day) {
            continue;
        }
        ability.consume(day);
        protected.insert(target);
    }

    // 8. Witch poison.
    for action in actions.iter().filter(|a| a.kind == ActionType::WitchPoison) {
        let Some(target) = action.target_id else {
            continue;
        };
        if !alive(action.performer_id)
            || role_of(action.performer_id) != Some(GameRole::Witch)
            || !alive(target)
        {
            continue;
        }
        let Some(ability) = ability_entry(
            &mut touched,
            inner,
            action.performer_id,
            AbilityType::WitchPoison,
        ) else {
            continue;
        };
        if !ability.ready(day) {
            continue;
        }
        ability.consume(day);
        pending.push((target, DeathCause::WitchPoison));
    }

    // 9. Investigations.
    for action in actions
        .iter()
        .filter(|a| a.kind == ActionType::SeerInvestigate)
    {
        let Some(target) = action.target_id else {
            continue;
        };
        let seer_role = role_of(action.performer_id);
        let is_seer = matches!(seer_role, Some(GameRole::Seer | GameRole::TalkativeSeer));
        if !alive(action.performer_id) || !is_seer {
            continue;
        }
        let Some(target_player) = inner.player(target) else {
            continue;
        };
        out.investigations.push(Investigation {
            seer_id: action.performer_id,
            target_id: target,
            role: target_player.role,
            public: seer_role == Some(GameRole::TalkativeSeer),
        });
    }

    // Commit: apply protection and passive immunities to the pending deaths.
    let mut all_pending = Vec::new();
    if let Some(target) = pack_target {
        all_pending.push((target, DeathCause::WerewolfAttack));
    }
    all_pending.extend(pending);

    let alive_players = inner.alive_players();
    let mut decided: HashSet<Uuid> = HashSet::new();
    for (player_id, cause) in all_pending {
        if !decided.insert(player_id) {
            continue;
        }
        let Some(player) = inner.player(player_id) else {
            continue;
        };
        if protected.contains(&player_id) || passive_immune(&alive_players, player, cause) {
            out.saves.push((player_id, cause));
        } else {
            out.deaths.push((player_id, cause));
        }
    }

    out.ability_updates = touched;
    out
}

/// Pack choice from the vote tally: most votes, lowest position on ties.
fn pack_choice(inner: &RoomInner, votes: &HashMap<Uuid, u32>) -> Option<Uuid> {
    votes
        .iter()
        .max_by_key(|&(&target, &count)| {
            let position = inner.player(target).map(|p| p.position).unwrap_or(u8::MAX);
            // Higher count wins; among equals the smaller position does.
            (count, std::cmp::Reverse(position))
        })
        .map(|(&target, _)| target)
}

fn link_targets(metadata: Option<&serde_json::Value>) -> Option<(Uuid, Uuid)> {
    let metadata = metadata?;
    let first = metadata.get("player1_id")?.as_str()?.parse().ok()?;
    let second = metadata.get("player2_id")?.as_str()?.parse().ok()?;
    Some((first, second))
}

/// Ability row scratch space: first touch clones from the room, later steps
/// see earlier decrements.
fn ability_entry<'a>(
    touched: &'a mut Vec<Ability>,
    inner: &RoomInner,
    player_id: Uuid,
    kind: AbilityType,
) -> Option<&'a mut Ability> {
    let position = match touched
        .iter()
        .position(|a| a.player_id == player_id && a.kind == kind)
    {
        Some(position) => position,
        None => {
            let ability = inner.ability(player_id, kind)?.clone();
            touched.push(ability);
            touched.len() - 1
        }
    };
    Some(&mut touched[position])
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::state::room::{GameAction, Player, Room, RoomSettings};

    struct Fixture {
        inner: RoomInner,
        clock: SystemTime,
    }

    impl Fixture {
        fn new(roles: &[GameRole]) -> Self {
            let mut room = Room::new(
                "NIGHT1".into(),
                Uuid::new_v4(),
                RoomSettings::with_defaults("resolver"),
            );
            room.day_number = 1;
            room.phase = RoomPhase::NightPhase;
            let mut inner = RoomInner::new(room);
            for (i, role) in roles.iter().enumerate() {
                let mut p = Player::new(Uuid::new_v4(), format!("p{i}"), (i + 1) as u8);
                p.role = *role;
                for spec in role.ability_specs() {
                    inner.abilities.push(Ability::from_spec(p.id, spec));
                }
                inner.players.insert(p.id, p);
            }
            Self {
                inner,
                clock: SystemTime::now(),
            }
        }

        fn id_at(&self, index: usize) -> Uuid {
            *self.inner.players.get_index(index).unwrap().0
        }

        fn submit(&mut self, performer: Uuid, kind: ActionType, target: Option<Uuid>) {
            self.submit_with(performer, kind, target, None);
        }

        fn submit_with(
            &mut self,
            performer: Uuid,
            kind: ActionType,
            target: Option<Uuid>,
            metadata: Option<serde_json::Value>,
        ) {
            self.clock += Duration::from_millis(10);
            let action = GameAction {
                room_id: self.inner.room.id,
                performer_id: performer,
                kind,
                day_number: self.inner.room.day_number,
                phase: RoomPhase::NightPhase,
                target_id: target,
                metadata,
                result: None,
                created_at: self.clock,
            };
            self.inner.upsert_action(action);
        }
    }

    #[test]
    fn pack_vote_kills_plurality_target() {
        let mut fx = Fixture::new(&[
            GameRole::Werewolf,
            GameRole::Werewolf,
            GameRole::Villager,
            GameRole::Villager,
        ]);
        let (w1, w2, v1, v2) = (fx.id_at(0), fx.id_at(1), fx.id_at(2), fx.id_at(3));
        fx.submit(w1, ActionType::WerewolfVote, Some(v1));
        fx.submit(w2, ActionType::WerewolfVote, Some(v1));
        let _ = v2;

        let outcome = resolve(&fx.inner);
        assert_eq!(outcome.deaths, vec![(v1, DeathCause::WerewolfAttack)]);
    }

    #[test]
    fn pack_tie_breaks_on_lowest_position() {
        let mut fx = Fixture::new(&[
            GameRole::Werewolf,
            GameRole::Werewolf,
            GameRole::Villager,
            GameRole::Villager,
        ]);
        let (w1, w2, v1, v2) = (fx.id_at(0), fx.id_at(1), fx.id_at(2), fx.id_at(3));
        fx.submit(w1, ActionType::WerewolfVote, Some(v2));
        fx.submit(w2, ActionType::WerewolfVote, Some(v1));

        let outcome = resolve(&fx.inner);
        // v1 sits at position 3, v2 at position 4.
        assert_eq!(outcome.deaths, vec![(v1, DeathCause::WerewolfAttack)]);
    }

    #[test]
    fn guard_protection_saves_the_pack_target() {
        let mut fx = Fixture::new(&[GameRole::Werewolf, GameRole::Guard, GameRole::Villager]);
        let (wolf, guard, victim) = (fx.id_at(0), fx.id_at(1), fx.id_at(2));
        fx.submit(guard, ActionType::GuardProtect, Some(victim));
        fx.submit(wolf, ActionType::WerewolfVote, Some(victim));

        let outcome = resolve(&fx.inner);
        assert!(outcome.deaths.is_empty());
        assert_eq!(outcome.saves, vec![(victim, DeathCause::WerewolfAttack)]);
    }

    #[test]
    fn witch_heal_only_matches_pack_target() {
        let mut fx = Fixture::new(&[GameRole::Werewolf, GameRole::Witch, GameRole::Villager]);
        let (wolf, witch, victim) = (fx.id_at(0), fx.id_at(1), fx.id_at(2));
        fx.submit(wolf, ActionType::WerewolfVote, Some(victim));
        // Heal aimed at the witch herself, not the victim: no effect, no use.
        fx.submit(witch, ActionType::WitchHeal, Some(witch));

        let outcome = resolve(&fx.inner);
        assert_eq!(outcome.deaths, vec![(victim, DeathCause::WerewolfAttack)]);
        assert!(outcome.ability_updates.is_empty());
    }

    #[test]
    fn witch_heal_on_pack_target_consumes_the_potion() {
        let mut fx = Fixture::new(&[GameRole::Werewolf, GameRole::Witch, GameRole::Villager]);
        let (wolf, witch, victim) = (fx.id_at(0), fx.id_at(1), fx.id_at(2));
        fx.submit(wolf, ActionType::WerewolfVote, Some(victim));
        fx.submit(witch, ActionType::WitchHeal, Some(victim));

        let outcome = resolve(&fx.inner);
        assert!(outcome.deaths.is_empty());
        assert_eq!(outcome.saves, vec![(victim, DeathCause::WerewolfAttack)]);
        let heal = outcome
            .ability_updates
            .iter()
            .find(|a| a.kind == AbilityType::WitchHeal)
            .unwrap();
        assert_eq!(heal.uses_left, 0);
    }

    #[test]
    fn black_wolf_converts_pack_victim_instead_of_killing() {
        let mut fx = Fixture::new(&[GameRole::BlackWolf, GameRole::Werewolf, GameRole::Villager]);
        let (black, wolf, victim) = (fx.id_at(0), fx.id_at(1), fx.id_at(2));
        fx.submit(black, ActionType::WerewolfVote, Some(victim));
        fx.submit(wolf, ActionType::WerewolfVote, Some(victim));
        fx.submit(black, ActionType::BlackWolfConvert, Some(victim));

        let outcome = resolve(&fx.inner);
        assert!(outcome.deaths.is_empty());
        assert_eq!(outcome.conversion, Some(victim));
        let convert = outcome
            .ability_updates
            .iter()
            .find(|a| a.kind == AbilityType::BlackWolfConvert)
            .unwrap();
        assert_eq!(convert.uses_left, 0);
    }

    #[test]
    fn black_wolf_convert_misses_non_pack_target() {
        let mut fx = Fixture::new(&[
            GameRole::BlackWolf,
            GameRole::Werewolf,
            GameRole::Villager,
            GameRole::Villager,
        ]);
        let (black, wolf, v1, v2) = (fx.id_at(0), fx.id_at(1), fx.id_at(2), fx.id_at(3));
        fx.submit(black, ActionType::WerewolfVote, Some(v1));
        fx.submit(wolf, ActionType::WerewolfVote, Some(v1));
        fx.submit(black, ActionType::BlackWolfConvert, Some(v2));

        let outcome = resolve(&fx.inner);
        assert_eq!(outcome.deaths, vec![(v1, DeathCause::WerewolfAttack)]);
        assert_eq!(outcome.conversion, None);
        // The miss must not burn the single conversion charge.
        assert!(outcome
            .ability_updates
            .iter()
            .all(|a| a.kind != AbilityType::BlackWolfConvert));
    }

    #[test]
    fn white_wolf_devour_respects_cooldown() {
        let mut fx = Fixture::new(&[GameRole::WhiteWolf, GameRole::Villager, GameRole::Villager]);
        let (white, v1) = (fx.id_at(0), fx.id_at(1));
        fx.inner
            .ability_mut(white, AbilityType::WhiteWolfDevour)
            .unwrap()
            .last_used_day = Some(1);
        fx.inner.room.day_number = 2;
        fx.submit(white, ActionType::WhiteWolfDevour, Some(v1));

        let outcome = resolve(&fx.inner);
        assert!(outcome.deaths.is_empty());

        fx.inner.room.day_number = 3;
        fx.inner.purge_actions(2, RoomPhase::NightPhase);
        fx.submit(white, ActionType::WhiteWolfDevour, Some(v1));
        let outcome = resolve(&fx.inner);
        assert_eq!(outcome.deaths, vec![(v1, DeathCause::WhiteWolfDevour)]);
    }

    #[test]
    fn cupid_link_and_investigation_resolve_on_day_one() {
        let mut fx = Fixture::new(&[
            GameRole::Cupid,
            GameRole::Seer,
            GameRole::Villager,
            GameRole::Werewolf,
        ]);
        let (cupid, seer, villager, wolf) = (fx.id_at(0), fx.id_at(1), fx.id_at(2), fx.id_at(3));
        fx.submit_with(
            cupid,
            ActionType::CupidLink,
            None,
            Some(serde_json::json!({
                "player1_id": villager.to_string(),
                "player2_id": wolf.to_string(),
            })),
        );
        fx.submit(seer, ActionType::SeerInvestigate, Some(wolf));

        let outcome = resolve(&fx.inner);
        assert_eq!(outcome.lovers, Some((villager, wolf)));
        assert_eq!(outcome.investigations.len(), 1);
        assert_eq!(outcome.investigations[0].role, GameRole::Werewolf);
        assert!(!outcome.investigations[0].public);
    }

    #[test]
    fn rerun_over_same_actions_is_idempotent() {
        let mut fx = Fixture::new(&[
            GameRole::Werewolf,
            GameRole::Witch,
            GameRole::Guard,
            GameRole::Villager,
            GameRole::Villager,
        ]);
        let (wolf, witch, guard, v1, v2) =
            (fx.id_at(0), fx.id_at(1), fx.id_at(2), fx.id_at(3), fx.id_at(4));
        fx.submit(guard, ActionType::GuardProtect, Some(v2));
        fx.submit(wolf, ActionType::WerewolfVote, Some(v1));
        fx.submit(witch, ActionType::WitchPoison, Some(v2));

        let first = resolve(&fx.inner);
        let second = resolve(&fx.inner);
        assert_eq!(first, second);
        assert_eq!(first.deaths, vec![(v1, DeathCause::WerewolfAttack)]);
        assert_eq!(first.saves, vec![(v2, DeathCause::WitchPoison)]);
    }
}
