//! Role distribution and assignment at game start.

use rand::{Rng, seq::IndexedRandom, seq::SliceRandom};
use uuid::Uuid;

use crate::{
    services::death_pipeline::target_metadata,
    state::{
        RoomInner,
        room::{Ability, AbilityType, GameRole},
    },
};

use GameRole::*;

/// Role pool for a player count. Listed counts come from the curated table;
/// anything else falls back to the formula distribution.
pub fn distribution(count: usize) -> Vec<GameRole> {
    match count {
        5 => vec![Werewolf, Seer, Villager, Villager, Villager],
        6 => vec![Werewolf, Seer, Hunter, Villager, Villager, Villager],
        7 => vec![Werewolf, Seer, Witch, Hunter, Villager, Villager, Villager],
        8 => vec![
            Werewolf, Werewolf, Seer, Witch, Hunter, Villager, Villager, Villager,
        ],
        9 => vec![
            Werewolf, Werewolf, Seer, Witch, Hunter, LittleGirl, Villager, Villager, Villager,
        ],
        10 => vec![
            Werewolf, Werewolf, Seer, Witch, Hunter, Guard, LittleGirl, Villager, Villager,
            Villager,
        ],
        11 => vec![
            Werewolf, BlackWolf, Seer, Witch, Hunter, Guard, Cupid, LittleGirl, Villager,
            Villager, Villager,
        ],
        12 => vec![
            Werewolf, Werewolf, BlackWolf, Seer, Witch, Hunter, Guard, Cupid, Dictator, Villager,
            Villager, Villager,
        ],
        13 => vec![
            Werewolf, Werewolf, BlackWolf, Seer, Witch, Hunter, Guard, Cupid, LittleGirl,
            Dictator, Mercenary, Villager, Villager,
        ],
        14 => vec![
            Werewolf, Werewolf, BlackWolf, WhiteWolf, Seer, Witch, Hunter, Guard, Cupid,
            LittleGirl, Dictator, Mercenary, Villager, Villager,
        ],
        15 => vec![
            Werewolf, Werewolf, BlackWolf, WhiteWolf, TalkativeSeer, Witch, Hunter, Guard, Cupid,
            LittleGirl, Dictator, Mercenary, Heir, Plunderer, Villager,
        ],
        other => fallback_distribution(other),
    }
}

/// Formula distribution for unlisted counts: a quarter of the room are
/// wolves (at least one), the classic specials come in with size, villagers
/// fill the rest.
fn fallback_distribution(count: usize) -> Vec<GameRole> {
    let wolves = (count / 4).max(1);
    let mut pool: Vec<GameRole> = std::iter::repeat_n(Werewolf, wolves).collect();

    if count >= 5 {
        pool.push(Seer);
    }
    if count >= 7 {
        pool.push(Witch);
    }
    if count >= 9 {
        pool.push(Hunter);
    }
    if count >= 11 {
        pool.push(Guard);
    }
    if count >= 13 {
        pool.push(Cupid);
    }

    while pool.len() < count {
        pool.push(Villager);
    }
    pool.truncate(count);
    pool
}

/// Shuffle the pool (Fisher–Yates) and assign by seat order, then initialize
/// every role's abilities and pick the Mercenary's contract target.
pub fn assign_roles<R: Rng>(inner: &mut RoomInner, rng: &mut R) {
    let mut pool = distribution(inner.players.len());
    pool.shuffle(rng);

    let mut seats: Vec<Uuid> = inner.players.values().map(|p| p.id).collect();
    seats.sort_by_key(|id| inner.player(*id).map(|p| p.position).unwrap_or(u8::MAX));

    inner.abilities.clear();
    for (player_id, role) in seats.iter().zip(pool) {
        let player = inner.player_mut(*player_id).expect("seated player exists");
        player.role = role;
        for spec in role.ability_specs() {
            inner.abilities.push(Ability::from_spec(*player_id, spec));
        }
    }

    assign_mercenary_target(inner, rng);
}

/// Give an assigned Mercenary a uniformly-random non-Mercenary contract.
fn assign_mercenary_target<R: Rng>(inner: &mut RoomInner, rng: &mut R) {
    let mercenary = inner
        .players
        .values()
        .find(|p| p.role == GameRole::Mercenary)
        .map(|p| p.id);
    let Some(mercenary_id) = mercenary else {
        return;
    };

    let candidates: Vec<Uuid> = inner
        .players
        .values()
        .filter(|p| p.role != GameRole::Mercenary)
        .map(|p| p.id)
        .collect();
    let Some(target_id) = candidates.choose(rng).copied() else {
        return;
    };

    if let Some(ability) = inner.ability_mut(mercenary_id, AbilityType::MercenaryTarget) {
        ability.metadata = Some(target_metadata(target_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::{Player, Room, RoomSettings, Team};

    fn lobby(count: usize) -> RoomInner {
        let room = Room::new(
            "ROLES1".into(),
            Uuid::new_v4(),
            RoomSettings::with_defaults("assignment"),
        );
        let mut inner = RoomInner::new(room);
        for i in 0..count {
            let p = Player::new(Uuid::new_v4(), format!("p{i}"), (i + 1) as u8);
            inner.players.insert(p.id, p);
        }
        inner
    }

    #[test]
    fn every_distribution_matches_player_count() {
        for count in 5..=15 {
            let pool = distribution(count);
            assert_eq!(pool.len(), count, "pool size for {count} players");
            let wolves = pool.iter().filter(|r| r.team() == Team::Werewolves).count();
            assert!(wolves >= 1, "at least one wolf for {count} players");
            assert!(pool.contains(&Seer) || pool.contains(&TalkativeSeer));
        }
    }

    #[test]
    fn fallback_tracks_the_formula() {
        let pool = fallback_distribution(16);
        assert_eq!(pool.len(), 16);
        assert_eq!(pool.iter().filter(|r| **r == Werewolf).count(), 4);
        assert!(pool.contains(&Guard));
        assert!(pool.contains(&Cupid));
    }

    #[test]
    fn assignment_initializes_abilities() {
        let mut inner = lobby(7);
        assign_roles(&mut inner, &mut rand::rng());

        let witch = inner
            .players
            .values()
            .find(|p| p.role == Witch)
            .expect("a 7-player game has a witch");
        assert!(inner.ability(witch.id, AbilityType::WitchHeal).is_some());
        assert!(inner.ability(witch.id, AbilityType::WitchPoison).is_some());
    }

    #[test]
    fn mercenary_contract_never_names_the_mercenary() {
        for _ in 0..20 {
            let mut inner = lobby(13);
            assign_roles(&mut inner, &mut rand::rng());
            let mercenary = inner
                .players
                .values()
                .find(|p| p.role == Mercenary)
                .expect("a 13-player game has a mercenary");
            let target = inner
                .ability(mercenary.id, AbilityType::MercenaryTarget)
                .and_then(crate::services::death_pipeline::target_from_metadata)
                .expect("contract assigned");
            assert_ne!(target, mercenary.id);
            assert!(inner.player(target).is_some());
        }
    }
}
