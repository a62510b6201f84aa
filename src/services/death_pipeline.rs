//! The single entry point for killing players. Every death runs its cascade
//! triggers (Hunter revenge, lover grief, Heir and Plunderer inheritance,
//! conditional immunity lapses) over a worklist until it settles; a player
//! can die at most once, which bounds the loop.

use std::{collections::VecDeque, time::SystemTime};

use serde_json::json;
use uuid::Uuid;

use crate::state::{
    RoomInner,
    room::{AbilityType, DeathCause, GameRole, PlayerState},
};

/// One role handover performed during a cascade.
#[derive(Debug, Clone)]
pub struct Inheritance {
    pub player_id: Uuid,
    pub role: GameRole,
    pub from_player_id: Uuid,
    /// Plunderer theft rather than Heir succession.
    pub stolen: bool,
}

/// Everything a cascade produced, in commit order. The caller translates this
/// into outbound events and store writes.
#[derive(Debug, Clone, Default)]
pub struct DeathReport {
    pub deaths: Vec<(Uuid, DeathCause, GameRole)>,
    pub hunters_armed: Vec<Uuid>,
    pub inheritances: Vec<Inheritance>,
    /// `(protected player, reason)` for immunities whose condition just died.
    pub lapsed_immunities: Vec<(Uuid, String)>,
}

impl DeathReport {
    pub fn merge(&mut self, other: DeathReport) {
        self.deaths.extend(other.deaths);
        self.hunters_armed.extend(other.hunters_armed);
        self.inheritances.extend(other.inheritances);
        self.lapsed_immunities.extend(other.lapsed_immunities);
    }
}

/// Kill `seeds` and run all cascade triggers to fixpoint. Killing a player
/// who is not alive is a no-op.
pub fn kill_all(
    inner: &mut RoomInner,
    seeds: Vec<(Uuid, DeathCause)>,
    now: SystemTime,
) -> DeathReport {
    let mut report = DeathReport::default();
    let mut queue: VecDeque<(Uuid, DeathCause)> = seeds.into();

    while let Some((player_id, cause)) = queue.pop_front() {
        let Some(player) = inner.player_mut(player_id) else {
            continue;
        };
        if player.state != PlayerState::Alive {
            continue;
        }

        player.state = PlayerState::Dead;
        player.died_at = Some(now);
        player.is_revealed = true;
        let role = player.role;
        let linked_to = player.linked_to;

        report.deaths.push((player_id, cause, role));

        let first_death = !inner.first_death_recorded;
        inner.first_death_recorded = true;

        if role == GameRole::Hunter {
            report.hunters_armed.push(player_id);
        }

        if let Some(partner_id) = linked_to {
            if inner.player(partner_id).is_some_and(|p| p.is_alive()) {
                queue.push_back((partner_id, DeathCause::Grief));
            }
        }
        let grieving: Vec<Uuid> = inner
            .players
            .values()
            .filter(|p| p.is_alive() && p.linked_to == Some(player_id))
            .map(|p| p.id)
            .collect();
        for partner_id in grieving {
            queue.push_back((partner_id, DeathCause::Grief));
        }

        if let Some(heir_id) = find_heir(inner, player_id) {
            inner.player_mut(heir_id).expect("heir exists").role = role;
            inner.reset_abilities_for_role(heir_id, role);
            report.inheritances.push(Inheritance {
                player_id: heir_id,
                role,
                from_player_id: player_id,
                stolen: false,
            });
        }

        if first_death {
            let plunderer = inner
                .players
                .values()
                .find(|p| p.is_alive() && p.role == GameRole::Plunderer)
                .map(|p| p.id);
            if let Some(plunderer_id) = plunderer {
                inner.player_mut(plunderer_id).expect("plunderer exists").role = role;
                inner.reset_abilities_for_role(plunderer_id, role);
                report.inheritances.push(Inheritance {
                    player_id: plunderer_id,
                    role,
                    from_player_id: player_id,
                    stolen: true,
                });
            }
        }

        lapse_immunities(inner, role, &mut report);
    }

    report
}

/// Alive Heir whose designated testator is the deceased.
fn find_heir(inner: &RoomInner, deceased_id: Uuid) -> Option<Uuid> {
    inner
        .players
        .values()
        .filter(|p| p.is_alive() && p.role == GameRole::Heir)
        .find(|p| {
            inner
                .ability(p.id, AbilityType::HeirTarget)
                .and_then(target_from_metadata)
                == Some(deceased_id)
        })
        .map(|p| p.id)
}

pub fn target_from_metadata(ability: &crate::state::room::Ability) -> Option<Uuid> {
    ability
        .metadata
        .as_ref()
        .and_then(|m| m.get("target_id"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
}

fn lapse_immunities(inner: &RoomInner, deceased_role: GameRole, report: &mut DeathReport) {
    let notify =
        |inner: &RoomInner, protected_role: GameRole, reason: &str, report: &mut DeathReport| {
            for p in inner.players.values() {
                if p.is_alive() && p.role == protected_role {
                    report
                        .lapsed_immunities
                        .push((p.id, reason.to_owned()));
                }
            }
        };

    match deceased_role {
        GameRole::BlackWolf => {
            notify(inner, GameRole::WolfRidingHood, "black_wolf_died", report);
        }
        GameRole::Hunter => {
            notify(inner, GameRole::RedRidingHood, "hunter_died", report);
        }
        GameRole::Villager => {
            let villagers_left = inner
                .players
                .values()
                .any(|p| p.is_alive() && p.role == GameRole::Villager);
            if !villagers_left {
                notify(inner, GameRole::BlueRidingHood, "last_villager_died", report);
            }
        }
        _ => {}
    }
}

/// Metadata value storing an heir or mercenary target.
pub fn target_metadata(target_id: Uuid) -> serde_json::Value {
    json!({ "target_id": target_id.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::{Ability, Player, Room, RoomSettings};

    fn room_with(roles: &[GameRole]) -> RoomInner {
        let room = Room::new(
            "TEST01".into(),
            Uuid::new_v4(),
            RoomSettings::with_defaults("cascade"),
        );
        let mut inner = RoomInner::new(room);
        for (i, role) in roles.iter().enumerate() {
            let mut p = Player::new(Uuid::new_v4(), format!("p{i}"), (i + 1) as u8);
            p.role = *role;
            inner.players.insert(p.id, p);
        }
        inner
    }

    fn id_at(inner: &RoomInner, index: usize) -> Uuid {
        *inner.players.get_index(index).unwrap().0
    }

    #[test]
    fn double_kill_is_a_noop() {
        let mut inner = room_with(&[GameRole::Villager, GameRole::Werewolf]);
        let victim = id_at(&inner, 0);

        let first = kill_all(&mut inner, vec![(victim, DeathCause::WerewolfAttack)], SystemTime::now());
        assert_eq!(first.deaths.len(), 1);

        let second = kill_all(&mut inner, vec![(victim, DeathCause::VotedOut)], SystemTime::now());
        assert!(second.deaths.is_empty());
    }

    #[test]
    fn lover_grief_cascades_both_directions() {
        let mut inner = room_with(&[GameRole::Villager, GameRole::Seer, GameRole::Werewolf]);
        let (a, b) = (id_at(&inner, 0), id_at(&inner, 1));
        inner.player_mut(a).unwrap().linked_to = Some(b);
        inner.player_mut(b).unwrap().linked_to = Some(a);

        let report = kill_all(&mut inner, vec![(a, DeathCause::WerewolfAttack)], SystemTime::now());
        assert_eq!(report.deaths.len(), 2);
        assert_eq!(report.deaths[0].0, a);
        assert_eq!(report.deaths[1], (b, DeathCause::Grief, GameRole::Seer));
    }

    #[test]
    fn hunter_death_arms_revenge() {
        let mut inner = room_with(&[GameRole::Hunter, GameRole::Werewolf]);
        let hunter = id_at(&inner, 0);

        let report = kill_all(&mut inner, vec![(hunter, DeathCause::VotedOut)], SystemTime::now());
        assert_eq!(report.hunters_armed, vec![hunter]);
    }

    #[test]
    fn heir_inherits_role_with_fresh_abilities() {
        let mut inner = room_with(&[GameRole::Witch, GameRole::Heir, GameRole::Werewolf]);
        let (witch, heir) = (id_at(&inner, 0), id_at(&inner, 1));

        let mut designation = Ability::from_spec(heir, GameRole::Heir.ability_specs()[0]);
        designation.metadata = Some(target_metadata(witch));
        inner.upsert_ability(designation);

        let report = kill_all(&mut inner, vec![(witch, DeathCause::WerewolfAttack)], SystemTime::now());
        assert_eq!(report.inheritances.len(), 1);
        assert!(!report.inheritances[0].stolen);
        assert_eq!(inner.player(heir).unwrap().role, GameRole::Witch);
        assert!(inner.ability(heir, AbilityType::WitchHeal).is_some());
        assert!(inner.ability(heir, AbilityType::WitchPoison).is_some());
        assert!(inner.ability(heir, AbilityType::HeirTarget).is_none());
    }

    #[test]
    fn plunderer_takes_first_deceased_role_only_once() {
        let mut inner = room_with(&[
            GameRole::Seer,
            GameRole::Plunderer,
            GameRole::Villager,
            GameRole::Werewolf,
        ]);
        let (seer, plunderer, villager) = (id_at(&inner, 0), id_at(&inner, 1), id_at(&inner, 2));

        let report = kill_all(&mut inner, vec![(seer, DeathCause::WerewolfAttack)], SystemTime::now());
        assert_eq!(report.inheritances.len(), 1);
        assert!(report.inheritances[0].stolen);
        assert_eq!(inner.player(plunderer).unwrap().role, GameRole::Seer);

        // Second death no longer triggers the theft.
        let report = kill_all(&mut inner, vec![(villager, DeathCause::VotedOut)], SystemTime::now());
        assert!(report.inheritances.is_empty());
    }

    #[test]
    fn immunity_lapse_notifies_protected_player() {
        let mut inner = room_with(&[
            GameRole::Hunter,
            GameRole::RedRidingHood,
            GameRole::Werewolf,
        ]);
        let (hunter, hood) = (id_at(&inner, 0), id_at(&inner, 1));

        let report = kill_all(&mut inner, vec![(hunter, DeathCause::WerewolfAttack)], SystemTime::now());
        assert!(report
            .lapsed_immunities
            .iter()
            .any(|(id, reason)| *id == hood && reason == "hunter_died"));
    }
}
