//! End-condition checks, evaluated over the set of alive players after every
//! state-changing event.

use crate::state::room::{GameRole, Player, Team};

/// Result of a finished game: a winning team, or a draw when nobody is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    Draw,
    Winner(Team),
}

/// First matching end condition, or `None` while the game continues.
pub fn evaluate<'a>(players: impl IntoIterator<Item = &'a Player>) -> Option<GameOutcome> {
    let alive: Vec<&Player> = players.into_iter().filter(|p| p.is_alive()).collect();

    if alive.is_empty() {
        return Some(GameOutcome::Draw);
    }

    if alive.len() == 2 {
        let (a, b) = (alive[0], alive[1]);
        if a.linked_to == Some(b.id) && b.linked_to == Some(a.id) {
            return Some(GameOutcome::Winner(Team::Villagers));
        }
    }

    if alive.len() == 1 && alive[0].role == GameRole::WhiteWolf {
        return Some(GameOutcome::Winner(Team::Solo));
    }

    let wolves = alive.iter().filter(|p| p.role.is_werewolf()).count();
    let villagers = alive
        .iter()
        .filter(|p| p.role.team() == Team::Villagers)
        .count();
    let solo_alive = alive.iter().any(|p| p.role.team() == Team::Solo);

    if wolves > 0 && wolves >= villagers && !solo_alive {
        return Some(GameOutcome::Winner(Team::Werewolves));
    }

    let white_wolf_alive = alive.iter().any(|p| p.role == GameRole::WhiteWolf);
    if wolves == 0 && !white_wolf_alive {
        return Some(GameOutcome::Winner(Team::Villagers));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::PlayerState;
    use uuid::Uuid;

    fn cast(roles: &[GameRole]) -> Vec<Player> {
        roles
            .iter()
            .enumerate()
            .map(|(i, role)| {
                let mut p = Player::new(Uuid::new_v4(), format!("p{i}"), (i + 1) as u8);
                p.role = *role;
                p
            })
            .collect()
    }

    #[test]
    fn game_continues_with_mixed_teams() {
        let players = cast(&[
            GameRole::Werewolf,
            GameRole::Seer,
            GameRole::Villager,
            GameRole::Villager,
        ]);
        assert_eq!(evaluate(&players), None);
    }

    #[test]
    fn villagers_win_when_wolves_are_gone() {
        let mut players = cast(&[GameRole::Werewolf, GameRole::Seer, GameRole::Villager]);
        players[0].state = PlayerState::Dead;
        assert_eq!(evaluate(&players), Some(GameOutcome::Winner(Team::Villagers)));
    }

    #[test]
    fn wolves_win_on_parity_without_solo() {
        let players = cast(&[GameRole::Werewolf, GameRole::Villager]);
        assert_eq!(
            evaluate(&players),
            Some(GameOutcome::Winner(Team::Werewolves))
        );
    }

    #[test]
    fn solo_blocks_werewolf_parity_win() {
        let players = cast(&[GameRole::Werewolf, GameRole::Villager, GameRole::WhiteWolf]);
        assert_eq!(evaluate(&players), None);
    }

    #[test]
    fn lone_white_wolf_wins_solo() {
        let mut players = cast(&[GameRole::WhiteWolf, GameRole::Werewolf]);
        players[1].state = PlayerState::Dead;
        assert_eq!(evaluate(&players), Some(GameOutcome::Winner(Team::Solo)));
    }

    #[test]
    fn surviving_lover_pair_is_a_villager_win() {
        let mut players = cast(&[GameRole::Werewolf, GameRole::Villager, GameRole::Seer]);
        players[2].state = PlayerState::Dead;
        let (a, b) = (players[0].id, players[1].id);
        players[0].linked_to = Some(b);
        players[1].linked_to = Some(a);
        assert_eq!(evaluate(&players), Some(GameOutcome::Winner(Team::Villagers)));
    }

    #[test]
    fn empty_room_is_a_draw() {
        let mut players = cast(&[GameRole::Werewolf, GameRole::Villager]);
        for p in &mut players {
            p.state = PlayerState::Dead;
        }
        assert_eq!(evaluate(&players), Some(GameOutcome::Draw));
    }
}
