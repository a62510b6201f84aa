use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::state::room::{RoomSettings, RoomState};

/// Fixed length of the role-assignment interlude between lobby and first night.
pub const ROLE_ASSIGNMENT_DURATION: Duration = Duration::from_secs(5);

/// Gameplay phases a room cycles through.
///
/// The normal cycle after the lobby is
/// `RoleAssignment -> NightPhase -> DayDiscussion -> DayVoting -> NightPhase -> ...`,
/// with any phase able to short-circuit into `GameEnd` once a win condition
/// holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoomPhase {
    Lobby,
    RoleAssignment,
    NightPhase,
    DayDiscussion,
    DayVoting,
    GameEnd,
}

impl RoomPhase {
    /// Coarse room state coupled to this phase.
    pub fn room_state(self) -> RoomState {
        match self {
            RoomPhase::Lobby => RoomState::Waiting,
            RoomPhase::RoleAssignment => RoomState::Starting,
            RoomPhase::NightPhase => RoomState::Night,
            RoomPhase::DayDiscussion => RoomState::Day,
            RoomPhase::DayVoting => RoomState::Voting,
            RoomPhase::GameEnd => RoomState::Ended,
        }
    }

    /// Whether entering this phase arms a phase-expiry timer.
    pub fn is_timed(self) -> bool {
        !matches!(self, RoomPhase::Lobby | RoomPhase::GameEnd)
    }

    /// Timer duration for this phase given the room settings.
    pub fn duration(self, settings: &RoomSettings) -> Option<Duration> {
        match self {
            RoomPhase::Lobby | RoomPhase::GameEnd => None,
            RoomPhase::RoleAssignment => Some(ROLE_ASSIGNMENT_DURATION),
            RoomPhase::NightPhase => Some(Duration::from_secs(settings.night_duration.into())),
            RoomPhase::DayDiscussion => Some(Duration::from_secs(settings.day_duration.into())),
            RoomPhase::DayVoting => Some(Duration::from_secs(settings.vote_duration.into())),
        }
    }

    /// Successor in the normal cycle. `GameEnd` is terminal.
    pub fn next(self) -> Option<RoomPhase> {
        match self {
            RoomPhase::Lobby => Some(RoomPhase::RoleAssignment),
            RoomPhase::RoleAssignment => Some(RoomPhase::NightPhase),
            RoomPhase::NightPhase => Some(RoomPhase::DayDiscussion),
            RoomPhase::DayDiscussion => Some(RoomPhase::DayVoting),
            RoomPhase::DayVoting => Some(RoomPhase::NightPhase),
            RoomPhase::GameEnd => None,
        }
    }
}

/// Error returned when a requested phase change is not a legal edge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: cannot move from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: RoomPhase,
    pub to: RoomPhase,
}

/// Validate a phase edge: the normal cycle, or a short-circuit into `GameEnd`
/// from any non-terminal phase.
pub fn check_transition(from: RoomPhase, to: RoomPhase) -> Result<(), InvalidTransition> {
    if from != RoomPhase::GameEnd && to == RoomPhase::GameEnd {
        return Ok(());
    }

    if from.next() == Some(to) {
        return Ok(());
    }

    Err(InvalidTransition { from, to })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::RoomSettings;

    #[test]
    fn state_phase_coupling_is_exhaustive() {
        assert_eq!(RoomPhase::Lobby.room_state(), RoomState::Waiting);
        assert_eq!(RoomPhase::RoleAssignment.room_state(), RoomState::Starting);
        assert_eq!(RoomPhase::NightPhase.room_state(), RoomState::Night);
        assert_eq!(RoomPhase::DayDiscussion.room_state(), RoomState::Day);
        assert_eq!(RoomPhase::DayVoting.room_state(), RoomState::Voting);
        assert_eq!(RoomPhase::GameEnd.room_state(), RoomState::Ended);
    }

    #[test]
    fn normal_cycle_loops_through_night() {
        let mut phase = RoomPhase::Lobby;
        let expected = [
            RoomPhase::RoleAssignment,
            RoomPhase::NightPhase,
            RoomPhase::DayDiscussion,
            RoomPhase::DayVoting,
            RoomPhase::NightPhase,
        ];
        for want in expected {
            phase = phase.next().unwrap();
            assert_eq!(phase, want);
        }
    }

    #[test]
    fn untimed_phases_have_no_duration() {
        let settings = RoomSettings::default_for_tests();
        assert_eq!(RoomPhase::Lobby.duration(&settings), None);
        assert_eq!(RoomPhase::GameEnd.duration(&settings), None);
        assert!(!RoomPhase::Lobby.is_timed());
        assert!(!RoomPhase::GameEnd.is_timed());
    }

    #[test]
    fn timed_phases_use_room_settings() {
        let settings = RoomSettings::default_for_tests();
        assert_eq!(
            RoomPhase::NightPhase.duration(&settings),
            Some(Duration::from_secs(settings.night_duration.into()))
        );
        assert_eq!(
            RoomPhase::DayVoting.duration(&settings),
            Some(Duration::from_secs(settings.vote_duration.into()))
        );
        assert_eq!(
            RoomPhase::RoleAssignment.duration(&settings),
            Some(ROLE_ASSIGNMENT_DURATION)
        );
    }

    #[test]
    fn game_end_reachable_from_any_phase() {
        for from in [
            RoomPhase::RoleAssignment,
            RoomPhase::NightPhase,
            RoomPhase::DayDiscussion,
            RoomPhase::DayVoting,
        ] {
            assert!(check_transition(from, RoomPhase::GameEnd).is_ok());
        }
        assert!(check_transition(RoomPhase::GameEnd, RoomPhase::GameEnd).is_err());
    }

    #[test]
    fn skipping_phases_is_rejected() {
        let err = check_transition(RoomPhase::NightPhase, RoomPhase::DayVoting).unwrap_err();
        assert_eq!(err.from, RoomPhase::NightPhase);
        assert_eq!(err.to, RoomPhase::DayVoting);
        assert!(check_transition(RoomPhase::GameEnd, RoomPhase::NightPhase).is_err());
    }
}
