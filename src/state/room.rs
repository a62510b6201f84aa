use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::phase::RoomPhase;

/// Coarse lifecycle state of a room, kept consistent with [`RoomPhase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    Waiting,
    Starting,
    Night,
    Day,
    Voting,
    Ended,
    Cancelled,
}

impl RoomState {
    /// Terminal rooms release their join code for reuse.
    pub fn is_terminal(self) -> bool {
        matches!(self, RoomState::Ended | RoomState::Cancelled)
    }
}

/// The three win-condition camps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Villagers,
    Werewolves,
    Solo,
}

/// Closed set of playable roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GameRole {
    Villager,
    Werewolf,
    BlackWolf,
    WhiteWolf,
    WolfRidingHood,
    RedRidingHood,
    BlueRidingHood,
    Seer,
    TalkativeSeer,
    Witch,
    Hunter,
    Guard,
    Cupid,
    LittleGirl,
    Heir,
    Plunderer,
    Mercenary,
    Dictator,
}

impl GameRole {
    /// Camp this role wins with. The Mercenary counts as Solo until its
    /// day-one resolution converts it to a plain Villager.
    pub fn team(self) -> Team {
        match self {
            GameRole::Werewolf | GameRole::BlackWolf | GameRole::WolfRidingHood => Team::Werewolves,
            GameRole::WhiteWolf | GameRole::Mercenary => Team::Solo,
            _ => Team::Villagers,
        }
    }

    /// Member of the werewolf pack (votes on the night devour).
    pub fn is_werewolf(self) -> bool {
        matches!(
            self,
            GameRole::Werewolf | GameRole::BlackWolf | GameRole::WolfRidingHood
        )
    }

    /// Roles prompted for an action every night.
    pub fn night_capable(self) -> bool {
        matches!(
            self,
            GameRole::Werewolf
                | GameRole::BlackWolf
                | GameRole::WhiteWolf
                | GameRole::WolfRidingHood
                | GameRole::Seer
                | GameRole::TalkativeSeer
                | GameRole::Witch
                | GameRole::Guard
        )
    }

    /// Roles prompted only on the first night (Cupid's link, Heir's choice).
    pub fn first_night_only(self) -> bool {
        matches!(self, GameRole::Cupid | GameRole::Heir)
    }

    /// Consumable abilities granted when this role is assigned or inherited.
    pub fn ability_specs(self) -> Vec<AbilitySpec> {
        match self {
            GameRole::Guard => vec![AbilitySpec::unlimited(AbilityType::GuardProtect)],
            GameRole::Witch => vec![
                AbilitySpec::single(AbilityType::WitchHeal),
                AbilitySpec::single(AbilityType::WitchPoison),
            ],
            GameRole::WhiteWolf => vec![AbilitySpec {
                kind: AbilityType::WhiteWolfDevour,
                max_uses: UNLIMITED_USES,
                cooldown_days: 2,
            }],
            GameRole::BlackWolf => vec![AbilitySpec::single(AbilityType::BlackWolfConvert)],
            GameRole::Seer | GameRole::TalkativeSeer => {
                vec![AbilitySpec::unlimited(AbilityType::SeerInvestigate)]
            }
            GameRole::Heir => vec![AbilitySpec::single(AbilityType::HeirTarget)],
            GameRole::Mercenary => vec![AbilitySpec {
                kind: AbilityType::MercenaryTarget,
                max_uses: 0,
                cooldown_days: 0,
            }],
            _ => Vec::new(),
        }
    }
}

/// Sentinel for abilities without a use budget.
pub const UNLIMITED_USES: u8 = u8::MAX;

/// Template for initializing an [`Ability`] row.
#[derive(Debug, Clone, Copy)]
pub struct AbilitySpec {
    pub kind: AbilityType,
    pub max_uses: u8,
    pub cooldown_days: u32,
}

impl AbilitySpec {
    fn single(kind: AbilityType) -> Self {
        Self {
            kind,
            max_uses: 1,
            cooldown_days: 0,
        }
    }

    fn unlimited(kind: AbilityType) -> Self {
        Self {
            kind,
            max_uses: UNLIMITED_USES,
            cooldown_days: 0,
        }
    }
}

/// Per-player consumable or marker ability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AbilityType {
    GuardProtect,
    WitchHeal,
    WitchPoison,
    WhiteWolfDevour,
    BlackWolfConvert,
    SeerInvestigate,
    HeirTarget,
    MercenaryTarget,
    MayorVote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ability {
    pub player_id: Uuid,
    pub kind: AbilityType,
    pub uses_left: u8,
    pub max_uses: u8,
    pub cooldown_days: u32,
    pub last_used_day: Option<u32>,
    pub metadata: Option<Value>,
}

impl Ability {
    /// Instantiate a fresh ability from its role spec.
    pub fn from_spec(player_id: Uuid, spec: AbilitySpec) -> Self {
        Self {
            player_id,
            kind: spec.kind,
            uses_left: spec.max_uses,
            max_uses: spec.max_uses,
            cooldown_days: spec.cooldown_days,
            last_used_day: None,
            metadata: None,
        }
    }

    /// Whether the ability can be spent on `day` (uses remaining and off
    /// cooldown).
    pub fn ready(&self, day: u32) -> bool {
        if self.uses_left == 0 {
            return false;
        }
        match self.last_used_day {
            Some(last) => day.saturating_sub(last) >= self.cooldown_days,
            None => true,
        }
    }

    /// Record a consumption on `day`. Unlimited abilities track the day but
    /// never decrement.
    pub fn consume(&mut self, day: u32) {
        if self.max_uses != UNLIMITED_USES {
            self.uses_left = self.uses_left.saturating_sub(1);
        }
        self.last_used_day = Some(day);
    }
}

/// Liveness of a player. Only `Alive` players act, vote, or count toward win
/// conditions; `Disconnected` players keep their seat and return to `Alive`
/// on reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    Alive,
    Dead,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    /// Seat number, unique within the room; smallest-available on join.
    pub position: u8,
    pub role: GameRole,
    pub state: PlayerState,
    pub died_at: Option<SystemTime>,
    /// Lover bond set by Cupid; symmetric.
    pub linked_to: Option<Uuid>,
    pub is_revealed: bool,
}

impl Player {
    pub fn new(user_id: Uuid, name: String, position: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name,
            position,
            role: GameRole::Villager,
            state: PlayerState::Alive,
            died_at: None,
            linked_to: None,
            is_revealed: false,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.state == PlayerState::Alive
    }
}

/// Kinds of actions players submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    WerewolfVote,
    WhiteWolfDevour,
    BlackWolfConvert,
    WitchHeal,
    WitchPoison,
    SeerInvestigate,
    GuardProtect,
    CupidLink,
    HeirChoose,
    DayVote,
    HunterShoot,
    DictatorCoup,
}

/// Why a player died. Carried on `player_died` events and audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeathCause {
    WerewolfAttack,
    WhiteWolfDevour,
    WitchPoison,
    VotedOut,
    Grief,
    HunterRevenge,
    FailedCoup,
    CaughtSpying,
}

/// A submitted action. `(performer_id, kind, day_number, phase)` is the
/// upsert key: reversible choices (votes, potions) overwrite in place and the
/// most recent write wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameAction {
    pub room_id: Uuid,
    pub performer_id: Uuid,
    pub kind: ActionType,
    pub day_number: u32,
    pub phase: RoomPhase,
    pub target_id: Option<Uuid>,
    pub metadata: Option<Value>,
    pub result: Option<Value>,
    pub created_at: SystemTime,
}

/// Append-only audit/announcement record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEventRecord {
    pub room_id: Uuid,
    pub event_type: String,
    pub day_number: u32,
    pub data: Value,
    pub created_at: SystemTime,
}

/// Per-room settings chosen at creation, validated against the documented
/// bounds before a room is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSettings {
    pub name: String,
    pub min_players: u8,
    pub max_players: u8,
    pub is_private: bool,
    pub password: Option<String>,
    /// Seconds.
    pub night_duration: u32,
    pub day_duration: u32,
    pub vote_duration: u32,
}

impl RoomSettings {
    /// Settings with the documented defaults (night 90 s, day 180 s, vote
    /// 60 s, open room for 5–15 players).
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_players: 5,
            max_players: 15,
            is_private: false,
            password: None,
            night_duration: 90,
            day_duration: 180,
            vote_duration: 60,
        }
    }

    #[cfg(test)]
    pub(crate) fn default_for_tests() -> Self {
        Self::with_defaults("test room")
    }
}

/// Why a room reached a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Victory,
    Draw,
    HostLeft,
    Abandoned,
}

/// A game room. Unit of concurrency: all mutations run under the owning
/// handle's critical section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    /// 6-character join code, unique among non-terminal rooms.
    pub code: String,
    pub host_user_id: Uuid,
    pub state: RoomState,
    pub phase: RoomPhase,
    /// Increments only on entry into the night phase, starting at 1.
    pub day_number: u32,
    pub phase_started_at: Option<SystemTime>,
    pub phase_ends_at: Option<SystemTime>,
    pub settings: RoomSettings,
    pub winning_team: Option<Team>,
    pub end_reason: Option<EndReason>,
    pub created_at: SystemTime,
}

impl Room {
    pub fn new(code: String, host_user_id: Uuid, settings: RoomSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            host_user_id,
            state: RoomState::Waiting,
            phase: RoomPhase::Lobby,
            day_number: 0,
            phase_started_at: None,
            phase_ends_at: None,
            settings,
            winning_team: None,
            end_reason: None,
            created_at: SystemTime::now(),
        }
    }
}

/// Conditional immunity check: some deaths are prevented while a
/// condition-role is still alive elsewhere in the room.
///
/// `alive` is the current set of alive players (the target may be present in
/// it; only other players satisfy a condition).
pub fn passive_immune(alive: &[&Player], target: &Player, cause: DeathCause) -> bool {
    let condition = |role: GameRole| {
        alive
            .iter()
            .any(|p| p.id != target.id && p.role == role && p.is_alive())
    };

    match (target.role, cause) {
        (GameRole::RedRidingHood, DeathCause::WerewolfAttack) => condition(GameRole::Hunter),
        (GameRole::BlueRidingHood, DeathCause::WerewolfAttack) => condition(GameRole::Villager),
        (GameRole::WolfRidingHood, DeathCause::VotedOut) => condition(GameRole::BlackWolf),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player_with_role(role: GameRole, position: u8) -> Player {
        let mut player = Player::new(Uuid::new_v4(), format!("p{position}"), position);
        player.role = role;
        player
    }

    #[test]
    fn werewolf_team_membership() {
        assert!(GameRole::Werewolf.is_werewolf());
        assert!(GameRole::BlackWolf.is_werewolf());
        assert!(GameRole::WolfRidingHood.is_werewolf());
        assert!(!GameRole::WhiteWolf.is_werewolf());
        assert_eq!(GameRole::WhiteWolf.team(), Team::Solo);
        assert_eq!(GameRole::Mercenary.team(), Team::Solo);
        assert_eq!(GameRole::Seer.team(), Team::Villagers);
    }

    #[test]
    fn ability_cooldown_gates_readiness() {
        let mut devour = Ability::from_spec(
            Uuid::new_v4(),
            GameRole::WhiteWolf.ability_specs().pop().unwrap(),
        );
        assert!(devour.ready(1));
        devour.consume(1);
        assert!(!devour.ready(2));
        assert!(devour.ready(3));
    }

    #[test]
    fn limited_ability_decrements_to_zero() {
        let mut heal =
            Ability::from_spec(Uuid::new_v4(), GameRole::Witch.ability_specs().remove(0));
        assert_eq!(heal.uses_left, 1);
        heal.consume(1);
        assert_eq!(heal.uses_left, 0);
        assert!(!heal.ready(5));
    }

    #[test]
    fn red_riding_hood_immune_while_hunter_alive() {
        let hood = player_with_role(GameRole::RedRidingHood, 1);
        let hunter = player_with_role(GameRole::Hunter, 2);
        let alive = vec![&hood, &hunter];
        assert!(passive_immune(&alive, &hood, DeathCause::WerewolfAttack));
        assert!(!passive_immune(&alive, &hood, DeathCause::VotedOut));

        let alone = vec![&hood];
        assert!(!passive_immune(&alone, &hood, DeathCause::WerewolfAttack));
    }

    #[test]
    fn wolf_riding_hood_vote_immunity_requires_black_wolf() {
        let hood = player_with_role(GameRole::WolfRidingHood, 1);
        let black = player_with_role(GameRole::BlackWolf, 2);
        let alive = vec![&hood, &black];
        assert!(passive_immune(&alive, &hood, DeathCause::VotedOut));
        assert!(!passive_immune(&alive, &hood, DeathCause::WerewolfAttack));
    }
}
