//! Message types exchanged with game clients over the WebSocket connection.
//! Both directions are JSON, tagged by a `type` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::game::{GameSnapshot, PlayerView};
use crate::state::phase::RoomPhase;
use crate::state::room::{ActionType, DeathCause, GameRole, RoomState, Team};

/// Which of the Witch's two potions a submission refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PotionKind {
    Heal,
    Poison,
}

/// Messages accepted from game clients.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Attach this connection to a room: join while waiting, re-attach after
    /// a disconnect.
    #[serde(rename = "game:join")]
    GameJoin {
        room_id: Uuid,
        /// Display name, required on first join.
        name: Option<String>,
    },
    #[serde(rename = "game:start")]
    GameStart,
    /// Request a fresh full snapshot.
    #[serde(rename = "game:state")]
    GameState,
    /// Cast or change a day vote; `None` abstains explicitly.
    #[serde(rename = "vote:cast")]
    VoteCast { target_id: Option<Uuid> },
    #[serde(rename = "action:night")]
    NightAction {
        action: ActionType,
        target_id: Option<Uuid>,
        metadata: Option<Value>,
    },
    #[serde(rename = "hunter:revenge")]
    HunterRevenge { target_id: Uuid },
    #[serde(rename = "dictator:coup")]
    DictatorCoup { target_id: Uuid },
    #[serde(rename = "cupid:link")]
    CupidLink { player1_id: Uuid, player2_id: Uuid },
    #[serde(rename = "witch:potion")]
    WitchPotion {
        potion: PotionKind,
        target_id: Option<Uuid>,
    },
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    pub fn from_json_str(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }
}

/// Per-target vote count in a running or final tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct VoteCount {
    pub target_id: Uuid,
    pub votes: u32,
}

/// One entry of the full role reveal at game end.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleReveal {
    pub player_id: Uuid,
    pub role: GameRole,
}

/// Messages pushed to game clients. Room-scoped messages go to everyone in
/// the room; player-scoped ones only to the addressed player's sockets.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename = "game:state")]
    GameState(GameSnapshot),
    PhaseChange {
        phase: RoomPhase,
        state: RoomState,
        day_number: u32,
        phase_ends_at: Option<u64>,
    },
    #[serde(rename = "player:joined")]
    PlayerJoined { player: PlayerView },
    #[serde(rename = "player:left")]
    PlayerLeft {
        player_id: Uuid,
        new_host_user_id: Option<Uuid>,
    },
    PlayerDied {
        player_id: Uuid,
        cause: DeathCause,
        role: GameRole,
    },
    PlayerSaved {
        player_id: Uuid,
    },
    VoteProtection {
        player_id: Uuid,
    },
    NightAbilityAvailable {
        action: ActionType,
    },
    FirstNightAction {
        action: ActionType,
    },
    InvestigationResult {
        target_id: Uuid,
        role: GameRole,
    },
    TalkativeSeerResult {
        target_id: Uuid,
        role: GameRole,
    },
    VotingStarted {
        ends_at: Option<u64>,
    },
    #[serde(rename = "vote:update")]
    VoteUpdate {
        tally: Vec<VoteCount>,
        voters: u32,
        alive: u32,
    },
    VoteResults {
        counts: Vec<VoteCount>,
        eliminated: Option<Uuid>,
        tie: bool,
        decided_by_mayor: bool,
    },
    BecameLover {
        partner_id: Uuid,
    },
    RoleAssigned {
        role: GameRole,
    },
    RoleChanged {
        role: GameRole,
    },
    RoleInherited {
        role: GameRole,
        from_player_id: Uuid,
    },
    RoleStolen {
        role: GameRole,
        from_player_id: Uuid,
    },
    ProtectionLost {
        reason: String,
    },
    #[serde(rename = "hunter:triggered")]
    HunterTriggered {
        expires_at: u64,
    },
    HunterRevengeCompleted {
        hunter_id: Uuid,
        target_id: Uuid,
    },
    DictatorSuccess {
        dictator_id: Uuid,
        target_id: Uuid,
    },
    DictatorFailed {
        dictator_id: Uuid,
    },
    MercenaryVictory {
        player_id: Uuid,
    },
    MercenaryReminder {
        target_id: Uuid,
    },
    GameEnded {
        winning_team: Option<Team>,
        roles: Vec<RoleReveal>,
    },
    Error {
        code: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_parse_by_tag() {
        let join: ClientMessage = ClientMessage::from_json_str(&format!(
            r#"{{"type":"game:join","room_id":"{}","name":"ada"}}"#,
            Uuid::new_v4()
        ))
        .unwrap();
        assert!(matches!(join, ClientMessage::GameJoin { .. }));

        let abstain = ClientMessage::from_json_str(r#"{"type":"vote:cast","target_id":null}"#);
        assert!(matches!(
            abstain.unwrap(),
            ClientMessage::VoteCast { target_id: None }
        ));

        let unknown = ClientMessage::from_json_str(r#"{"type":"game:fly"}"#).unwrap();
        assert!(matches!(unknown, ClientMessage::Unknown));
    }

    #[test]
    fn server_message_tags_are_snake_case() {
        let payload = serde_json::to_value(&ServerMessage::PlayerSaved {
            player_id: Uuid::new_v4(),
        })
        .unwrap();
        assert_eq!(payload["type"], "player_saved");

        let payload = serde_json::to_value(&ServerMessage::HunterTriggered { expires_at: 1 }).unwrap();
        assert_eq!(payload["type"], "hunter:triggered");
    }
}
