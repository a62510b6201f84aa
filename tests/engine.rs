//! End-to-end engine tests: whole games driven through the service layer on
//! the in-memory store, with phase transitions invoked the way the timer
//! dispatcher invokes them.

use std::sync::Arc;

use uuid::Uuid;

use werewolf_back::{
    config::AppConfig,
    dao::room_store::{RoomStore, memory::MemoryRoomStore},
    dto::game::CreateRoomRequest,
    error::ServiceError,
    services::{action_service, phase_service, room_service, vote_service},
    state::{AppState, RoomHandle, SharedState},
    state::{
        phase::RoomPhase,
        room::{ActionType, GameRole, PlayerState, RoomState, Team},
    },
};

struct TestGame {
    state: SharedState,
    store: MemoryRoomStore,
    handle: Arc<RoomHandle>,
    /// `(player_id, user_id)` by join order.
    seats: Vec<(Uuid, Uuid)>,
}

async fn setup_game(roles: &[GameRole]) -> TestGame {
    let mut config = AppConfig::default();
    // Keep the Little Girl's gamble out of deterministic scenarios.
    config.little_girl_catch_probability = 0.0;
    let state = AppState::new(config);

    let store = MemoryRoomStore::new();
    state.install_game_store(Arc::new(store.clone())).await;

    let host_user = Uuid::new_v4();
    let summary = room_service::create_room(
        &state,
        host_user,
        CreateRoomRequest {
            name: "scenario".into(),
            min_players: 5,
            max_players: 15,
            is_private: false,
            password: None,
            night_duration: 90,
            day_duration: 180,
            vote_duration: 60,
        },
    )
    .await
    .expect("room created");

    let handle = state.room(summary.id).expect("room registered");
    let mut seats = Vec::new();
    {
        let mut inner = handle.lock().await;
        for (i, _role) in roles.iter().enumerate() {
            let user_id = if i == 0 { host_user } else { Uuid::new_v4() };
            let player_id = room_service::join_room(&state, &mut inner, user_id, Some(format!("p{i}")))
                .await
                .expect("joined");
            seats.push((player_id, user_id));
        }

        // Pin the cast instead of rolling the random distribution.
        for ((player_id, _), role) in seats.iter().zip(roles) {
            inner.player_mut(*player_id).unwrap().role = *role;
        }
        let assignments: Vec<(Uuid, GameRole)> = seats
            .iter()
            .zip(roles)
            .map(|((player_id, _), role)| (*player_id, *role))
            .collect();
        for (player_id, role) in assignments {
            inner.reset_abilities_for_role(player_id, role);
        }

        inner.room.phase = RoomPhase::RoleAssignment;
        inner.room.state = RoomState::Starting;
        phase_service::transition_to(&state, &mut inner, RoomPhase::NightPhase)
            .await
            .expect("first night");
    }

    TestGame {
        state,
        store,
        handle,
        seats,
    }
}

impl TestGame {
    fn player(&self, index: usize) -> Uuid {
        self.seats[index].0
    }

    fn user(&self, index: usize) -> Uuid {
        self.seats[index].1
    }

    async fn advance(&self, next: RoomPhase) {
        let mut inner = self.handle.lock().await;
        phase_service::transition_to(&self.state, &mut inner, next)
            .await
            .expect("phase transition");
    }

    async fn night_action(&self, performer: usize, kind: ActionType, target: Option<usize>) {
        let mut inner = self.handle.lock().await;
        action_service::submit_night_action(
            &self.state,
            &mut inner,
            self.user(performer),
            kind,
            target.map(|t| self.player(t)),
            None,
        )
        .await
        .expect("night action accepted");
    }

    async fn vote(&self, voter: usize, target: Option<usize>) {
        let mut inner = self.handle.lock().await;
        vote_service::cast_vote(
            &self.state,
            &mut inner,
            self.user(voter),
            target.map(|t| self.player(t)),
        )
        .await
        .expect("vote accepted");
    }

    async fn player_state(&self, index: usize) -> PlayerState {
        let inner = self.handle.lock().await;
        inner.player(self.player(index)).unwrap().state
    }

    async fn role_of(&self, index: usize) -> GameRole {
        let inner = self.handle.lock().await;
        inner.player(self.player(index)).unwrap().role
    }
}

#[tokio::test]
async fn baseline_five_player_game_villagers_win() {
    // Seat order: werewolf, seer, three villagers.
    let game = setup_game(&[
        GameRole::Werewolf,
        GameRole::Seer,
        GameRole::Villager,
        GameRole::Villager,
        GameRole::Villager,
    ])
    .await;

    {
        let inner = game.handle.lock().await;
        assert_eq!(inner.room.phase, RoomPhase::NightPhase);
        assert_eq!(inner.room.day_number, 1);
        assert!(inner.room.phase_ends_at.is_some());
    }

    game.night_action(0, ActionType::WerewolfVote, Some(2)).await;
    game.advance(RoomPhase::DayDiscussion).await;

    assert_eq!(game.player_state(2).await, PlayerState::Dead);
    assert_eq!(game.player_state(0).await, PlayerState::Alive);

    game.advance(RoomPhase::DayVoting).await;
    for voter in [1, 3, 4] {
        game.vote(voter, Some(0)).await;
    }
    game.vote(0, Some(1)).await;
    game.advance(RoomPhase::NightPhase).await;

    let inner = game.handle.lock().await;
    assert_eq!(inner.room.phase, RoomPhase::GameEnd);
    assert_eq!(inner.room.state, RoomState::Ended);
    assert_eq!(inner.room.winning_team, Some(Team::Villagers));
    assert_eq!(
        inner.player(game.player(0)).unwrap().state,
        PlayerState::Dead
    );

    // Per-user stats recorded: the seer played and won.
    let stats = game.store.user_stats(game.user(1)).expect("stats written");
    assert_eq!(stats, (1, 1));
    // The wolf played and lost.
    let stats = game.store.user_stats(game.user(0)).expect("stats written");
    assert_eq!(stats, (1, 0));
}

#[tokio::test]
async fn guard_cancels_werewolf_kill() {
    let game = setup_game(&[
        GameRole::Werewolf,
        GameRole::Seer,
        GameRole::Villager,
        GameRole::Villager,
        GameRole::Guard,
    ])
    .await;

    game.night_action(0, ActionType::WerewolfVote, Some(2)).await;
    game.night_action(4, ActionType::GuardProtect, Some(2)).await;
    game.advance(RoomPhase::DayDiscussion).await;

    for index in 0..5 {
        assert_eq!(game.player_state(index).await, PlayerState::Alive);
    }

    let inner = game.handle.lock().await;
    assert_eq!(inner.room.phase, RoomPhase::DayDiscussion);
}

#[tokio::test]
async fn guard_rules_reject_self_and_repeat_protection() {
    let game = setup_game(&[
        GameRole::Werewolf,
        GameRole::Seer,
        GameRole::Villager,
        GameRole::Villager,
        GameRole::Guard,
    ])
    .await;

    {
        let mut inner = game.handle.lock().await;
        let err = action_service::submit_night_action(
            &game.state,
            &mut inner,
            game.user(4),
            ActionType::GuardProtect,
            Some(game.player(4)),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    game.night_action(4, ActionType::GuardProtect, Some(2)).await;
    game.advance(RoomPhase::DayDiscussion).await;
    game.advance(RoomPhase::DayVoting).await;
    for voter in 0..5 {
        game.vote(voter, None).await;
    }
    game.advance(RoomPhase::NightPhase).await;

    let mut inner = game.handle.lock().await;
    let err = action_service::submit_night_action(
        &game.state,
        &mut inner,
        game.user(4),
        ActionType::GuardProtect,
        Some(game.player(2)),
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    // A different target is fine on the following night.
    action_service::submit_night_action(
        &game.state,
        &mut inner,
        game.user(4),
        ActionType::GuardProtect,
        Some(game.player(3)),
        None,
    )
    .await
    .expect("new target accepted");
}

#[tokio::test]
async fn cupid_lovers_die_together() {
    // Seats: cupid, hunter, werewolf, seer, four villagers.
    let game = setup_game(&[
        GameRole::Cupid,
        GameRole::Hunter,
        GameRole::Werewolf,
        GameRole::Seer,
        GameRole::Villager,
        GameRole::Villager,
        GameRole::Villager,
        GameRole::Villager,
    ])
    .await;

    {
        let mut inner = game.handle.lock().await;
        action_service::submit_night_action(
            &game.state,
            &mut inner,
            game.user(0),
            ActionType::CupidLink,
            None,
            Some(serde_json::json!({
                "player1_id": game.player(4).to_string(),
                "player2_id": game.player(5).to_string(),
            })),
        )
        .await
        .expect("cupid link accepted");
    }
    game.advance(RoomPhase::DayDiscussion).await;

    {
        let inner = game.handle.lock().await;
        assert_eq!(
            inner.player(game.player(4)).unwrap().linked_to,
            Some(game.player(5))
        );
        assert_eq!(
            inner.player(game.player(5)).unwrap().linked_to,
            Some(game.player(4))
        );
    }

    game.advance(RoomPhase::DayVoting).await;
    for voter in 0..8 {
        game.vote(voter, None).await;
    }
    game.advance(RoomPhase::NightPhase).await;

    {
        let inner = game.handle.lock().await;
        assert_eq!(inner.room.day_number, 2);
    }

    game.night_action(2, ActionType::WerewolfVote, Some(4)).await;
    game.advance(RoomPhase::DayDiscussion).await;

    assert_eq!(game.player_state(4).await, PlayerState::Dead);
    assert_eq!(game.player_state(5).await, PlayerState::Dead);
    let inner = game.handle.lock().await;
    assert_eq!(
        inner.player(game.player(5)).unwrap().died_at.is_some(),
        true
    );
}

#[tokio::test]
async fn hunter_revenge_after_lynch() {
    let game = setup_game(&[
        GameRole::Hunter,
        GameRole::Werewolf,
        GameRole::Seer,
        GameRole::Villager,
        GameRole::Villager,
        GameRole::Villager,
    ])
    .await;

    game.advance(RoomPhase::DayDiscussion).await;
    game.advance(RoomPhase::DayVoting).await;
    // The village turns on its own hunter.
    for voter in 1..6 {
        game.vote(voter, Some(0)).await;
    }
    game.vote(0, None).await;
    game.advance(RoomPhase::NightPhase).await;

    assert_eq!(game.player_state(0).await, PlayerState::Dead);
    {
        let inner = game.handle.lock().await;
        let pending = inner.pending_revenge.expect("revenge armed");
        assert_eq!(pending.hunter_id, game.player(0));
    }

    {
        let mut inner = game.handle.lock().await;
        action_service::hunter_revenge(&game.state, &mut inner, game.user(0), game.player(1))
            .await
            .expect("revenge shot accepted");
    }

    assert_eq!(game.player_state(1).await, PlayerState::Dead);
    let inner = game.handle.lock().await;
    assert!(inner.pending_revenge.is_none());
    // Shooting the only wolf ends the game for the village.
    assert_eq!(inner.room.phase, RoomPhase::GameEnd);
    assert_eq!(inner.room.winning_team, Some(Team::Villagers));
}

#[tokio::test]
async fn dictator_failed_coup_kills_the_dictator() {
    let game = setup_game(&[
        GameRole::Dictator,
        GameRole::Werewolf,
        GameRole::Seer,
        GameRole::Villager,
        GameRole::Villager,
        GameRole::Villager,
    ])
    .await;

    game.advance(RoomPhase::DayDiscussion).await;

    {
        let mut inner = game.handle.lock().await;
        action_service::dictator_coup(&game.state, &mut inner, game.user(0), game.player(3))
            .await
            .expect("coup processed");
    }

    assert_eq!(game.player_state(0).await, PlayerState::Dead);
    assert_eq!(game.player_state(3).await, PlayerState::Alive);
    let inner = game.handle.lock().await;
    assert_eq!(inner.room.phase, RoomPhase::DayDiscussion);
}

#[tokio::test]
async fn dictator_successful_coup_crowns_a_mayor() {
    let game = setup_game(&[
        GameRole::Dictator,
        GameRole::Werewolf,
        GameRole::Werewolf,
        GameRole::Seer,
        GameRole::Villager,
        GameRole::Villager,
        GameRole::Villager,
    ])
    .await;

    game.advance(RoomPhase::DayDiscussion).await;

    {
        let mut inner = game.handle.lock().await;
        action_service::dictator_coup(&game.state, &mut inner, game.user(0), game.player(1))
            .await
            .expect("coup processed");
    }

    assert_eq!(game.player_state(1).await, PlayerState::Dead);
    assert_eq!(game.player_state(0).await, PlayerState::Alive);
    let inner = game.handle.lock().await;
    assert!(
        inner
            .ability(game.player(0), werewolf_back::state::room::AbilityType::MayorVote)
            .is_some()
    );
}

#[tokio::test]
async fn black_wolf_converts_the_pack_victim() {
    let game = setup_game(&[
        GameRole::BlackWolf,
        GameRole::Werewolf,
        GameRole::Seer,
        GameRole::Villager,
        GameRole::Villager,
        GameRole::Villager,
    ])
    .await;

    game.night_action(0, ActionType::WerewolfVote, Some(3)).await;
    game.night_action(1, ActionType::WerewolfVote, Some(3)).await;
    game.night_action(0, ActionType::BlackWolfConvert, Some(3)).await;
    game.advance(RoomPhase::DayDiscussion).await;

    assert_eq!(game.player_state(3).await, PlayerState::Alive);
    assert_eq!(game.role_of(3).await, GameRole::Werewolf);
}

#[tokio::test]
async fn witch_heal_mismatch_has_no_effect() {
    let game = setup_game(&[
        GameRole::Werewolf,
        GameRole::Witch,
        GameRole::Seer,
        GameRole::Villager,
        GameRole::Villager,
    ])
    .await;

    game.night_action(0, ActionType::WerewolfVote, Some(3)).await;
    game.night_action(1, ActionType::WitchHeal, Some(4)).await;
    game.advance(RoomPhase::DayDiscussion).await;

    assert_eq!(game.player_state(3).await, PlayerState::Dead);
    // The mismatched heal kept its charge.
    let inner = game.handle.lock().await;
    let heal = inner
        .ability(
            game.player(1),
            werewolf_back::state::room::AbilityType::WitchHeal,
        )
        .unwrap();
    assert_eq!(heal.uses_left, 1);
}

#[tokio::test]
async fn day_number_increments_only_on_night_entry() {
    let game = setup_game(&[
        GameRole::Werewolf,
        GameRole::Seer,
        GameRole::Villager,
        GameRole::Villager,
        GameRole::Villager,
    ])
    .await;

    game.advance(RoomPhase::DayDiscussion).await;
    game.advance(RoomPhase::DayVoting).await;
    {
        let inner = game.handle.lock().await;
        assert_eq!(inner.room.day_number, 1);
    }

    for voter in 0..5 {
        game.vote(voter, None).await;
    }
    game.advance(RoomPhase::NightPhase).await;

    let inner = game.handle.lock().await;
    assert_eq!(inner.room.day_number, 2);
    assert_eq!(inner.room.phase, RoomPhase::NightPhase);
    assert_eq!(inner.room.state, RoomState::Night);
}

#[tokio::test]
async fn durable_timer_follows_the_phase() {
    let game = setup_game(&[
        GameRole::Werewolf,
        GameRole::Seer,
        GameRole::Villager,
        GameRole::Villager,
        GameRole::Villager,
    ])
    .await;

    let timers = game.store.load_timers().await.unwrap();
    assert_eq!(timers.len(), 1);
    assert_eq!(timers[0].phase, RoomPhase::NightPhase);

    game.advance(RoomPhase::DayDiscussion).await;
    let timers = game.store.load_timers().await.unwrap();
    assert_eq!(timers.len(), 1);
    assert_eq!(timers[0].phase, RoomPhase::DayDiscussion);
}

#[tokio::test]
async fn positions_fill_smallest_gap_and_votes_require_life() {
    let game = setup_game(&[
        GameRole::Werewolf,
        GameRole::Seer,
        GameRole::Villager,
        GameRole::Villager,
        GameRole::Villager,
    ])
    .await;

    {
        let inner = game.handle.lock().await;
        let mut positions: Vec<u8> = inner.players.values().map(|p| p.position).collect();
        positions.sort_unstable();
        assert_eq!(positions, vec![1, 2, 3, 4, 5]);
    }

    game.night_action(0, ActionType::WerewolfVote, Some(2)).await;
    game.advance(RoomPhase::DayDiscussion).await;
    game.advance(RoomPhase::DayVoting).await;

    let mut inner = game.handle.lock().await;
    let err = vote_service::cast_vote(&game.state, &mut inner, game.user(2), Some(game.player(0)))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Precondition(_)));
}
