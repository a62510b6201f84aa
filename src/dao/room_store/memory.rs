//! In-memory store backend. Authoritative for tests and the default when no
//! database is configured; every operation applies under a single lock, which
//! also gives `commit` its atomicity.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use futures::future::BoxFuture;
use uuid::Uuid;

use super::RoomStore;
use crate::dao::{
    models::{
        AbilityEntity, ActionEntity, ActionFilter, EventEntity, PlayerEntity, RoomEntity,
        RoomWriteBatch, TimerEntity, UserStatsDelta,
    },
    storage::StorageResult,
};
use crate::state::{phase::RoomPhase, room::AbilityType};

#[derive(Default)]
struct MemoryState {
    rooms: HashMap<Uuid, RoomEntity>,
    players: HashMap<Uuid, Vec<PlayerEntity>>,
    abilities: HashMap<(Uuid, AbilityType), AbilityEntity>,
    actions: Vec<ActionEntity>,
    events: Vec<EventEntity>,
    timers: Vec<TimerEntity>,
    stats: HashMap<Uuid, (u64, u64)>,
}

impl MemoryState {
    fn upsert_player(&mut self, player: PlayerEntity) {
        let roster = self.players.entry(player.room_id).or_default();
        match roster.iter_mut().find(|p| p.id == player.id) {
            Some(existing) => *existing = player,
            None => roster.push(player),
        }
    }

    fn upsert_action(&mut self, action: ActionEntity) {
        let slot = self.actions.iter_mut().find(|a| {
            a.room_id == action.room_id
                && a.performer_id == action.performer_id
                && a.kind == action.kind
                && a.day_number == action.day_number
                && a.phase == action.phase
        });
        match slot {
            Some(existing) => *existing = action,
            None => self.actions.push(action),
        }
    }

    fn apply(&mut self, batch: RoomWriteBatch) {
        if let Some(filter) = &batch.purge_actions {
            self.actions.retain(|a| !filter.matches(a));
        }
        if let Some(room) = batch.room {
            self.rooms.insert(room.id, room);
        }
        for player in batch.players {
            self.upsert_player(player);
        }
        for ability in batch.abilities {
            self.abilities
                .insert((ability.player_id, ability.kind), ability);
        }
        for action in batch.actions {
            self.upsert_action(action);
        }
        self.events.extend(batch.events);
        if batch.clear_timers {
            self.timers.retain(|t| t.room_id != batch.room_id);
        }
        self.timers.extend(batch.timers);
        for delta in batch.stats {
            let entry = self.stats.entry(delta.user_id).or_default();
            entry.0 += u64::from(delta.games_played);
            entry.1 += u64::from(delta.wins);
        }
    }
}

/// Store backend holding everything in process memory.
#[derive(Clone, Default)]
pub struct MemoryRoomStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        let mut guard = self.state.lock().expect("memory store poisoned");
        f(&mut guard)
    }

    /// Test hook: recorded stats for a user as `(games_played, wins)`.
    pub fn user_stats(&self, user_id: Uuid) -> Option<(u64, u64)> {
        self.locked(|state| state.stats.get(&user_id).copied())
    }

    /// Test hook: number of audit events recorded for a room.
    pub fn event_count(&self, room_id: Uuid) -> usize {
        self.locked(|state| {
            state
                .events
                .iter()
                .filter(|e| e.room_id == room_id)
                .count()
        })
    }
}

impl RoomStore for MemoryRoomStore {
    fn create_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.locked(|state| state.rooms.insert(room.id, room));
            Ok(())
        })
    }

    fn update_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.create_room(room)
    }

    fn find_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.locked(|state| state.rooms.get(&id).cloned())) })
    }

    fn find_room_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store.locked(|state| {
                state
                    .rooms
                    .values()
                    .find(|room| room.code == code && !room.state.is_terminal())
                    .cloned()
            }))
        })
    }

    fn list_rooms_in_phase(
        &self,
        phase: RoomPhase,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store.locked(|state| {
                state
                    .rooms
                    .values()
                    .filter(|room| room.phase == phase)
                    .cloned()
                    .collect()
            }))
        })
    }

    fn create_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.locked(|state| state.upsert_player(player));
            Ok(())
        })
    }

    fn update_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.create_player(player)
    }

    fn delete_player(
        &self,
        room_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.locked(|state| {
                if let Some(roster) = state.players.get_mut(&room_id) {
                    roster.retain(|p| p.id != player_id);
                }
            });
            Ok(())
        })
    }

    fn list_players(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store.locked(|state| state.players.get(&room_id).cloned().unwrap_or_default()))
        })
    }

    fn upsert_action(&self, action: ActionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.locked(|state| state.upsert_action(action));
            Ok(())
        })
    }

    fn find_actions(
        &self,
        filter: ActionFilter,
    ) -> BoxFuture<'static, StorageResult<Vec<ActionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store.locked(|state| {
                state
                    .actions
                    .iter()
                    .filter(|a| filter.matches(a))
                    .cloned()
                    .collect()
            }))
        })
    }

    fn upsert_ability(&self, ability: AbilityEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.locked(|state| {
                state
                    .abilities
                    .insert((ability.player_id, ability.kind), ability)
            });
            Ok(())
        })
    }

    fn find_ability(
        &self,
        player_id: Uuid,
        kind: AbilityType,
    ) -> BoxFuture<'static, StorageResult<Option<AbilityEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store.locked(|state| state.abilities.get(&(player_id, kind)).cloned()))
        })
    }

    fn create_event(&self, event: EventEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.locked(|state| state.events.push(event));
            Ok(())
        })
    }

    fn increment_user_stats(&self, delta: UserStatsDelta) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.locked(|state| {
                let entry = state.stats.entry(delta.user_id).or_default();
                entry.0 += u64::from(delta.games_played);
                entry.1 += u64::from(delta.wins);
            });
            Ok(())
        })
    }

    fn commit(&self, batch: RoomWriteBatch) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.locked(|state| state.apply(batch));
            Ok(())
        })
    }

    fn save_timer(&self, timer: TimerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.locked(|state| state.timers.push(timer));
            Ok(())
        })
    }

    fn delete_timers(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.locked(|state| state.timers.retain(|t| t.room_id != room_id));
            Ok(())
        })
    }

    fn load_timers(&self) -> BoxFuture<'static, StorageResult<Vec<TimerEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.locked(|state| state.timers.clone())) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::state::room::ActionType;

    fn action(room_id: Uuid, performer_id: Uuid, target: Option<Uuid>) -> ActionEntity {
        ActionEntity {
            room_id,
            performer_id,
            kind: ActionType::DayVote,
            day_number: 1,
            phase: RoomPhase::DayVoting,
            target_id: target,
            metadata: None,
            result: None,
            created_at: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn action_upsert_overwrites_by_key() {
        let store = MemoryRoomStore::new();
        let room_id = Uuid::new_v4();
        let voter = Uuid::new_v4();
        let first_target = Uuid::new_v4();
        let second_target = Uuid::new_v4();

        store
            .upsert_action(action(room_id, voter, Some(first_target)))
            .await
            .unwrap();
        store
            .upsert_action(action(room_id, voter, Some(second_target)))
            .await
            .unwrap();

        let found = store
            .find_actions(ActionFilter::for_room(room_id))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].target_id, Some(second_target));
    }

    #[tokio::test]
    async fn batch_purge_then_insert_is_atomic() {
        let store = MemoryRoomStore::new();
        let room_id = Uuid::new_v4();
        let voter = Uuid::new_v4();

        store
            .upsert_action(action(room_id, voter, None))
            .await
            .unwrap();

        let mut batch = RoomWriteBatch::new(room_id);
        batch.purge_actions = Some(ActionFilter {
            room_id: Some(room_id),
            kind: Some(ActionType::DayVote),
            ..ActionFilter::default()
        });
        batch.actions.push(action(room_id, voter, Some(Uuid::new_v4())));
        store.commit(batch).await.unwrap();

        let found = store
            .find_actions(ActionFilter::for_room(room_id))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].target_id.is_some());
    }

    #[tokio::test]
    async fn terminal_room_code_is_not_resolvable() {
        let store = MemoryRoomStore::new();
        let mut room: RoomEntity = crate::state::room::Room::new(
            "ABC123".into(),
            Uuid::new_v4(),
            crate::state::room::RoomSettings::with_defaults("lobby"),
        )
        .into();
        room.state = crate::state::room::RoomState::Cancelled;
        store.create_room(room).await.unwrap();

        assert!(
            store
                .find_room_by_code("ABC123".into())
                .await
                .unwrap()
                .is_none()
        );
    }
}
