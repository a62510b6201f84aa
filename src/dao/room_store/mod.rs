pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::models::{
    AbilityEntity, ActionEntity, ActionFilter, EventEntity, PlayerEntity, RoomEntity,
    RoomWriteBatch, TimerEntity, UserStatsDelta,
};
use crate::dao::storage::StorageResult;
use crate::state::{phase::RoomPhase, room::AbilityType};

/// Abstraction over the persistence layer for rooms, players, actions,
/// abilities, audit events, durable timers, and user statistics.
///
/// `commit` is the transactional entry point: a [`RoomWriteBatch`] applies
/// atomically and is serialized against other batches for the same room.
pub trait RoomStore: Send + Sync {
    fn create_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn update_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;
    fn find_room_by_code(&self, code: String)
    -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;
    fn list_rooms_in_phase(&self, phase: RoomPhase)
    -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>>;

    fn create_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn update_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn delete_player(&self, room_id: Uuid, player_id: Uuid)
    -> BoxFuture<'static, StorageResult<()>>;
    fn list_players(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>>;

    fn upsert_action(&self, action: ActionEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_actions(&self, filter: ActionFilter)
    -> BoxFuture<'static, StorageResult<Vec<ActionEntity>>>;

    fn upsert_ability(&self, ability: AbilityEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_ability(
        &self,
        player_id: Uuid,
        kind: AbilityType,
    ) -> BoxFuture<'static, StorageResult<Option<AbilityEntity>>>;

    fn create_event(&self, event: EventEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn increment_user_stats(&self, delta: UserStatsDelta) -> BoxFuture<'static, StorageResult<()>>;

    /// Apply a batch atomically, serialized per room.
    fn commit(&self, batch: RoomWriteBatch) -> BoxFuture<'static, StorageResult<()>>;

    fn save_timer(&self, timer: TimerEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn delete_timers(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<()>>;
    fn load_timers(&self) -> BoxFuture<'static, StorageResult<Vec<TimerEntity>>>;

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
