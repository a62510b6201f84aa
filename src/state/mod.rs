pub mod phase;
pub mod room;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::SystemTime,
};

use axum::extract::ws::Message;
use dashmap::DashMap;
use indexmap::IndexMap;
use tokio::sync::{Mutex, MutexGuard, RwLock, mpsc, watch};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        models::{AbilityEntity, PlayerEntity, RoomWriteBatch},
        room_store::RoomStore,
    },
    services::{event_bus::BroadcastBus, timer_service::TimerQueue},
    state::{
        phase::RoomPhase,
        room::{Ability, AbilityType, DeathCause, GameAction, GameRole, Player, Room},
    },
};

pub type SharedState = Arc<AppState>;

/// Handle used to push messages to a connected game client.
#[derive(Clone)]
pub struct ClientConnection {
    pub user_id: Uuid,
    pub player_id: Uuid,
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Armed Hunter revenge shot, waiting for the dead Hunter to pick a target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingRevenge {
    pub hunter_id: Uuid,
    pub expires_at: SystemTime,
}

/// Outcome of one night, kept until the following day announces it.
#[derive(Debug, Clone, Default)]
pub struct NightReport {
    pub deaths: Vec<(Uuid, DeathCause, GameRole)>,
    pub saves: Vec<(Uuid, DeathCause)>,
    /// Talkative Seer results, broadcast publicly at day start.
    pub announcements: Vec<(Uuid, GameRole)>,
}

/// Mutable state of one room. All access runs under the owning
/// [`RoomHandle`]'s mutex, which is the room's critical section.
pub struct RoomInner {
    pub room: Room,
    pub players: IndexMap<Uuid, Player>,
    pub abilities: Vec<Ability>,
    pub actions: Vec<GameAction>,
    pub pending_revenge: Option<PendingRevenge>,
    pub night_report: Option<NightReport>,
    /// The Plunderer trigger fires on the first death only.
    pub first_death_recorded: bool,
    /// Whether the Little Girl survived her roll and reads the wolf channel
    /// this night.
    pub little_girl_spying: bool,
    pub last_activity: SystemTime,
}

impl RoomInner {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            players: IndexMap::new(),
            abilities: Vec::new(),
            actions: Vec::new(),
            pending_revenge: None,
            night_report: None,
            first_death_recorded: false,
            little_girl_spying: false,
            last_activity: SystemTime::now(),
        }
    }

    pub fn player(&self, id: Uuid) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn player_mut(&mut self, id: Uuid) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    pub fn player_by_user(&self, user_id: Uuid) -> Option<&Player> {
        self.players.values().find(|p| p.user_id == user_id)
    }

    pub fn alive_players(&self) -> Vec<&Player> {
        self.players.values().filter(|p| p.is_alive()).collect()
    }

    pub fn alive_count(&self) -> u32 {
        self.players.values().filter(|p| p.is_alive()).count() as u32
    }

    /// Smallest free seat number, starting at 1.
    pub fn next_position(&self) -> u8 {
        let mut position = 1;
        loop {
            if !self.players.values().any(|p| p.position == position) {
                return position;
            }
            position += 1;
        }
    }

    pub fn ability(&self, player_id: Uuid, kind: AbilityType) -> Option<&Ability> {
        self.abilities
            .iter()
            .find(|a| a.player_id == player_id && a.kind == kind)
    }

    pub fn ability_mut(&mut self, player_id: Uuid, kind: AbilityType) -> Option<&mut Ability> {
        self.abilities
            .iter_mut()
            .find(|a| a.player_id == player_id && a.kind == kind)
    }

    pub fn upsert_ability(&mut self, ability: Ability) {
        match self
            .abilities
            .iter_mut()
            .find(|a| a.player_id == ability.player_id && a.kind == ability.kind)
        {
            Some(existing) => *existing = ability,
            None => self.abilities.push(ability),
        }
    }

    /// Replace a player's abilities with the fresh set for `role`. Used when
    /// a role is inherited, stolen, or converted.
    pub fn reset_abilities_for_role(&mut self, player_id: Uuid, role: GameRole) {
        self.abilities.retain(|a| a.player_id != player_id);
        for spec in role.ability_specs() {
            self.abilities.push(Ability::from_spec(player_id, spec));
        }
    }

    /// Upsert keyed by `(performer, kind, day, phase)`; the latest write wins.
    pub fn upsert_action(&mut self, action: GameAction) {
        let slot = self.actions.iter_mut().find(|a| {
            a.performer_id == action.performer_id
                && a.kind == action.kind
                && a.day_number == action.day_number
                && a.phase == action.phase
        });
        match slot {
            Some(existing) => *existing = action,
            None => self.actions.push(action),
        }
    }

    /// Actions for a `(day, phase)` slice, ordered by submission time.
    pub fn actions_for(&self, day_number: u32, phase: RoomPhase) -> Vec<&GameAction> {
        let mut actions: Vec<&GameAction> = self
            .actions
            .iter()
            .filter(|a| a.day_number == day_number && a.phase == phase)
            .collect();
        actions.sort_by_key(|a| a.created_at);
        actions
    }

    pub fn purge_actions(&mut self, day_number: u32, phase: RoomPhase) {
        self.actions
            .retain(|a| !(a.day_number == day_number && a.phase == phase));
    }

    pub fn touch(&mut self) {
        self.last_activity = SystemTime::now();
    }

    /// Snapshot the whole room into one atomic write batch.
    pub fn full_batch(&self) -> RoomWriteBatch {
        let room_id = self.room.id;
        let mut batch = RoomWriteBatch::new(room_id);
        batch.room = Some(self.room.clone().into());
        batch.players = self
            .players
            .values()
            .map(|p| PlayerEntity::from_domain(room_id, p))
            .collect();
        batch.abilities = self
            .abilities
            .iter()
            .map(|a| AbilityEntity::from_domain(room_id, a))
            .collect();
        batch
    }
}

/// One logical actor per room: the mutex is the room's critical section.
pub struct RoomHandle {
    pub id: Uuid,
    inner: Mutex<RoomInner>,
}

impl RoomHandle {
    pub fn new(room: Room) -> Arc<Self> {
        Arc::new(Self {
            id: room.id,
            inner: Mutex::new(RoomInner::new(room)),
        })
    }

    pub async fn lock(&self) -> MutexGuard<'_, RoomInner> {
        self.inner.lock().await
    }
}

/// Central application state: room registry, connection registry, event bus,
/// timer queue, and the storage slot.
pub struct AppState {
    config: AppConfig,
    game_store: RwLock<Option<Arc<dyn RoomStore>>>,
    degraded: watch::Sender<bool>,
    rooms: DashMap<Uuid, Arc<RoomHandle>>,
    codes: DashMap<String, Uuid>,
    connections: DashMap<(Uuid, Uuid), ClientConnection>,
    bus: BroadcastBus,
    timers: TimerQueue,
    accepting_rooms: AtomicBool,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned
    /// cheaply. The application starts in degraded mode until a storage
    /// backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            config,
            game_store: RwLock::new(None),
            degraded: degraded_tx,
            rooms: DashMap::new(),
            codes: DashMap::new(),
            connections: DashMap::new(),
            bus: BroadcastBus::new(256),
            timers: TimerQueue::new(),
            accepting_rooms: AtomicBool::new(true),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current game store, if one is installed.
    pub async fn game_store(&self) -> Option<Arc<dyn RoomStore>> {
        let guard = self.game_store.read().await;
        guard.as_ref().cloned()
    }

    /// Install a new game store implementation and leave degraded mode.
    pub async fn install_game_store(&self, store: Arc<dyn RoomStore>) {
        {
            let mut guard = self.game_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current game store and enter degraded mode.
    pub async fn clear_game_store(&self) {
        {
            let mut guard = self.game_store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    pub async fn is_degraded(&self) -> bool {
        let guard = self.game_store.read().await;
        guard.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        if self.is_degraded().await == value {
            return;
        }
        let _ = self.degraded.send(value);
    }

    pub fn bus(&self) -> &BroadcastBus {
        &self.bus
    }

    pub fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    /// Registry of connected client sockets keyed by `(room, player)`.
    pub fn connections(&self) -> &DashMap<(Uuid, Uuid), ClientConnection> {
        &self.connections
    }

    pub fn room(&self, id: Uuid) -> Option<Arc<RoomHandle>> {
        self.rooms.get(&id).map(|entry| entry.value().clone())
    }

    pub fn room_by_code(&self, code: &str) -> Option<Arc<RoomHandle>> {
        let id = self.codes.get(code).map(|entry| *entry.value())?;
        self.room(id)
    }

    pub fn rooms(&self) -> &DashMap<Uuid, Arc<RoomHandle>> {
        &self.rooms
    }

    pub fn insert_room(&self, code: String, handle: Arc<RoomHandle>) {
        self.codes.insert(code, handle.id);
        self.rooms.insert(handle.id, handle);
    }

    /// Free a terminal room's code for reuse. The handle stays registered so
    /// late snapshot requests still resolve.
    pub fn release_code(&self, code: &str) {
        self.codes.remove(code);
    }

    pub fn remove_room(&self, id: Uuid, code: &str) {
        self.codes.remove(code);
        self.rooms.remove(&id);
    }

    pub fn accepting_rooms(&self) -> bool {
        self.accepting_rooms.load(Ordering::Acquire)
    }

    /// Graceful shutdown: refuse new rooms from now on.
    pub fn stop_accepting_rooms(&self) {
        self.accepting_rooms.store(false, Ordering::Release);
    }
}
