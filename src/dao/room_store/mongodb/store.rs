use std::{sync::Arc, time::Duration};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, ClientSession, Collection, Database, IndexModel,
    bson::doc,
    error::{Error as MongoError, TRANSIENT_TRANSACTION_ERROR},
    options::IndexOptions,
};
use tokio::{sync::RwLock, time::sleep};
use tracing::debug;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoAbilityDocument, MongoActionDocument, MongoEventDocument, MongoPlayerDocument,
        MongoRoomDocument, MongoTimerDocument, doc_id, encode_bson, uuid_as_binary,
    },
};
use crate::dao::{
    models::{
        AbilityEntity, ActionEntity, ActionFilter, EventEntity, PlayerEntity, RoomEntity,
        RoomWriteBatch, TimerEntity, UserStatsDelta,
    },
    room_store::RoomStore,
    storage::StorageResult,
};
use crate::state::{phase::RoomPhase, room::AbilityType};

/// How many pings a fresh connection gets before it is declared dead.
const CONNECT_PING_BUDGET: u32 = 8;
const CONNECT_PING_BACKOFF: Duration = Duration::from_millis(300);
const CONNECT_PING_BACKOFF_CEIL: Duration = Duration::from_secs(4);

const ROOM_COLLECTION: &str = "rooms";
const PLAYER_COLLECTION: &str = "players";
const ABILITY_COLLECTION: &str = "abilities";
const ACTION_COLLECTION: &str = "actions";
const EVENT_COLLECTION: &str = "events";
const TIMER_COLLECTION: &str = "timers";
const STATS_COLLECTION: &str = "user_stats";

#[derive(Clone)]
pub struct MongoRoomStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) = open_database(&self.config).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

/// Build a client from the configured options and ping it until it answers,
/// within a bounded budget.
async fn open_database(config: &MongoConfig) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(config.options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(&config.database_name);

    let mut attempt = 0;
    let mut backoff = CONNECT_PING_BACKOFF;
    loop {
        attempt += 1;
        match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => return Ok((client, database)),
            Err(source) if attempt >= CONNECT_PING_BUDGET => {
                return Err(MongoDaoError::InitialPing {
                    attempts: attempt,
                    source,
                });
            }
            Err(err) => {
                debug!(attempt, error = %err, "mongodb not answering yet; backing off");
                sleep(backoff).await;
                backoff = (backoff * 2).min(CONNECT_PING_BACKOFF_CEIL);
            }
        }
    }
}

impl MongoRoomStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) = open_database(&config).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;

        let indexes: [(&'static str, &'static str, mongodb::bson::Document, bool); 5] = [
            (ROOM_COLLECTION, "code", doc! {"code": 1}, false),
            (
                PLAYER_COLLECTION,
                "room_id",
                doc! {"room_id": 1, "_id": 1},
                true,
            ),
            (
                ABILITY_COLLECTION,
                "player_id,kind",
                doc! {"player_id": 1, "kind": 1},
                true,
            ),
            (
                ACTION_COLLECTION,
                "performer,kind,day,phase",
                doc! {"room_id": 1, "performer_id": 1, "kind": 1, "day_number": 1, "phase": 1},
                true,
            ),
            (TIMER_COLLECTION, "room_id", doc! {"room_id": 1}, false),
        ];

        for (collection_name, index_name, keys, unique) in indexes {
            let collection = database.collection::<mongodb::bson::Document>(collection_name);
            let index = IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .name(Some(format!("{collection_name}_{index_name}_idx")))
                        .unique(unique.then_some(true))
                        .build(),
                )
                .build();

            collection
                .create_index(index)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection: collection_name,
                    index: index_name,
                    source,
                })?;
        }

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn client(&self) -> Client {
        let guard = self.inner.state.read().await;
        guard.client.clone()
    }

    async fn rooms(&self) -> Collection<MongoRoomDocument> {
        self.database().await.collection(ROOM_COLLECTION)
    }

    async fn players(&self) -> Collection<MongoPlayerDocument> {
        self.database().await.collection(PLAYER_COLLECTION)
    }

    async fn abilities(&self) -> Collection<MongoAbilityDocument> {
        self.database().await.collection(ABILITY_COLLECTION)
    }

    async fn actions(&self) -> Collection<MongoActionDocument> {
        self.database().await.collection(ACTION_COLLECTION)
    }

    async fn events(&self) -> Collection<MongoEventDocument> {
        self.database().await.collection(EVENT_COLLECTION)
    }

    async fn timers(&self) -> Collection<MongoTimerDocument> {
        self.database().await.collection(TIMER_COLLECTION)
    }

    async fn save_room(&self, room: RoomEntity) -> MongoResult<()> {
        let id = room.id;
        let document: MongoRoomDocument = room.into();
        self.rooms()
            .await
            .replace_one(doc_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveRoom { id, source })?;
        Ok(())
    }

    async fn find_room(&self, id: Uuid) -> MongoResult<Option<RoomEntity>> {
        let document = self
            .rooms()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadRoom { id, source })?;
        Ok(document.map(Into::into))
    }

    async fn find_room_by_code(&self, code: &str) -> MongoResult<Option<RoomEntity>> {
        let terminal = encode_bson(
            ROOM_COLLECTION,
            &[
                crate::state::room::RoomState::Ended,
                crate::state::room::RoomState::Cancelled,
            ],
        )?;
        let document = self
            .rooms()
            .await
            .find_one(doc! {"code": code, "state": {"$nin": terminal}})
            .await
            .map_err(|source| MongoDaoError::QueryRooms { source })?;
        Ok(document.map(Into::into))
    }

    async fn list_rooms_in_phase(&self, phase: RoomPhase) -> MongoResult<Vec<RoomEntity>> {
        let phase = encode_bson(ROOM_COLLECTION, &phase)?;
        let documents: Vec<MongoRoomDocument> = self
            .rooms()
            .await
            .find(doc! {"phase": phase})
            .await
            .map_err(|source| MongoDaoError::QueryRooms { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::QueryRooms { source })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn save_player(&self, player: PlayerEntity) -> MongoResult<()> {
        let id = player.id;
        let document: MongoPlayerDocument = player.into();
        self.players()
            .await
            .replace_one(doc_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SavePlayer { id, source })?;
        Ok(())
    }

    async fn delete_player(&self, player_id: Uuid) -> MongoResult<()> {
        self.players()
            .await
            .delete_one(doc_id(player_id))
            .await
            .map_err(|source| MongoDaoError::DeletePlayer {
                id: player_id,
                source,
            })?;
        Ok(())
    }

    async fn list_players(&self, room_id: Uuid) -> MongoResult<Vec<PlayerEntity>> {
        let documents: Vec<MongoPlayerDocument> = self
            .players()
            .await
            .find(doc! {"room_id": uuid_as_binary(room_id)})
            .await
            .map_err(|source| MongoDaoError::QueryPlayers { room_id, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::QueryPlayers { room_id, source })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn upsert_action(&self, action: ActionEntity) -> MongoResult<()> {
        let performer_id = action.performer_id;
        let filter = action_key_filter(&action)?;
        let document: MongoActionDocument = action.into();
        self.actions()
            .await
            .replace_one(filter, &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveAction {
                performer_id,
                source,
            })?;
        Ok(())
    }

    async fn find_actions(&self, filter: ActionFilter) -> MongoResult<Vec<ActionEntity>> {
        let documents: Vec<MongoActionDocument> = self
            .actions()
            .await
            .find(action_filter_document(&filter)?)
            .await
            .map_err(|source| MongoDaoError::QueryActions { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::QueryActions { source })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn upsert_ability(&self, ability: AbilityEntity) -> MongoResult<()> {
        let player_id = ability.player_id;
        let kind = encode_bson(ABILITY_COLLECTION, &ability.kind)?;
        let document: MongoAbilityDocument = ability.into();
        self.abilities()
            .await
            .replace_one(
                doc! {"player_id": uuid_as_binary(player_id), "kind": kind},
                &document,
            )
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveAbility { player_id, source })?;
        Ok(())
    }

    async fn find_ability(
        &self,
        player_id: Uuid,
        kind: AbilityType,
    ) -> MongoResult<Option<AbilityEntity>> {
        let kind = encode_bson(ABILITY_COLLECTION, &kind)?;
        let document = self
            .abilities()
            .await
            .find_one(doc! {"player_id": uuid_as_binary(player_id), "kind": kind})
            .await
            .map_err(|source| MongoDaoError::LoadAbility { player_id, source })?;
        Ok(document.map(Into::into))
    }

    async fn create_event(&self, event: EventEntity) -> MongoResult<()> {
        let room_id = event.room_id;
        let document: MongoEventDocument = event.into();
        self.events()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::SaveEvent { room_id, source })?;
        Ok(())
    }

    async fn increment_user_stats(&self, delta: UserStatsDelta) -> MongoResult<()> {
        let user_id = delta.user_id;
        self.database()
            .await
            .collection::<mongodb::bson::Document>(STATS_COLLECTION)
            .update_one(
                doc_id(user_id),
                doc! {"$inc": {
                    "games_played": i64::from(delta.games_played),
                    "wins": i64::from(delta.wins),
                }},
            )
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::UpdateStats { user_id, source })?;
        Ok(())
    }

    async fn save_timer(&self, timer: TimerEntity) -> MongoResult<()> {
        let room_id = timer.room_id;
        let document: MongoTimerDocument = timer.into();
        self.timers()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::SaveTimer { room_id, source })?;
        Ok(())
    }

    async fn delete_timers(&self, room_id: Uuid) -> MongoResult<()> {
        self.timers()
            .await
            .delete_many(doc! {"room_id": uuid_as_binary(room_id)})
            .await
            .map_err(|source| MongoDaoError::DeleteTimers { room_id, source })?;
        Ok(())
    }

    async fn load_timers(&self) -> MongoResult<Vec<TimerEntity>> {
        let documents: Vec<MongoTimerDocument> = self
            .timers()
            .await
            .find(doc! {})
            .await
            .map_err(|source| MongoDaoError::LoadTimers { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadTimers { source })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    /// Apply a write batch inside a single multi-document transaction.
    async fn commit(&self, batch: RoomWriteBatch) -> MongoResult<()> {
        let client = self.client().await;
        let mut session = client
            .start_session()
            .await
            .map_err(|source| MongoDaoError::Transaction { source })?;
        session
            .start_transaction()
            .await
            .map_err(|source| MongoDaoError::Transaction { source })?;

        match self.apply_batch(&mut session, batch).await {
            Ok(()) => session
                .commit_transaction()
                .await
                .map_err(classify_commit_error),
            Err(err) => {
                let _ = session.abort_transaction().await;
                Err(err)
            }
        }
    }

    async fn apply_batch(
        &self,
        session: &mut ClientSession,
        batch: RoomWriteBatch,
    ) -> MongoResult<()> {
        let room_id = batch.room_id;

        if let Some(filter) = &batch.purge_actions {
            self.actions()
                .await
                .delete_many(action_filter_document(filter)?)
                .session(&mut *session)
                .await
                .map_err(|source| MongoDaoError::PurgeActions { room_id, source })?;
        }

        if let Some(room) = batch.room {
            let id = room.id;
            let document: MongoRoomDocument = room.into();
            self.rooms()
                .await
                .replace_one(doc_id(id), &document)
                .upsert(true)
                .session(&mut *session)
                .await
                .map_err(|source| MongoDaoError::SaveRoom { id, source })?;
        }

        for player in batch.players {
            let id = player.id;
            let document: MongoPlayerDocument = player.into();
            self.players()
                .await
                .replace_one(doc_id(id), &document)
                .upsert(true)
                .session(&mut *session)
                .await
                .map_err(|source| MongoDaoError::SavePlayer { id, source })?;
        }

        for ability in batch.abilities {
            let player_id = ability.player_id;
            let kind = encode_bson(ABILITY_COLLECTION, &ability.kind)?;
            let document: MongoAbilityDocument = ability.into();
            self.abilities()
                .await
                .replace_one(
                    doc! {"player_id": uuid_as_binary(player_id), "kind": kind},
                    &document,
                )
                .upsert(true)
                .session(&mut *session)
                .await
                .map_err(|source| MongoDaoError::SaveAbility { player_id, source })?;
        }

        for action in batch.actions {
            let performer_id = action.performer_id;
            let filter = action_key_filter(&action)?;
            let document: MongoActionDocument = action.into();
            self.actions()
                .await
                .replace_one(filter, &document)
                .upsert(true)
                .session(&mut *session)
                .await
                .map_err(|source| MongoDaoError::SaveAction {
                    performer_id,
                    source,
                })?;
        }

        for event in batch.events {
            let document: MongoEventDocument = event.into();
            self.events()
                .await
                .insert_one(&document)
                .session(&mut *session)
                .await
                .map_err(|source| MongoDaoError::SaveEvent { room_id, source })?;
        }

        if batch.clear_timers {
            self.timers()
                .await
                .delete_many(doc! {"room_id": uuid_as_binary(room_id)})
                .session(&mut *session)
                .await
                .map_err(|source| MongoDaoError::DeleteTimers { room_id, source })?;
        }

        for timer in batch.timers {
            let document: MongoTimerDocument = timer.into();
            self.timers()
                .await
                .insert_one(&document)
                .session(&mut *session)
                .await
                .map_err(|source| MongoDaoError::SaveTimer { room_id, source })?;
        }

        for delta in batch.stats {
            let user_id = delta.user_id;
            self.database()
                .await
                .collection::<mongodb::bson::Document>(STATS_COLLECTION)
                .update_one(
                    doc_id(user_id),
                    doc! {"$inc": {
                        "games_played": i64::from(delta.games_played),
                        "wins": i64::from(delta.wins),
                    }},
                )
                .upsert(true)
                .session(&mut *session)
                .await
                .map_err(|source| MongoDaoError::UpdateStats { user_id, source })?;
        }

        Ok(())
    }
}

fn classify_commit_error(source: MongoError) -> MongoDaoError {
    if source.contains_label(TRANSIENT_TRANSACTION_ERROR) {
        MongoDaoError::TransientCommit { source }
    } else {
        MongoDaoError::Transaction { source }
    }
}

fn action_key_filter(action: &ActionEntity) -> MongoResult<mongodb::bson::Document> {
    Ok(doc! {
        "room_id": uuid_as_binary(action.room_id),
        "performer_id": uuid_as_binary(action.performer_id),
        "kind": encode_bson(ACTION_COLLECTION, &action.kind)?,
        "day_number": action.day_number,
        "phase": encode_bson(ACTION_COLLECTION, &action.phase)?,
    })
}

fn action_filter_document(filter: &ActionFilter) -> MongoResult<mongodb::bson::Document> {
    let mut document = doc! {};
    if let Some(room_id) = filter.room_id {
        document.insert("room_id", uuid_as_binary(room_id));
    }
    if let Some(performer_id) = filter.performer_id {
        document.insert("performer_id", uuid_as_binary(performer_id));
    }
    if let Some(kind) = filter.kind {
        document.insert("kind", encode_bson(ACTION_COLLECTION, &kind)?);
    }
    if let Some(day_number) = filter.day_number {
        document.insert("day_number", day_number);
    }
    if let Some(phase) = filter.phase {
        document.insert("phase", encode_bson(ACTION_COLLECTION, &phase)?);
    }
    Ok(document)
}

impl RoomStore for MongoRoomStore {
    fn create_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_room(room).await.map_err(Into::into) })
    }

    fn update_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_room(room).await.map_err(Into::into) })
    }

    fn find_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_room(id).await.map_err(Into::into) })
    }

    fn find_room_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_room_by_code(&code).await.map_err(Into::into) })
    }

    fn list_rooms_in_phase(
        &self,
        phase: RoomPhase,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_rooms_in_phase(phase).await.map_err(Into::into) })
    }

    fn create_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_player(player).await.map_err(Into::into) })
    }

    fn update_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_player(player).await.map_err(Into::into) })
    }

    fn delete_player(
        &self,
        _room_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.delete_player(player_id).await.map_err(Into::into) })
    }

    fn list_players(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_players(room_id).await.map_err(Into::into) })
    }

    fn upsert_action(&self, action: ActionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.upsert_action(action).await.map_err(Into::into) })
    }

    fn find_actions(
        &self,
        filter: ActionFilter,
    ) -> BoxFuture<'static, StorageResult<Vec<ActionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_actions(filter).await.map_err(Into::into) })
    }

    fn upsert_ability(&self, ability: AbilityEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.upsert_ability(ability).await.map_err(Into::into) })
    }

    fn find_ability(
        &self,
        player_id: Uuid,
        kind: AbilityType,
    ) -> BoxFuture<'static, StorageResult<Option<AbilityEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_ability(player_id, kind).await.map_err(Into::into) })
    }

    fn create_event(&self, event: EventEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.create_event(event).await.map_err(Into::into) })
    }

    fn increment_user_stats(&self, delta: UserStatsDelta) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.increment_user_stats(delta).await.map_err(Into::into) })
    }

    fn commit(&self, batch: RoomWriteBatch) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.commit(batch).await.map_err(Into::into) })
    }

    fn save_timer(&self, timer: TimerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_timer(timer).await.map_err(Into::into) })
    }

    fn delete_timers(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.delete_timers(room_id).await.map_err(Into::into) })
    }

    fn load_timers(&self) -> BoxFuture<'static, StorageResult<Vec<TimerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.load_timers().await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
