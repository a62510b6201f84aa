use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to save room `{id}`")]
    SaveRoom {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load room `{id}`")]
    LoadRoom {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to query rooms")]
    QueryRooms {
        #[source]
        source: MongoError,
    },
    #[error("failed to save player `{id}`")]
    SavePlayer {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to delete player `{id}`")]
    DeletePlayer {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to query players for room `{room_id}`")]
    QueryPlayers {
        room_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to save action for performer `{performer_id}`")]
    SaveAction {
        performer_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to query actions")]
    QueryActions {
        #[source]
        source: MongoError,
    },
    #[error("failed to purge actions for room `{room_id}`")]
    PurgeActions {
        room_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to save ability for player `{player_id}`")]
    SaveAbility {
        player_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load ability for player `{player_id}`")]
    LoadAbility {
        player_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to append event for room `{room_id}`")]
    SaveEvent {
        room_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to save timer for room `{room_id}`")]
    SaveTimer {
        room_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to delete timers for room `{room_id}`")]
    DeleteTimers {
        room_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load timers")]
    LoadTimers {
        #[source]
        source: MongoError,
    },
    #[error("failed to update stats for user `{user_id}`")]
    UpdateStats {
        user_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to start or run a room transaction")]
    Transaction {
        #[source]
        source: MongoError,
    },
    #[error("room transaction hit a transient conflict")]
    TransientCommit {
        #[source]
        source: MongoError,
    },
    #[error("failed to encode document for collection `{collection}`")]
    Encode {
        collection: &'static str,
        #[source]
        source: mongodb::bson::ser::Error,
    },
}
