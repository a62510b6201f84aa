mod error;
mod models;
pub mod store;

pub use error::MongoDaoError;
pub use store::MongoRoomStore;

use crate::dao::storage::StorageError;

mod config;
pub use config::MongoConfig;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        match err {
            MongoDaoError::TransientCommit { .. } => StorageError::Conflict {
                message: err.to_string(),
            },
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
