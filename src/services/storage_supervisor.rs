//! Keeps a storage backend attached to the shared state. The supervisor
//! connects with backoff, watches the backend's health, and flips the
//! degraded flag so durable work is refused while the database is away.
//! Whenever a connection is (re)established it also reloads the durable
//! phase timers: a server that came up before its database still has to
//! resume every room's clock once the database appears.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{room_store::RoomStore, storage::StorageError},
    services::timer_service,
    state::SharedState,
};

const CONNECT_BACKOFF_FLOOR: Duration = Duration::from_millis(500);
const CONNECT_BACKOFF_CEIL: Duration = Duration::from_secs(15);
const HEALTH_INTERVAL: Duration = Duration::from_secs(7);
const RECONNECT_BUDGET: u32 = 4;

/// Supervise the storage connection for the lifetime of the process.
///
/// `connect` builds a fresh backend; it is called again from scratch whenever
/// in-place reconnects stop helping.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn RoomStore>, StorageError>> + Send,
{
    let mut backoff = CONNECT_BACKOFF_FLOOR;

    loop {
        let store = match connect().await {
            Ok(store) => store,
            Err(err) => {
                warn!(error = %err, retry_in = ?backoff, "storage connect failed");
                sleep(backoff).await;
                backoff = (backoff * 2).min(CONNECT_BACKOFF_CEIL);
                continue;
            }
        };

        state.install_game_store(store.clone()).await;
        timer_service::load_persisted(&state).await;
        info!("storage attached; durable phase timers reloaded");
        backoff = CONNECT_BACKOFF_FLOOR;

        watch_health(&state, store.as_ref()).await;

        // In-place reconnects are exhausted; drop the dead backend and build
        // a fresh connection from scratch.
        state.clear_game_store().await;
    }
}

/// Poll the backend until reconnect attempts stop helping, keeping the
/// degraded flag in sync with what the polls observe.
async fn watch_health(state: &SharedState, store: &dyn RoomStore) {
    loop {
        sleep(HEALTH_INTERVAL).await;

        if store.health_check().await.is_ok() {
            state.update_degraded(false).await;
            continue;
        }

        state.update_degraded(true).await;
        warn!("storage health check failed; attempting in-place reconnect");

        let mut revived = false;
        for attempt in 1..=RECONNECT_BUDGET {
            match store.try_reconnect().await {
                Ok(()) => {
                    revived = true;
                    break;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "storage reconnect failed");
                    sleep(CONNECT_BACKOFF_FLOOR * attempt).await;
                }
            }
        }

        if !revived {
            warn!("storage reconnect budget exhausted; rebuilding the connection");
            return;
        }

        info!("storage reconnected");
        state.update_degraded(false).await;
    }
}
