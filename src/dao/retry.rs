//! Bounded retry with jittered exponential backoff for store commits that can
//! hit per-room serialization conflicts.

use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::dao::storage::{StorageError, StorageResult};

const MAX_ATTEMPTS: u32 = 5;
const INITIAL_DELAY: Duration = Duration::from_millis(25);
const MAX_DELAY: Duration = Duration::from_millis(500);

/// Run `operation`, retrying retryable storage failures up to five times.
pub async fn commit_with_retry<F>(mut operation: F) -> StorageResult<()>
where
    F: FnMut() -> BoxFuture<'static, StorageResult<()>>,
{
    let mut delay = INITIAL_DELAY;

    for attempt in 1..=MAX_ATTEMPTS {
        match operation().await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                let jittered = jitter(delay);
                warn!(attempt, error = %err, delay_ms = jittered.as_millis() as u64,
                    "store commit conflict; retrying");
                sleep(jittered).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => return Err(err),
        }
    }

    Err(StorageError::Conflict {
        message: "commit retries exhausted".into(),
    })
}

fn jitter(base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let jitter_ms = rand::rng().random_range(0..=base_ms / 2);
    Duration::from_millis(base_ms + jitter_ms)
}
