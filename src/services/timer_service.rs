//! Durable phase-expiry timers: a deadline-sorted queue plus the dispatcher
//! loop that drives phase transitions when rooms time out.
//!
//! The in-memory queue is the scheduling head; the durable copy of every
//! entry rides the same store batch as the transition that armed it, so a
//! restarted process reloads and drains whatever was pending.

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    sync::Mutex,
    time::{Duration, SystemTime},
};

use tokio::{sync::Notify, time::sleep};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::TimerEntity,
    services::phase_service,
    state::{SharedState, phase::RoomPhase},
};

/// Dispatcher wake-up cadence when no deadline is nearer.
const TICK: Duration = Duration::from_secs(1);
/// Delay before re-arming a timer whose transition failed.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// One scheduled expiry: when `deadline` passes and the room is still in
/// `phase`, the room advances. Stale entries are dropped silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEntry {
    pub room_id: Uuid,
    pub phase: RoomPhase,
    pub deadline: SystemTime,
}

#[derive(PartialEq, Eq)]
struct HeapEntry {
    deadline: SystemTime,
    room_id: Uuid,
    phase: RoomPhase,
    epoch: u64,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.room_id.cmp(&other.room_id))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueInner {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    /// Cancellation epochs: entries carrying an older epoch for their room
    /// are dead and skipped on pop.
    epochs: HashMap<Uuid, u64>,
}

/// Deadline-sorted queue shared between the per-room services (producers)
/// and the dispatcher loop (consumer).
pub struct TimerQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
        }
    }

    /// Arm an expiry for a room. Does not cancel earlier entries; an
    /// immediate-expiry entry may coexist with the regular one and the stale
    /// check at dispatch sorts it out.
    pub fn schedule(&self, room_id: Uuid, phase: RoomPhase, deadline: SystemTime) {
        {
            let mut guard = self.inner.lock().expect("timer queue poisoned");
            let epoch = guard.epochs.get(&room_id).copied().unwrap_or(0);
            guard.heap.push(Reverse(HeapEntry {
                deadline,
                room_id,
                phase,
                epoch,
            }));
        }
        self.notify.notify_one();
    }

    /// Drop every scheduled entry for a room.
    pub fn cancel(&self, room_id: Uuid) {
        let mut guard = self.inner.lock().expect("timer queue poisoned");
        *guard.epochs.entry(room_id).or_insert(0) += 1;
    }

    /// Atomically pop all entries with `deadline <= now`, skipping cancelled
    /// ones.
    pub fn pop_expired(&self, now: SystemTime) -> Vec<TimerEntry> {
        let mut guard = self.inner.lock().expect("timer queue poisoned");
        let mut expired = Vec::new();

        while let Some(Reverse(head)) = guard.heap.peek() {
            if head.deadline > now {
                break;
            }
            let head = guard.heap.pop().expect("peeked entry vanished").0;
            let current = guard.epochs.get(&head.room_id).copied().unwrap_or(0);
            if head.epoch != current {
                continue;
            }
            expired.push(TimerEntry {
                room_id: head.room_id,
                phase: head.phase,
                deadline: head.deadline,
            });
        }

        expired
    }

    /// Time until the nearest live deadline, if any.
    pub fn until_next(&self, now: SystemTime) -> Option<Duration> {
        let guard = self.inner.lock().expect("timer queue poisoned");
        guard
            .heap
            .peek()
            .map(|Reverse(head)| head.deadline.duration_since(now).unwrap_or(Duration::ZERO))
    }

    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Reload durable timers into the in-memory queue. Past-due entries are
/// drained by the first dispatcher pass.
pub async fn load_persisted(state: &SharedState) {
    let Some(store) = state.game_store().await else {
        return;
    };

    match store.load_timers().await {
        Ok(timers) => {
            let count = timers.len();
            for TimerEntity {
                room_id,
                phase,
                deadline,
            } in timers
            {
                state.timers().schedule(room_id, phase, deadline);
            }
            if count > 0 {
                info!(count, "reloaded durable phase timers");
            }
        }
        Err(err) => warn!(error = %err, "failed to reload durable timers"),
    }
}

/// Dispatcher loop: wakes at least every second, pops expired entries, and
/// advances the owning rooms.
pub async fn run_dispatcher(state: SharedState) {
    load_persisted(&state).await;

    loop {
        let now = SystemTime::now();
        for entry in state.timers().pop_expired(now) {
            handle_expiry(&state, entry).await;
        }

        let sleep_for = state
            .timers()
            .until_next(SystemTime::now())
            .map_or(TICK, |until| until.min(TICK));

        tokio::select! {
            _ = sleep(sleep_for) => {}
            _ = state.timers().notified() => {}
        }
    }
}

async fn handle_expiry(state: &SharedState, entry: TimerEntry) {
    let Some(handle) = state.room(entry.room_id) else {
        return;
    };

    let mut inner = handle.lock().await;
    if inner.room.phase != entry.phase {
        // Stale: the room moved on before the deadline fired.
        return;
    }

    let Some(next) = entry.phase.next() else {
        return;
    };

    if let Err(err) = phase_service::transition_to(state, &mut inner, next).await {
        error!(
            room_id = %entry.room_id, phase = ?entry.phase, error = %err,
            "phase transition failed; re-arming timer"
        );
        state
            .timers()
            .schedule(entry.room_id, entry.phase, SystemTime::now() + RETRY_DELAY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn pops_in_deadline_order() {
        let queue = TimerQueue::new();
        let now = SystemTime::now();
        let early = Uuid::new_v4();
        let late = Uuid::new_v4();

        queue.schedule(late, RoomPhase::NightPhase, now + Duration::from_secs(2));
        queue.schedule(early, RoomPhase::DayVoting, now + Duration::from_secs(1));

        let expired = queue.pop_expired(now + Duration::from_secs(3));
        assert_eq!(expired.len(), 2);
        assert_eq!(expired[0].room_id, early);
        assert_eq!(expired[1].room_id, late);
    }

    #[test]
    fn future_entries_stay_queued() {
        let queue = TimerQueue::new();
        let now = SystemTime::now();
        queue.schedule(
            Uuid::new_v4(),
            RoomPhase::NightPhase,
            now + Duration::from_secs(60),
        );
        assert!(queue.pop_expired(now).is_empty());
        assert!(queue.until_next(now).unwrap() <= Duration::from_secs(60));
    }

    #[test]
    fn cancel_invalidates_scheduled_entries() {
        let queue = TimerQueue::new();
        let now = SystemTime::now();
        let room_id = Uuid::new_v4();

        queue.schedule(room_id, RoomPhase::NightPhase, now);
        queue.cancel(room_id);
        assert!(queue.pop_expired(now + Duration::from_secs(1)).is_empty());

        // A fresh entry scheduled after the cancel is live again.
        queue.schedule(room_id, RoomPhase::DayDiscussion, now);
        let expired = queue.pop_expired(now + Duration::from_secs(1));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].phase, RoomPhase::DayDiscussion);
    }
}
