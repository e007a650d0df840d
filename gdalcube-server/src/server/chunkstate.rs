//! Per-chunk state machine and download rendezvous.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

pub type ChunkKey = (u32, u64);

/// Observable lifecycle of one `(cube_id, chunk_id)` computation, plus
/// the ambient `Failed` state a worker reports when `read_chunk`
/// returns an error instead of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkState {
    NotRequested,
    Queued,
    Running,
    Finished,
    Failed(String),
}

impl ChunkState {
    /// The string `GET .../status` serves. `Failed` is reported as
    /// `failed` rather than folded back into `notrequested`, so a
    /// chunk that errored out is observable instead of looking stuck
    /// between `running` and `notrequested`; `start` still accepts a
    /// failed key and re-queues it.
    pub fn as_status_str(&self) -> &'static str {
        match self {
            ChunkState::NotRequested => "notrequested",
            ChunkState::Queued => "queued",
            ChunkState::Running => "running",
            ChunkState::Finished => "finished",
            ChunkState::Failed(_) => "failed",
        }
    }

    fn is_done(&self) -> bool {
        matches!(self, ChunkState::Finished | ChunkState::Failed(_))
    }
}

type Slot = Arc<(Mutex<ChunkState>, Condvar)>;

/// One mutex-guarded state plus condvar per key, replacing the source
/// system's three parallel `pending`/`running`/`cache` collections
/// with a single lookup keyed on `(cube_id, chunk_id)`.
pub struct ChunkStateTable {
    slots: Mutex<HashMap<ChunkKey, Slot>>,
}

impl ChunkStateTable {
    pub fn new() -> Self {
        ChunkStateTable { slots: Mutex::new(HashMap::new()) }
    }

    fn slot_for(&self, key: ChunkKey) -> Option<Slot> {
        self.slots.lock().unwrap().get(&key).cloned()
    }

    pub fn status(&self, key: ChunkKey) -> ChunkState {
        match self.slot_for(key) {
            Some(slot) => slot.0.lock().unwrap().clone(),
            None => ChunkState::NotRequested,
        }
    }

    /// Moves a `NotRequested` (or previously `Failed`) key to
    /// `Queued`. A no-op, returning `false`, for any other current
    /// state — `start` is idempotent.
    pub fn mark_queued(&self, key: ChunkKey) -> bool {
        let mut slots = self.slots.lock().unwrap();
        match slots.get(&key) {
            None => {
                slots.insert(key, Arc::new((Mutex::new(ChunkState::Queued), Condvar::new())));
                true
            }
            Some(slot) => {
                let mut state = slot.0.lock().unwrap();
                if matches!(*state, ChunkState::NotRequested | ChunkState::Failed(_)) {
                    *state = ChunkState::Queued;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn mark_running(&self, key: ChunkKey) {
        if let Some(slot) = self.slot_for(key) {
            *slot.0.lock().unwrap() = ChunkState::Running;
        }
    }

    pub fn mark_finished(&self, key: ChunkKey) {
        self.transition(key, ChunkState::Finished);
    }

    pub fn mark_failed(&self, key: ChunkKey, message: String) {
        self.transition(key, ChunkState::Failed(message));
    }

    fn transition(&self, key: ChunkKey, next: ChunkState) {
        if let Some(slot) = self.slot_for(key) {
            *slot.0.lock().unwrap() = next;
            slot.1.notify_all();
        }
    }

    /// Blocks until `key` reaches `Finished` or `Failed`. Returns
    /// `None` if the key was never requested at all (`GET .../status`
    /// would return 404 territory) rather than blocking forever.
    pub fn wait_until_done(&self, key: ChunkKey) -> Option<ChunkState> {
        let slot = self.slot_for(key)?;
        let mut state = slot.0.lock().unwrap();
        while !state.is_done() {
            state = slot.1.wait(state).unwrap();
        }
        Some(state.clone())
    }
}

impl Default for ChunkStateTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn start_is_idempotent() {
        let table = ChunkStateTable::new();
        let key = (1, 0);
        assert!(table.mark_queued(key));
        assert!(!table.mark_queued(key));
        assert_eq!(table.status(key), ChunkState::Queued);
    }

    #[test]
    fn unrequested_status_reports_notrequested() {
        let table = ChunkStateTable::new();
        assert_eq!(table.status((1, 0)).as_status_str(), "notrequested");
    }

    #[test]
    fn wait_until_done_unblocks_on_finish() {
        let table = Arc::new(ChunkStateTable::new());
        let key = (1, 0);
        table.mark_queued(key);
        table.mark_running(key);

        let waiter_table = table.clone();
        let waiter = thread::spawn(move || waiter_table.wait_until_done(key));

        thread::sleep(Duration::from_millis(20));
        table.mark_finished(key);

        assert_eq!(waiter.join().unwrap(), Some(ChunkState::Finished));
    }

    #[test]
    fn never_requested_key_does_not_block() {
        let table = ChunkStateTable::new();
        assert_eq!(table.wait_until_done((9, 9)), None);
    }

    #[test]
    fn failed_status_is_observable_and_can_be_restarted() {
        let table = ChunkStateTable::new();
        let key = (1, 0);
        table.mark_queued(key);
        table.mark_running(key);
        table.mark_failed(key, "boom".to_string());

        assert_eq!(table.status(key).as_status_str(), "failed");
        assert!(table.mark_queued(key));
        assert_eq!(table.status(key).as_status_str(), "queued");
    }
}
