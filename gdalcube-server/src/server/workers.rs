//! Worker pool: a bounded set of long-lived threads draining a shared
//! pending queue, with chunk results landing in the shared cache.

use super::chunkstate::{ChunkKey, ChunkStateTable};
use super::registry::CubeRegistry;
use gdalcube::prelude::{Cube, ChunkCache};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

struct Shared {
    pending: Mutex<VecDeque<ChunkKey>>,
    pending_cv: Condvar,
    registry: Arc<CubeRegistry>,
    states: Arc<ChunkStateTable>,
    cache: Arc<ChunkCache>,
}

/// Dispatches chunk computations onto at most `max_workers` long-lived
/// threads. Lock order when touching more than one shared structure:
/// registry, then pending, then running (the per-key state inside
/// `ChunkStateTable`).
pub struct WorkerPool {
    shared: Arc<Shared>,
    max_workers: u32,
    live_workers: AtomicU32,
}

impl WorkerPool {
    pub fn new(
        max_workers: u32,
        registry: Arc<CubeRegistry>,
        states: Arc<ChunkStateTable>,
        cache: Arc<ChunkCache>,
    ) -> Self {
        WorkerPool {
            shared: Arc::new(Shared {
                pending: Mutex::new(VecDeque::new()),
                pending_cv: Condvar::new(),
                registry,
                states,
                cache,
            }),
            max_workers: max_workers.max(1),
            live_workers: AtomicU32::new(0),
        }
    }

    /// Requests computation of `key`. A no-op if the chunk is already
    /// queued, running, or finished. Spawns a fresh worker thread
    /// while under `max_workers`; otherwise enqueues and wakes an
    /// idle worker.
    pub fn start(&self, key: ChunkKey) {
        if !self.shared.states.mark_queued(key) {
            return;
        }
        self.shared.pending.lock().unwrap().push_back(key);

        if self.live_workers.load(Ordering::SeqCst) < self.max_workers {
            self.live_workers.fetch_add(1, Ordering::SeqCst);
            let shared = self.shared.clone();
            thread::spawn(move || worker_loop(shared));
        } else {
            self.shared.pending_cv.notify_one();
        }
    }
}

/// One worker's drain loop: pop the head of `pending`, compute it,
/// record the outcome, repeat; block on the pool condvar once the
/// queue empties.
fn worker_loop(shared: Arc<Shared>) {
    loop {
        let key = {
            let mut pending = shared.pending.lock().unwrap();
            loop {
                if let Some(key) = pending.pop_front() {
                    break key;
                }
                pending = shared.pending_cv.wait(pending).unwrap();
            }
        };

        shared.states.mark_running(key);
        let (cube_id, chunk_id) = key;
        let cube = shared.registry.get(cube_id);
        match cube {
            Some(cube) => match cube.read_chunk(chunk_id) {
                Ok(buffer) => {
                    shared.cache.add((cube_id, chunk_id), buffer);
                    shared.states.mark_finished(key);
                }
                Err(e) => {
                    log::warn!("chunk ({cube_id}, {chunk_id}) failed: {e}");
                    shared.states.mark_failed(key, e.to_string());
                }
            },
            None => {
                shared.states.mark_failed(key, format!("cube {cube_id} no longer registered"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdalcube::prelude::{
        AggregationMethod, DateTime, Duration, ImageCollectionCube, MemoryBackend, STRef, TimeUnit,
        VecImageCollection, View,
    };
    use std::time::Duration as StdDuration;

    fn naive(y: i32, m: u32, d: u32) -> DateTime {
        DateTime::from_naive(chrono::NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap())
    }

    #[test]
    fn start_computes_and_finishes_a_chunk() {
        let collection = Arc::new(VecImageCollection::new(vec![], vec![]));
        let backend = Arc::new(MemoryBackend::new());
        let st_ref = STRef::builder()
            .with_window(0.0, 0.0, 1.0, 1.0)
            .with_srs("EPSG:4326")
            .with_extent(1, 1, 1)
            .with_time(naive(2020, 1, 1), naive(2020, 1, 2), Duration::new(TimeUnit::Day, 1))
            .build()
            .unwrap();
        let cube = ImageCollectionCube::create(
            collection,
            backend,
            st_ref,
            (1, 1, 1),
            View { aggregation: AggregationMethod::First, resampling: "near".into(), num_threads: 1 },
        )
        .unwrap();

        let registry = Arc::new(CubeRegistry::new());
        let cube_id = registry.insert(cube as Arc<dyn Cube>);
        let states = Arc::new(ChunkStateTable::new());
        let cache = Arc::new(ChunkCache::new(1 << 20));
        let pool = WorkerPool::new(2, registry, states.clone(), cache.clone());

        pool.start((cube_id, 0));
        let status = states.wait_until_done((cube_id, 0));
        assert_eq!(status, Some(super::super::chunkstate::ChunkState::Finished));
        assert!(cache.has((cube_id, 0)));

        // Second start is idempotent; it should not requeue.
        pool.start((cube_id, 0));
        thread::sleep(StdDuration::from_millis(10));
        assert_eq!(states.status((cube_id, 0)).as_status_str(), "finished");
    }
}
