//! Bounded, thread-safe chunk cache.
//!
//! Serves two duties: memoization across repeated downloads, and the
//! rendezvous point the server's per-chunk state machine reads from
//! once a computation finishes.

use crate::chunkbuf::ChunkBuffer;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

pub type CacheKey = (u32, u64);

struct Inner {
    entries: LruCache<CacheKey, Arc<ChunkBuffer>>,
    total_bytes: u64,
    budget_bytes: u64,
}

/// Bounded mapping from `(cube_id, chunk_id)` to chunk buffer. `get`
/// returns a shared handle (`Arc`) whose buffer remains valid after
/// eviction for as long as any holder retains it.
pub struct ChunkCache {
    inner: Mutex<Inner>,
}

impl ChunkCache {
    pub fn new(budget_bytes: u64) -> Self {
        ChunkCache {
            inner: Mutex::new(Inner {
                // LruCache needs a nonzero capacity hint; the real
                // bound is enforced by `budget_bytes` in `add`, so an
                // arbitrarily large capacity just avoids a spurious
                // entry-count eviction before the byte budget kicks in.
                entries: LruCache::new(NonZeroUsize::new(1 << 20).unwrap()),
                total_bytes: 0,
                budget_bytes,
            }),
        }
    }

    pub fn has(&self, key: CacheKey) -> bool {
        self.inner.lock().unwrap().entries.contains(&key)
    }

    pub fn get(&self, key: CacheKey) -> Option<Arc<ChunkBuffer>> {
        self.inner.lock().unwrap().entries.get(&key).cloned()
    }

    /// Inserts `buffer`, evicting least-recently-used entries until
    /// it fits the byte budget. An entry larger than the whole
    /// budget is stored anyway as the sole entry — a `start`ed chunk
    /// must always eventually reach `finished`, never be silently
    /// dropped for being too large.
    pub fn add(&self, key: CacheKey, buffer: ChunkBuffer) {
        let mut inner = self.inner.lock().unwrap();
        let size = buffer.total_size_bytes();

        while inner.total_bytes + size > inner.budget_bytes {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => {
                    inner.total_bytes = inner.total_bytes.saturating_sub(evicted.total_size_bytes());
                }
                None => break,
            }
        }

        if let Some(prev) = inner.entries.put(key, Arc::new(buffer)) {
            inner.total_bytes = inner.total_bytes.saturating_sub(prev.total_size_bytes());
        }
        inner.total_bytes += size;
    }

    pub fn remove(&self, key: CacheKey) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(removed) = inner.entries.pop(&key) {
            inner.total_bytes = inner.total_bytes.saturating_sub(removed.total_size_bytes());
        }
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.inner.lock().unwrap().total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_get_round_trips() {
        let cache = ChunkCache::new(1 << 20);
        let key = (1, 0);
        assert!(!cache.has(key));
        cache.add(key, ChunkBuffer::nan_filled(1, 1, 2, 2));
        assert!(cache.has(key));
        assert_eq!(cache.get(key).unwrap().size(), (1, 1, 2, 2));
        assert_eq!(cache.total_size_bytes(), 1 * 1 * 2 * 2 * 8);
    }

    #[test]
    fn eviction_respects_byte_budget() {
        let one_entry_bytes = 1 * 1 * 2 * 2 * 8u64;
        let cache = ChunkCache::new(one_entry_bytes);
        cache.add((1, 0), ChunkBuffer::nan_filled(1, 1, 2, 2));
        cache.add((1, 1), ChunkBuffer::nan_filled(1, 1, 2, 2));
        // Only the most recently added entry should remain.
        assert!(!cache.has((1, 0)));
        assert!(cache.has((1, 1)));
        assert_eq!(cache.total_size_bytes(), one_entry_bytes);
    }

    #[test]
    fn oversized_entry_stored_as_sole_entry() {
        let cache = ChunkCache::new(8);
        cache.add((1, 0), ChunkBuffer::nan_filled(1, 1, 2, 2));
        assert!(cache.has((1, 0)));
    }

    #[test]
    fn remove_updates_total_bytes() {
        let cache = ChunkCache::new(1 << 20);
        cache.add((1, 0), ChunkBuffer::nan_filled(1, 1, 2, 2));
        cache.remove((1, 0));
        assert!(!cache.has((1, 0)));
        assert_eq!(cache.total_size_bytes(), 0);
    }
}
