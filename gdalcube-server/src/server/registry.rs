//! Cube registry: maps a server-assigned id to a constructed cube.

use gdalcube::prelude::Cube;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Holds every cube the server has constructed, keyed by a monotonic
/// id handed out at `POST /cube` time. Ids are never reused.
pub struct CubeRegistry {
    cubes: Mutex<HashMap<u32, Arc<dyn Cube>>>,
    next_id: AtomicU32,
}

impl CubeRegistry {
    pub fn new() -> Self {
        CubeRegistry { cubes: Mutex::new(HashMap::new()), next_id: AtomicU32::new(1) }
    }

    /// Inserts `cube` under a fresh id and returns it.
    pub fn insert(&self, cube: Arc<dyn Cube>) -> u32 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.cubes.lock().unwrap().insert(id, cube);
        id
    }

    pub fn get(&self, id: u32) -> Option<Arc<dyn Cube>> {
        self.cubes.lock().unwrap().get(&id).cloned()
    }
}

impl Default for CubeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
