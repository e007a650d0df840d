//! Server-side state: the cube registry, per-chunk state machine, and
//! worker pool that back the HTTP surface in [`crate::http`].

pub mod chunkstate;
pub mod registry;
pub mod workers;

use chunkstate::ChunkStateTable;
use gdalcube::factory::FactoryContext;
use gdalcube::prelude::ChunkCache;
use registry::CubeRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use workers::WorkerPool;

/// All shared state one running server instance owns. Cloned cheaply
/// (every field is already an `Arc`, or small) and handed to each
/// HTTP request handler.
#[derive(Clone)]
pub struct ServerState {
    pub registry: Arc<CubeRegistry>,
    pub states: Arc<ChunkStateTable>,
    pub cache: Arc<ChunkCache>,
    pub workers: Arc<WorkerPool>,
    pub workdir: PathBuf,
    pub base_path: String,
    pub factory_ctx: FactoryContext,
}

impl ServerState {
    pub fn new(
        max_workers: u32,
        cache_budget_bytes: u64,
        workdir: PathBuf,
        base_path: String,
        factory_ctx: FactoryContext,
    ) -> Self {
        let registry = Arc::new(CubeRegistry::new());
        let states = Arc::new(ChunkStateTable::new());
        let cache = Arc::new(ChunkCache::new(cache_budget_bytes));
        let workers = Arc::new(WorkerPool::new(
            max_workers,
            registry.clone(),
            states.clone(),
            cache.clone(),
        ));
        ServerState { registry, states, cache, workers, workdir, base_path, factory_ctx }
    }
}
