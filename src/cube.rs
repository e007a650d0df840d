//! Cube trait and DAG wiring.

use crate::band::Band;
use crate::chunkbuf::ChunkBuffer;
use crate::error::Result;
use crate::stref::STRef;
use std::sync::{Arc, Mutex, Weak};

/// A node in the operator DAG: a 4-D regular grid of values computed
/// on demand from its inputs.
///
/// Every operator is pure with respect to its inputs and the
/// external raster store: two successive `read_chunk` calls on an
/// unchanged DAG yield pixel-equal buffers. Implementations must be
/// built through a module-level `create(...)` function that performs
/// the DAG wiring below; a bare struct literal that skips wiring is
/// considered a bug.
pub trait Cube: Send + Sync {
    /// Computes one chunk of this cube's output. May block on I/O.
    fn read_chunk(&self, id: u64) -> Result<ChunkBuffer>;

    /// Emits `{cube_type, ...operator fields, in_cube?}`, a record
    /// that round-trips through the factory.
    fn make_constructible_json(&self) -> serde_json::Value;

    /// Copy-assigns window/SRS/extent/time fields from `r` into this
    /// node's owned reference. Never redirects the pointer: callers
    /// continue to hold the same `STRef` value, now updated.
    fn set_st_reference(&self, r: STRef);

    fn st_ref(&self) -> STRef;

    fn bands(&self) -> Vec<Band>;

    fn chunk_size(&self) -> (u32, u32, u32);

    fn count_chunks(&self) -> u64;

    /// Records a weak back-reference to a newly constructed parent.
    /// Parents exist only for introspection; `read_chunk` never
    /// walks them.
    fn register_parent(&self, parent: Weak<dyn Cube>);

    /// Weak handles to every cube that currently owns this one as an
    /// input, for diagnostics only.
    fn parents(&self) -> Vec<Weak<dyn Cube>>;
}

/// Shared base embedded in every concrete cube type: owns the STRef,
/// band list, chunk size, and the weak parent list. Mirrors the
/// "owned forward / weak backward" wiring discipline used throughout
/// the DAG.
pub struct CubeBase {
    st_ref: Mutex<STRef>,
    bands: Vec<Band>,
    chunk_size: (u32, u32, u32),
    parents: Mutex<Vec<Weak<dyn Cube>>>,
}

impl CubeBase {
    pub fn new(st_ref: STRef, bands: Vec<Band>, chunk_size: (u32, u32, u32)) -> Self {
        CubeBase {
            st_ref: Mutex::new(st_ref),
            bands,
            chunk_size,
            parents: Mutex::new(Vec::new()),
        }
    }

    pub fn st_ref(&self) -> STRef {
        self.st_ref.lock().unwrap().clone()
    }

    pub fn set_st_reference(&self, r: STRef) {
        *self.st_ref.lock().unwrap() = r;
    }

    pub fn bands(&self) -> Vec<Band> {
        self.bands.clone()
    }

    pub fn chunk_size(&self) -> (u32, u32, u32) {
        self.chunk_size
    }

    pub fn register_parent(&self, parent: Weak<dyn Cube>) {
        self.parents.lock().unwrap().push(parent);
    }

    pub fn parents(&self) -> Vec<Weak<dyn Cube>> {
        self.parents.lock().unwrap().clone()
    }

    /// `count_chunks` from an `STRef` and this base's chunk size;
    /// shared by every operator since DAG chunk geometry always
    /// matches the node's own `STRef`.
    pub fn count_chunks(&self) -> u64 {
        let st_ref = self.st_ref();
        crate::stref::ChunkGeometry::new(st_ref, self.chunk_size)
            .map(|g| g.count_chunks())
            .unwrap_or(0)
    }
}

/// Wires `parent` as a consumer of `child`: `parent` owns a strong
/// reference to `child` (held by the caller's own field), and
/// `child` records a weak back-reference to `parent`. Every
/// operator's `create` function calls this once per input cube after
/// constructing itself; direct construction that skips this call is
/// a bug, per the DAG wiring discipline.
pub fn wire(parent: &Arc<dyn Cube>, child: &Arc<dyn Cube>) {
    child.register_parent(Arc::downgrade(parent));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datetime::{DateTime, Duration, TimeUnit};
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32) -> DateTime {
        DateTime::from_naive(NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap())
    }

    fn sample_stref() -> STRef {
        STRef::builder()
            .with_window(0.0, 0.0, 10.0, 10.0)
            .with_srs("EPSG:4326")
            .with_extent(10, 10, 4)
            .with_time(dt(2020, 1, 1), dt(2020, 1, 5), Duration::new(TimeUnit::Day, 1))
            .build()
            .unwrap()
    }

    #[test]
    fn base_tracks_parents_and_st_ref_copy() {
        let base = CubeBase::new(sample_stref(), vec![Band::new("b1")], (2, 5, 5));
        assert_eq!(base.count_chunks(), 2 * 2 * 2);
        assert!(base.parents().is_empty());

        let mut updated = base.st_ref();
        updated.left = -1.0;
        base.set_st_reference(updated.clone());
        assert_eq!(base.st_ref().left, -1.0);
    }
}
