//! The filter-predicate operator: masks whole cells on a boolean test.

use crate::band::Band;
use crate::chunkbuf::ChunkBuffer;
use crate::cube::{wire, Cube, CubeBase};
use crate::error::Result;
use crate::expr::{compile, Expr};
use crate::stref::STRef;
use std::sync::{Arc, Weak};

pub struct FilterPredicateCube {
    base: CubeBase,
    in_cube: Arc<dyn Cube>,
    predicate_source: String,
    predicate: Expr,
    /// `(context slot, input band index)` for each identifier the
    /// predicate references.
    slots: Vec<(usize, usize)>,
}

impl FilterPredicateCube {
    pub fn create(in_cube: Arc<dyn Cube>, predicate: String) -> Result<Arc<Self>> {
        let in_bands = in_cube.bands();
        let lower_names: Vec<String> = in_bands.iter().map(|b| b.lower_name()).collect();
        let (expr, symbols) = compile(&predicate, &lower_names)?;
        let slots = symbols
            .iter()
            .enumerate()
            .map(|(slot, name)| (slot, lower_names.iter().position(|n| n == name).unwrap()))
            .collect();

        let chunk_size = in_cube.chunk_size();
        let base = CubeBase::new(in_cube.st_ref(), in_bands, chunk_size);
        let cube = Arc::new(FilterPredicateCube {
            base,
            in_cube: in_cube.clone(),
            predicate_source: predicate.to_lowercase(),
            predicate: expr,
            slots,
        });
        wire(&(cube.clone() as Arc<dyn Cube>), &in_cube);
        Ok(cube)
    }
}

impl Cube for FilterPredicateCube {
    fn read_chunk(&self, id: u64) -> Result<ChunkBuffer> {
        let input = self.in_cube.read_chunk(id)?;
        if input.is_empty() {
            return Ok(ChunkBuffer::empty_with_bands(self.base.bands().len() as u32));
        }
        let in_array = input.array().expect("nonempty buffer has data");
        let shape = in_array.raw_dim();
        let mut out = in_array.clone();
        let mut ctx = vec![0.0f64; self.slots.len()];

        let (bands, t, y, x) = (shape[0], shape[1], shape[2], shape[3]);
        for ti in 0..t {
            for yi in 0..y {
                for xi in 0..x {
                    for &(slot, band_idx) in &self.slots {
                        ctx[slot] = in_array[(band_idx, ti, yi, xi)];
                    }
                    if !truthy(self.predicate.eval(&ctx)) {
                        for b in 0..bands {
                            out[(b, ti, yi, xi)] = f64::NAN;
                        }
                    }
                }
            }
        }

        Ok(ChunkBuffer::from_array(out))
    }

    fn make_constructible_json(&self) -> serde_json::Value {
        serde_json::json!({
            "cube_type": "filter_predicate",
            "predicate": self.predicate_source,
            "in_cube": self.in_cube.make_constructible_json(),
        })
    }

    fn set_st_reference(&self, r: STRef) {
        self.base.set_st_reference(r);
    }

    fn st_ref(&self) -> STRef {
        self.base.st_ref()
    }

    fn bands(&self) -> Vec<Band> {
        self.base.bands()
    }

    fn chunk_size(&self) -> (u32, u32, u32) {
        self.base.chunk_size()
    }

    fn count_chunks(&self) -> u64 {
        self.base.count_chunks()
    }

    fn register_parent(&self, parent: Weak<dyn Cube>) {
        self.base.register_parent(parent);
    }

    fn parents(&self) -> Vec<Weak<dyn Cube>> {
        self.base.parents()
    }
}

/// A cell with any NaN input to the predicate evaluates falsy, since
/// the expression engine has no three-valued logic and a NaN
/// comparison already yields `0.0` through IEEE ordering.
fn truthy(v: f64) -> bool {
    v != 0.0 && !v.is_nan()
}
