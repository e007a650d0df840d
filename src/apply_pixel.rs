//! The apply-pixel operator: one compiled expression per output band.

use crate::band::Band;
use crate::chunkbuf::ChunkBuffer;
use crate::cube::{wire, Cube, CubeBase};
use crate::error::{Error, Result};
use crate::expr::{compile, Expr};
use crate::stref::STRef;
use std::sync::{Arc, Weak};

struct CompiledExpr {
    source: String,
    expr: Expr,
    /// Index into the shared per-cell context for each of this
    /// expression's referenced bands, paired with the input band's
    /// index, so evaluation never looks names up again.
    slots: Vec<(usize, usize)>,
}

pub struct ApplyPixelCube {
    base: CubeBase,
    in_cube: Arc<dyn Cube>,
    exprs: Vec<CompiledExpr>,
}

impl ApplyPixelCube {
    pub fn create(in_cube: Arc<dyn Cube>, expressions: Vec<String>, band_names: Option<Vec<String>>) -> Result<Arc<Self>> {
        if expressions.is_empty() {
            return Err(Error::InvalidConfiguration("apply_pixel requires at least one expression".to_string()));
        }
        if let Some(names) = &band_names {
            if names.len() != expressions.len() {
                return Err(Error::InvalidConfiguration(
                    "apply_pixel band_names count must match expr count".to_string(),
                ));
            }
        }

        let in_bands = in_cube.bands();
        let lower_names: Vec<String> = in_bands.iter().map(|b| b.lower_name()).collect();

        let mut compiled = Vec::with_capacity(expressions.len());
        for expr_src in &expressions {
            let (expr, symbols) = compile(expr_src, &lower_names)?;
            let slots = symbols
                .iter()
                .enumerate()
                .map(|(slot, name)| {
                    let band_idx = lower_names.iter().position(|n| n == name).unwrap();
                    (slot, band_idx)
                })
                .collect();
            compiled.push(CompiledExpr { source: expr_src.to_lowercase(), expr, slots });
        }

        let out_bands: Vec<Band> = match band_names {
            Some(names) => names.into_iter().map(Band::new).collect(),
            None => (0..expressions.len()).map(|i| Band::new(format!("band{}", i + 1))).collect(),
        };

        let chunk_size = in_cube.chunk_size();
        let base = CubeBase::new(in_cube.st_ref(), out_bands, chunk_size);
        let cube = Arc::new(ApplyPixelCube { base, in_cube: in_cube.clone(), exprs: compiled });
        wire(&(cube.clone() as Arc<dyn Cube>), &in_cube);
        Ok(cube)
    }
}

impl Cube for ApplyPixelCube {
    fn read_chunk(&self, id: u64) -> Result<ChunkBuffer> {
        let input = self.in_cube.read_chunk(id)?;
        let (_, t, y, x) = input.size();
        if input.is_empty() {
            return Ok(ChunkBuffer::empty_with_bands(self.exprs.len() as u32));
        }
        let in_array = input.array().expect("nonempty buffer has data");

        let mut out = ndarray::Array4::from_elem((self.exprs.len(), t as usize, y as usize, x as usize), f64::NAN);
        let mut ctx = vec![0.0f64; 0];

        for (out_idx, expr) in self.exprs.iter().enumerate() {
            if ctx.len() < expr.slots.len() {
                ctx.resize(expr.slots.len(), 0.0);
            }
            for ti in 0..t as usize {
                for yi in 0..y as usize {
                    for xi in 0..x as usize {
                        let mut any_nan = false;
                        for &(slot, band_idx) in &expr.slots {
                            let v = in_array[(band_idx, ti, yi, xi)];
                            if v.is_nan() {
                                any_nan = true;
                            }
                            ctx[slot] = v;
                        }
                        out[(out_idx, ti, yi, xi)] = if any_nan { f64::NAN } else { expr.expr.eval(&ctx[..expr.slots.len()]) };
                    }
                }
            }
        }
        Ok(ChunkBuffer::from_array(out))
    }

    fn make_constructible_json(&self) -> serde_json::Value {
        let expr_list: Vec<&str> = self.exprs.iter().map(|e| e.source.as_str()).collect();
        serde_json::json!({
            "cube_type": "apply_pixel",
            "expr": expr_list,
            "band_names": self.base.bands().iter().map(|b| b.name.clone()).collect::<Vec<_>>(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datetime::{DateTime, Duration, TimeUnit};
    use chrono::NaiveDate;
    use ndarray::Array4;
    use std::sync::Mutex;

    fn dt(y: i32, m: u32, d: u32) -> DateTime {
        DateTime::from_naive(NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap())
    }

    struct FixedCube {
        base: CubeBase,
        data: Mutex<Array4<f64>>,
    }

    impl Cube for FixedCube {
        fn read_chunk(&self, _id: u64) -> Result<ChunkBuffer> {
            Ok(ChunkBuffer::from_array(self.data.lock().unwrap().clone()))
        }
        fn make_constructible_json(&self) -> serde_json::Value {
            serde_json::json!({"cube_type": "fixed"})
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

    fn fixed_cube() -> Arc<dyn Cube> {
        let st_ref = STRef::builder()
            .with_window(0.0, 0.0, 4.0, 1.0)
            .with_srs("EPSG:4326")
            .with_extent(4, 1, 1)
            .with_time(dt(2020, 1, 1), dt(2020, 1, 2), Duration::new(TimeUnit::Day, 1))
            .build()
            .unwrap();
        let base = CubeBase::new(st_ref, vec![Band::new("b1"), Band::new("b2")], (1, 1, 4));
        let data = Array4::from_shape_vec(
            (2, 1, 1, 4),
            vec![1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0],
        )
        .unwrap();
        Arc::new(FixedCube { base, data: Mutex::new(data) })
    }

    #[test]
    fn apply_pixel_matches_expected_bands() {
        let input = fixed_cube();
        let cube = ApplyPixelCube::create(
            input,
            vec!["b1 + b2".to_string(), "b2 / b1".to_string()],
            None,
        )
        .unwrap();
        let buf = cube.read_chunk(0).unwrap();
        let arr = buf.array().unwrap();
        assert_eq!(arr.slice(ndarray::s![0, 0, 0, ..]).to_vec(), vec![11.0, 22.0, 33.0, 44.0]);
        assert_eq!(arr.slice(ndarray::s![1, 0, 0, ..]).to_vec(), vec![10.0, 10.0, 10.0, 10.0]);
    }

    #[test]
    fn unknown_identifier_fails_construction() {
        let input = fixed_cube();
        let result = ApplyPixelCube::create(input, vec!["unknown + 1".to_string()], None);
        assert!(result.is_err());
    }
}
