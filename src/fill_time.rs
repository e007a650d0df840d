//! The fill-time operator: temporal gap-fill along the time axis.

use crate::band::Band;
use crate::chunkbuf::ChunkBuffer;
use crate::cube::{wire, Cube, CubeBase};
use crate::error::Result;
use crate::stref::STRef;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMethod {
    Near,
    Linear,
    Locf,
    Nocb,
}

impl FillMethod {
    /// Invalid method strings downgrade to `near` with a warning,
    /// rather than failing construction.
    pub fn parse_or_warn(s: &str) -> Self {
        match s {
            "near" => FillMethod::Near,
            "linear" => FillMethod::Linear,
            "locf" => FillMethod::Locf,
            "nocb" => FillMethod::Nocb,
            other => {
                log::warn!("invalid fill-time method '{other}', falling back to 'near'");
                FillMethod::Near
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FillMethod::Near => "near",
            FillMethod::Linear => "linear",
            FillMethod::Locf => "locf",
            FillMethod::Nocb => "nocb",
        }
    }
}

pub struct FillTimeCube {
    base: CubeBase,
    in_cube: Arc<dyn Cube>,
    method: FillMethod,
}

impl FillTimeCube {
    pub fn create(in_cube: Arc<dyn Cube>, method: &str) -> Result<Arc<Self>> {
        let method = FillMethod::parse_or_warn(method);
        let bands = in_cube.bands();
        let chunk_size = in_cube.chunk_size();
        let base = CubeBase::new(in_cube.st_ref(), bands, chunk_size);
        let cube = Arc::new(FillTimeCube { base, in_cube: in_cube.clone(), method });
        wire(&(cube.clone() as Arc<dyn Cube>), &in_cube);
        Ok(cube)
    }
}

impl Cube for FillTimeCube {
    fn read_chunk(&self, id: u64) -> Result<ChunkBuffer> {
        let input = self.in_cube.read_chunk(id)?;
        if input.is_empty() {
            return Ok(ChunkBuffer::empty_with_bands(self.base.bands().len() as u32));
        }
        let arr = input.array().expect("nonempty buffer has data");
        let shape = arr.raw_dim();
        let (bands, t, y, x) = (shape[0], shape[1], shape[2], shape[3]);
        let mut out = arr.clone();

        for b in 0..bands {
            for yi in 0..y {
                for xi in 0..x {
                    let series: Vec<f64> = (0..t).map(|ti| arr[(b, ti, yi, xi)]).collect();
                    let filled = fill_series(&series, self.method);
                    for ti in 0..t {
                        out[(b, ti, yi, xi)] = filled[ti];
                    }
                }
            }
        }

        Ok(ChunkBuffer::from_array(out))
    }

    fn make_constructible_json(&self) -> serde_json::Value {
        serde_json::json!({
            "cube_type": "fill_time",
            "method": self.method.as_str(),
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

fn fill_series(series: &[f64], method: FillMethod) -> Vec<f64> {
    match method {
        FillMethod::Locf => {
            let mut out = series.to_vec();
            let mut last: Option<f64> = None;
            for v in out.iter_mut() {
                if v.is_nan() {
                    if let Some(l) = last {
                        *v = l;
                    }
                } else {
                    last = Some(*v);
                }
            }
            out
        }
        FillMethod::Nocb => {
            let mut out = series.to_vec();
            let mut next: Option<f64> = None;
            for v in out.iter_mut().rev() {
                if v.is_nan() {
                    if let Some(n) = next {
                        *v = n;
                    }
                } else {
                    next = Some(*v);
                }
            }
            out
        }
        FillMethod::Near => {
            let n = series.len();
            let mut out = series.to_vec();
            for i in 0..n {
                if !out[i].is_nan() {
                    continue;
                }
                let mut left = None;
                for j in (0..i).rev() {
                    if !series[j].is_nan() {
                        left = Some((i - j, series[j]));
                        break;
                    }
                }
                let mut right = None;
                for j in (i + 1)..n {
                    if !series[j].is_nan() {
                        right = Some((j - i, series[j]));
                        break;
                    }
                }
                out[i] = match (left, right) {
                    (Some((dl, vl)), Some((dr, vr))) => {
                        // Ties broken toward earlier (the left sample).
                        if dl <= dr { vl } else { vr }
                    }
                    (Some((_, vl)), None) => vl,
                    (None, Some((_, vr))) => vr,
                    (None, None) => f64::NAN,
                };
            }
            out
        }
        FillMethod::Linear => {
            let n = series.len();
            let mut out = series.to_vec();
            for i in 0..n {
                if !out[i].is_nan() {
                    continue;
                }
                let mut left = None;
                for j in (0..i).rev() {
                    if !series[j].is_nan() {
                        left = Some((j, series[j]));
                        break;
                    }
                }
                let mut right = None;
                for j in (i + 1)..n {
                    if !series[j].is_nan() {
                        right = Some((j, series[j]));
                        break;
                    }
                }
                out[i] = match (left, right) {
                    (Some((lj, lv)), Some((rj, rv))) => {
                        let frac = (i - lj) as f64 / (rj - lj) as f64;
                        lv + (rv - lv) * frac
                    }
                    // Outside the convex hull, use the nearest endpoint.
                    (Some((_, lv)), None) => lv,
                    (None, Some((_, rv))) => rv,
                    (None, None) => f64::NAN,
                };
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locf_carries_forward_leaving_leading_nan() {
        let series = [f64::NAN, 1.0, f64::NAN, f64::NAN, 2.0, f64::NAN];
        let filled = fill_series(&series, FillMethod::Locf);
        assert!(filled[0].is_nan());
        assert_eq!(&filled[1..], &[1.0, 1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn near_fills_every_gap() {
        let series = [f64::NAN, 1.0, f64::NAN, f64::NAN, 2.0, f64::NAN];
        let filled = fill_series(&series, FillMethod::Near);
        assert_eq!(filled, vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn linear_interpolates_between_endpoints() {
        let series = [f64::NAN, 1.0, f64::NAN, f64::NAN, 2.0, f64::NAN];
        let filled = fill_series(&series, FillMethod::Linear);
        assert_eq!(filled[0], 1.0);
        assert_eq!(filled[1], 1.0);
        assert!((filled[2] - 4.0 / 3.0).abs() < 1e-9);
        assert!((filled[3] - 5.0 / 3.0).abs() < 1e-9);
        assert_eq!(filled[4], 2.0);
        assert_eq!(filled[5], 2.0);
    }

    #[test]
    fn nocb_carries_backward_leaving_trailing_nan() {
        let series = [f64::NAN, 1.0, f64::NAN, 2.0, f64::NAN];
        let filled = fill_series(&series, FillMethod::Nocb);
        assert_eq!(&filled[..4], &[1.0, 1.0, 2.0, 2.0]);
        assert!(filled[4].is_nan());
    }

    #[test]
    fn invalid_method_downgrades_to_near() {
        assert_eq!(FillMethod::parse_or_warn("bogus"), FillMethod::Near);
    }
}
