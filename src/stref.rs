//! Spatiotemporal reference and chunk geometry.

use crate::datetime::{DateTime, Duration};
use crate::error::{Error, Result};
use crate::geometry::Bounds;

/// Fixes the spatial window, SRS, temporal range, and grid extents of
/// a cube's 4-D output. Immutable once built: a `set_st_reference`
/// on a cube produces a new `STRef`, never mutates this one in place.
#[derive(Debug, Clone, PartialEq)]
pub struct STRef {
    pub left: f64,
    pub right: f64,
    pub bottom: f64,
    pub top: f64,
    pub srs: String,

    pub nx: u32,
    pub ny: u32,
    pub nt: u32,

    pub t0: DateTime,
    pub t1: DateTime,
    pub dt: Duration,
}

impl STRef {
    pub fn builder() -> STRefBuilder {
        STRefBuilder::default()
    }

    pub fn dx(&self) -> f64 {
        (self.right - self.left) / self.nx as f64
    }

    pub fn dy(&self) -> f64 {
        (self.top - self.bottom) / self.ny as f64
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::new((self.left, self.bottom), (self.right, self.top))
    }

    /// Renders the fields the factory's `parse_st_ref` expects, so a
    /// leaf cube's `make_constructible_json` round-trips.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "left": self.left,
            "bottom": self.bottom,
            "right": self.right,
            "top": self.top,
            "srs": self.srs,
            "nx": self.nx,
            "ny": self.ny,
            "nt": self.nt,
            "t0": self.t0.to_string(),
            "t1": self.t1.to_string(),
            "dt_unit": self.dt.unit.as_str(),
            "dt_amount": self.dt.amount,
        })
    }
}

/// Builds an [`STRef`] through chained `with_*` setters, each
/// re-deriving the fields that depend on it, rather than direct field
/// assignment on a mutable struct.
#[derive(Debug, Default)]
pub struct STRefBuilder {
    left: Option<f64>,
    right: Option<f64>,
    bottom: Option<f64>,
    top: Option<f64>,
    srs: Option<String>,
    nx: Option<u32>,
    ny: Option<u32>,
    nt: Option<u32>,
    t0: Option<DateTime>,
    t1: Option<DateTime>,
    dt: Option<Duration>,
}

impl STRefBuilder {
    pub fn with_window(mut self, left: f64, bottom: f64, right: f64, top: f64) -> Self {
        self.left = Some(left);
        self.bottom = Some(bottom);
        self.right = Some(right);
        self.top = Some(top);
        self
    }

    pub fn with_srs(mut self, srs: impl Into<String>) -> Self {
        self.srs = Some(srs.into());
        self
    }

    pub fn with_extent(mut self, nx: u32, ny: u32, nt: u32) -> Self {
        self.nx = Some(nx);
        self.ny = Some(ny);
        self.nt = Some(nt);
        self
    }

    pub fn with_time(mut self, t0: DateTime, t1: DateTime, dt: Duration) -> Self {
        self.t0 = Some(t0);
        self.t1 = Some(t1);
        self.dt = Some(dt);
        self
    }

    pub fn build(self) -> Result<STRef> {
        let missing = |what: &str| Error::InvalidConfiguration(format!("STRef missing {what}"));
        let left = self.left.ok_or_else(|| missing("spatial window"))?;
        let right = self.right.ok_or_else(|| missing("spatial window"))?;
        let bottom = self.bottom.ok_or_else(|| missing("spatial window"))?;
        let top = self.top.ok_or_else(|| missing("spatial window"))?;
        let srs = self.srs.ok_or_else(|| missing("srs"))?;
        let nx = self.nx.ok_or_else(|| missing("extent"))?;
        let ny = self.ny.ok_or_else(|| missing("extent"))?;
        let nt = self.nt.ok_or_else(|| missing("extent"))?;
        let t0 = self.t0.ok_or_else(|| missing("time range"))?;
        let t1 = self.t1.ok_or_else(|| missing("time range"))?;
        let dt = self.dt.ok_or_else(|| missing("time step"))?;

        if right <= left || top <= bottom {
            return Err(Error::InvalidConfiguration(
                "STRef window must have positive width and height".to_string(),
            ));
        }

        Ok(STRef { left, right, bottom, top, srs, nx, ny, nt, t0, t1, dt })
    }
}

/// Rounds `a/b` up (ceiling division for unsigned integers).
fn div_ceil(a: u32, b: u32) -> u32 {
    if b == 0 {
        0
    } else {
        (a + b - 1) / b
    }
}

/// A decoded 3-D chunk coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCoord {
    pub it: u32,
    pub iy: u32,
    pub ix: u32,
}

/// Combines an [`STRef`] with a chunk-size triple `(ct, cy, cx)` to
/// partition the 4-D grid into chunks, linearized in t-major,
/// y-middle, x-minor order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkGeometry {
    st_ref: STRef,
    ct: u32,
    cy: u32,
    cx: u32,
    nt_chunks: u32,
    ny_chunks: u32,
    nx_chunks: u32,
}

impl ChunkGeometry {
    pub fn new(st_ref: STRef, chunk_size: (u32, u32, u32)) -> Result<Self> {
        let (ct, cy, cx) = chunk_size;
        if ct == 0 || cy == 0 || cx == 0 {
            return Err(Error::InvalidConfiguration(
                "chunk size must be nonzero along every axis".to_string(),
            ));
        }
        let nt_chunks = div_ceil(st_ref.nt, ct);
        let ny_chunks = div_ceil(st_ref.ny, cy);
        let nx_chunks = div_ceil(st_ref.nx, cx);
        Ok(ChunkGeometry { st_ref, ct, cy, cx, nt_chunks, ny_chunks, nx_chunks })
    }

    pub fn st_ref(&self) -> &STRef {
        &self.st_ref
    }

    pub fn chunk_size_triple(&self) -> (u32, u32, u32) {
        (self.ct, self.cy, self.cx)
    }

    /// Product of per-axis chunk counts; zero if any axis extent is
    /// zero (an empty cube has zero chunks).
    pub fn count_chunks(&self) -> u64 {
        self.nt_chunks as u64 * self.ny_chunks as u64 * self.nx_chunks as u64
    }

    fn decompose(&self, id: u64) -> Result<ChunkCoord> {
        if id >= self.count_chunks() {
            return Err(Error::NotFound(format!("chunk id {id} out of range")));
        }
        let per_t = self.ny_chunks as u64 * self.nx_chunks as u64;
        let it = (id / per_t) as u32;
        let rem = id % per_t;
        let iy = (rem / self.nx_chunks as u64) as u32;
        let ix = (rem % self.nx_chunks as u64) as u32;
        Ok(ChunkCoord { it, iy, ix })
    }

    /// The chunk id for a `(it, iy, ix)` coordinate, the inverse of
    /// the id-to-coordinate decomposition used throughout.
    pub fn chunk_id(&self, coord: ChunkCoord) -> u64 {
        let per_t = self.ny_chunks as u64 * self.nx_chunks as u64;
        coord.it as u64 * per_t + coord.iy as u64 * self.nx_chunks as u64 + coord.ix as u64
    }

    /// Componentwise chunk size along `(t, y, x)`, clamped to the
    /// remaining extent at the high-index edge; never zero for a
    /// valid id.
    pub fn chunk_size(&self, id: u64) -> Result<(u32, u32, u32)> {
        let c = self.decompose(id)?;
        let t = remaining(c.it, self.ct, self.st_ref.nt);
        let y = remaining(c.iy, self.cy, self.st_ref.ny);
        let x = remaining(c.ix, self.cx, self.st_ref.nx);
        Ok((t, y, x))
    }

    /// World bounds `(t0, t1, left, right, bottom, top)` covered by
    /// the chunk.
    pub fn bounds_from_chunk(&self, id: u64) -> Result<(DateTime, DateTime, f64, f64, f64, f64)> {
        let c = self.decompose(id)?;
        let (ct_eff, cy_eff, cx_eff) = self.chunk_size(id)?;

        let t0 = self
            .st_ref
            .t0
            .checked_add(&self.st_ref.dt, (c.it * self.ct) as i64)
            .ok_or_else(|| Error::Other(anyhow::anyhow!("time overflow computing chunk bounds")))?;
        let t1 = t0
            .checked_add(&self.st_ref.dt, ct_eff as i64)
            .ok_or_else(|| Error::Other(anyhow::anyhow!("time overflow computing chunk bounds")))?;

        let dx = self.st_ref.dx();
        let dy = self.st_ref.dy();
        let left = self.st_ref.left + (c.ix * self.cx) as f64 * dx;
        let right = left + cx_eff as f64 * dx;
        // y chunk index 0 is the top row: top decreases downward.
        let top = self.st_ref.top - (c.iy * self.cy) as f64 * dy;
        let bottom = top - cy_eff as f64 * dy;

        Ok((t0, t1, left, right, bottom, top))
    }
}

fn remaining(chunk_index: u32, chunk_size: u32, total: u32) -> u32 {
    let start = chunk_index * chunk_size;
    let rem = total.saturating_sub(start);
    rem.min(chunk_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datetime::TimeUnit;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32) -> DateTime {
        DateTime::from_naive(NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap())
    }

    fn sample_geometry(nx: u32, ny: u32, nt: u32, chunk: (u32, u32, u32)) -> ChunkGeometry {
        let st = STRef::builder()
            .with_window(0.0, 0.0, 100.0, 100.0)
            .with_srs("EPSG:4326")
            .with_extent(nx, ny, nt)
            .with_time(dt(2020, 1, 1), dt(2020, 1, 1 + nt as u32), Duration::new(TimeUnit::Day, 1))
            .build()
            .unwrap();
        ChunkGeometry::new(st, chunk).unwrap()
    }

    #[test]
    fn count_chunks_matches_formula() {
        let g = sample_geometry(10, 10, 5, (2, 3, 4));
        assert_eq!(g.count_chunks(), 3 * 4 * 3); // ceil(5/2)=3, ceil(10/3)=4, ceil(10/4)=3
    }

    #[test]
    fn edge_chunk_is_clamped_but_nonzero() {
        let g = sample_geometry(10, 10, 5, (2, 3, 4));
        // x axis: chunks of 4,4,2 -> last chunk along x is size 2.
        let last_x_id = g.chunk_id(ChunkCoord { it: 0, iy: 0, ix: 2 });
        let (_, _, x) = g.chunk_size(last_x_id).unwrap();
        assert_eq!(x, 2);
        assert!(x > 0);
    }

    #[test]
    fn out_of_range_id_errors() {
        let g = sample_geometry(10, 10, 5, (2, 3, 4));
        assert!(g.chunk_size(g.count_chunks()).is_err());
    }

    #[test]
    fn empty_extent_has_zero_chunks() {
        let g = sample_geometry(10, 10, 0, (2, 3, 4));
        assert_eq!(g.count_chunks(), 0);
    }
}
