//! Per-cell aggregation reducers for the image-collection source cube.
//!
//! A tagged sum with a per-variant state struct, rather than a class
//! hierarchy: every variant shares the same `update`/`finalize`
//! shape, and only `Mean`/`Median` carry extra state at all.

use crate::error::{Error, Result};
use ndarray::Array4;
use std::collections::HashMap;

/// A pixel coordinate into the output buffer, `(band, t, y, x)`.
pub type Cell = (usize, usize, usize, usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationMethod {
    None,
    First,
    Last,
    Min,
    Max,
    Mean,
    Median,
}

impl AggregationMethod {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(AggregationMethod::None),
            "first" => Ok(AggregationMethod::First),
            "last" => Ok(AggregationMethod::Last),
            "min" => Ok(AggregationMethod::Min),
            "max" => Ok(AggregationMethod::Max),
            "mean" => Ok(AggregationMethod::Mean),
            "median" => Ok(AggregationMethod::Median),
            other => Err(Error::InvalidConfiguration(format!("unknown aggregation method {other}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationMethod::None => "none",
            AggregationMethod::First => "first",
            AggregationMethod::Last => "last",
            AggregationMethod::Min => "min",
            AggregationMethod::Max => "max",
            AggregationMethod::Mean => "mean",
            AggregationMethod::Median => "median",
        }
    }
}

/// Running state for one chunk's aggregation. `update` is called
/// once per non-NaN source sample with its target cell; `finalize`
/// performs any reducer-specific wrap-up (only `Median` needs one).
pub enum AggregationState {
    /// First write wins, but nothing currently checks for a prior
    /// write here: the image-collection source cube applies this
    /// reducer only via the direct-write fast path (§4.E step 5a),
    /// where every contribution overwrites unconditionally. Kept as
    /// a real variant for round-trip construction and for callers
    /// that go through `update` directly — last write wins in that
    /// case, matching the behavior actually observed upstream.
    None,
    First,
    Last,
    Min,
    Max,
    /// Sparse running sum/count, allocated per-cell only once a
    /// second contribution forces it: after the first contribution
    /// the running mean (= the sample itself) already lives in the
    /// output buffer, so no entry is needed until it must be
    /// combined with another sample.
    Mean(HashMap<Cell, (f64, u32)>),
    /// Sparse sample lists, one entry per cell that has received at
    /// least one contribution.
    Median(HashMap<Cell, Vec<f64>>),
}

impl AggregationState {
    pub fn new(method: AggregationMethod) -> Self {
        match method {
            AggregationMethod::None => AggregationState::None,
            AggregationMethod::First => AggregationState::First,
            AggregationMethod::Last => AggregationState::Last,
            AggregationMethod::Min => AggregationState::Min,
            AggregationMethod::Max => AggregationState::Max,
            AggregationMethod::Mean => AggregationState::Mean(HashMap::new()),
            AggregationMethod::Median => AggregationState::Median(HashMap::new()),
        }
    }

    /// Folds one non-NaN `sample` into `cell` of `output`.
    pub fn update(&mut self, output: &mut Array4<f64>, sample: f64, cell: Cell) {
        debug_assert!(!sample.is_nan(), "NaN samples must be filtered before update");
        match self {
            AggregationState::None | AggregationState::Last => {
                output[cell] = sample;
            }
            AggregationState::First => {
                if output[cell].is_nan() {
                    output[cell] = sample;
                }
            }
            AggregationState::Min => {
                let cur = output[cell];
                output[cell] = if cur.is_nan() { sample } else { cur.min(sample) };
            }
            AggregationState::Max => {
                let cur = output[cell];
                output[cell] = if cur.is_nan() { sample } else { cur.max(sample) };
            }
            AggregationState::Mean(counts) => {
                let cur = output[cell];
                if let Some((sum, count)) = counts.get_mut(&cell) {
                    *sum += sample;
                    *count += 1;
                    output[cell] = *sum / *count as f64;
                } else if cur.is_nan() {
                    output[cell] = sample;
                } else {
                    let sum = cur + sample;
                    counts.insert(cell, (sum, 2));
                    output[cell] = sum / 2.0;
                }
            }
            AggregationState::Median(samples) => {
                samples.entry(cell).or_default().push(sample);
            }
        }
    }

    /// Reducer-specific wrap-up once every group has contributed.
    /// Only `Median` needs this: it sorts each cell's collected
    /// samples and writes the middle value (or the average of the
    /// two middles) into the output buffer.
    pub fn finalize(&mut self, output: &mut Array4<f64>) {
        if let AggregationState::Median(samples) = self {
            for (cell, values) in samples.iter_mut() {
                if values.is_empty() {
                    continue;
                }
                values.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let n = values.len();
                let median = if n % 2 == 1 {
                    values[n / 2]
                } else {
                    (values[n / 2 - 1] + values[n / 2]) / 2.0
                };
                output[*cell] = median;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf() -> Array4<f64> {
        Array4::from_elem((1, 1, 1, 1), f64::NAN)
    }

    #[test]
    fn mean_of_two_samples() {
        let mut out = buf();
        let mut state = AggregationState::new(AggregationMethod::Mean);
        state.update(&mut out, 2.0, (0, 0, 0, 0));
        state.update(&mut out, 4.0, (0, 0, 0, 0));
        state.finalize(&mut out);
        assert_eq!(out[(0, 0, 0, 0)], 3.0);
    }

    #[test]
    fn mean_of_single_sample_is_itself() {
        let mut out = buf();
        let mut state = AggregationState::new(AggregationMethod::Mean);
        state.update(&mut out, 2.0, (0, 0, 0, 0));
        state.finalize(&mut out);
        assert_eq!(out[(0, 0, 0, 0)], 2.0);
    }

    #[test]
    fn first_keeps_earliest() {
        let mut out = buf();
        let mut state = AggregationState::new(AggregationMethod::First);
        state.update(&mut out, 1.0, (0, 0, 0, 0));
        state.update(&mut out, 9.0, (0, 0, 0, 0));
        assert_eq!(out[(0, 0, 0, 0)], 1.0);
    }

    #[test]
    fn last_keeps_latest() {
        let mut out = buf();
        let mut state = AggregationState::new(AggregationMethod::Last);
        state.update(&mut out, 1.0, (0, 0, 0, 0));
        state.update(&mut out, 9.0, (0, 0, 0, 0));
        assert_eq!(out[(0, 0, 0, 0)], 9.0);
    }

    #[test]
    fn median_odd_and_even() {
        let mut out = buf();
        let mut state = AggregationState::new(AggregationMethod::Median);
        for v in [1.0, 3.0, 2.0] {
            state.update(&mut out, v, (0, 0, 0, 0));
        }
        state.finalize(&mut out);
        assert_eq!(out[(0, 0, 0, 0)], 2.0);

        let mut out2 = buf();
        let mut state2 = AggregationState::new(AggregationMethod::Median);
        for v in [1.0, 2.0, 3.0, 4.0] {
            state2.update(&mut out2, v, (0, 0, 0, 0));
        }
        state2.finalize(&mut out2);
        assert_eq!(out2[(0, 0, 0, 0)], 2.5);
    }

    #[test]
    fn min_max_track_extremes() {
        let mut out = buf();
        let mut min = AggregationState::new(AggregationMethod::Min);
        for v in [5.0, 1.0, 3.0] {
            min.update(&mut out, v, (0, 0, 0, 0));
        }
        assert_eq!(out[(0, 0, 0, 0)], 1.0);

        let mut out2 = buf();
        let mut max = AggregationState::new(AggregationMethod::Max);
        for v in [5.0, 1.0, 3.0] {
            max.update(&mut out2, v, (0, 0, 0, 0));
        }
        assert_eq!(out2[(0, 0, 0, 0)], 5.0);
    }
}
