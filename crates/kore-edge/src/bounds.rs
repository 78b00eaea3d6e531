//! Bounds inference.
//!
//! A [`BoundsMap`] describes, per input dimension, which input coordinates
//! an operator reads for a requested output region. It is pure data: the
//! scheduler builds one with `Op::map_bounds` and evaluates it against the
//! output region it wants.

use kore_core::{floor_div, Interval};
use smallvec::SmallVec;

use crate::error::{OpError, Result};

/// One interval per dimension.
pub type Region = SmallVec<[Interval; 6]>;

/// Mapping of one input dimension.
///
/// With a source dimension `o`, the input interval is
/// `[floor(o.min * stride / inv_stride) + bounds.min,
///   floor(o.max * stride / inv_stride) + bounds.max]`;
/// without one it is `bounds`. The result is then widened to `alignment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimMap {
    pub source: Option<usize>,
    pub stride: i32,
    pub inv_stride: i32,
    pub bounds: Interval,
    pub alignment: i32,
}

impl DimMap {
    fn constant(bounds: Interval) -> Self {
        Self {
            source: None,
            stride: 1,
            inv_stride: 1,
            bounds,
            alignment: 1,
        }
    }

    fn evaluate(&self, output: &[Interval]) -> Interval {
        let result = match self.source {
            None => self.bounds,
            Some(d) => {
                let o = output[d];
                Interval::new(
                    floor_div(o.min * self.stride, self.inv_stride) + self.bounds.min,
                    floor_div(o.max * self.stride, self.inv_stride) + self.bounds.max,
                )
            }
        };
        result.aligned(self.alignment)
    }
}

/// Input region of one operator input as a function of an output region.
///
/// Built with chained calls; an out-of-range dimension is remembered and
/// reported by [`BoundsMap::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundsMap {
    rank_out: usize,
    dims: SmallVec<[DimMap; 6]>,
    invalid: Option<String>,
}

impl BoundsMap {
    /// All input dimensions start as the empty constant.
    pub fn new(rank_in: usize, rank_out: usize) -> Self {
        Self {
            rank_out,
            dims: (0..rank_in).map(|_| DimMap::constant(Interval::empty())).collect(),
            invalid: None,
        }
    }

    /// Identity map of the given rank.
    pub fn elementwise_all(rank: usize) -> Self {
        (0..rank).fold(Self::new(rank, rank), |map, d| map.elementwise(d, d))
    }

    /// Every input dimension is the given constant bounds.
    pub fn all(bounds: &[Interval], rank_out: usize) -> Self {
        let mut map = Self::new(bounds.len(), rank_out);
        for (d, b) in bounds.iter().enumerate() {
            map.dims[d] = DimMap::constant(*b);
        }
        map
    }

    pub fn rank_in(&self) -> usize {
        self.dims.len()
    }

    pub fn rank_out(&self) -> usize {
        self.rank_out
    }

    pub fn dims(&self) -> &[DimMap] {
        &self.dims
    }

    fn set(mut self, d_in: usize, d_out: Option<usize>, f: impl FnOnce(&mut DimMap)) -> Self {
        if d_in >= self.dims.len() {
            self.invalid
                .get_or_insert_with(|| format!("input dimension {d_in} out of rank {}", self.dims.len()));
            return self;
        }
        if let Some(d_out) = d_out {
            if d_out >= self.rank_out {
                self.invalid
                    .get_or_insert_with(|| format!("output dimension {d_out} out of rank {}", self.rank_out));
                return self;
            }
        }
        f(&mut self.dims[d_in]);
        self
    }

    /// Input dimension `d_in` equals output dimension `d_out`.
    pub fn elementwise(self, d_in: usize, d_out: usize) -> Self {
        self.set(d_in, Some(d_out), |m| {
            *m = DimMap {
                source: Some(d_out),
                stride: 1,
                inv_stride: 1,
                bounds: Interval::point(0),
                alignment: 1,
            }
        })
    }

    /// Shift the input interval of `d_in` by `delta` (`in = out + delta`).
    pub fn offset(self, d_in: usize, delta: i32) -> Self {
        self.set(d_in, None, |m| m.bounds += delta)
    }

    pub fn constant(self, d_in: usize, bounds: Interval) -> Self {
        self.set(d_in, None, |m| *m = DimMap::constant(bounds))
    }

    /// Constant `[0, extent - 1]`.
    pub fn constant_extent(self, d_in: usize, extent: i32) -> Self {
        self.constant(d_in, Interval::from_extent(extent))
    }

    /// Strided window: `[out.min * factor + support.min, out.max * factor +
    /// support.max]`.
    pub fn downsample(self, d_in: usize, d_out: usize, factor: i32, support: Interval) -> Self {
        self.set(d_in, Some(d_out), |m| {
            *m = DimMap {
                source: Some(d_out),
                stride: factor,
                inv_stride: 1,
                bounds: support,
                alignment: 1,
            }
        })
    }

    /// `[floor(out.min / factor), floor(out.max / factor)]`.
    pub fn upsample(self, d_in: usize, d_out: usize, factor: i32) -> Self {
        self.set(d_in, Some(d_out), |m| {
            *m = DimMap {
                source: Some(d_out),
                stride: 1,
                inv_stride: factor,
                bounds: Interval::point(0),
                alignment: 1,
            }
        })
    }

    /// Widen the interval of `d_in` outward to multiples of `alignment`.
    pub fn align(self, d_in: usize, alignment: i32) -> Self {
        self.set(d_in, None, |m| m.alignment = alignment.max(1))
    }

    /// Input region needed for the output region `output`.
    pub fn evaluate(&self, output: &[Interval]) -> Result<Region> {
        if let Some(msg) = &self.invalid {
            return Err(OpError::Config(msg.clone()));
        }
        if output.len() != self.rank_out {
            return Err(OpError::config(format!(
                "bounds map expects a rank {} region, got rank {}",
                self.rank_out,
                output.len()
            )));
        }
        if self.dims.iter().any(|m| m.stride < 1 || m.inv_stride < 1) {
            return Err(OpError::config("bounds map with non-positive stride"));
        }
        Ok(self.dims.iter().map(|m| m.evaluate(output)).collect())
    }
}
