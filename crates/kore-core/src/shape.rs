use smallvec::SmallVec;
use std::fmt;

use crate::Interval;

/// One dimension of a strided view: the coordinate range it covers and the
/// distance, in elements, between consecutive coordinates.
///
/// A stride of 0 marks a broadcast dimension (every coordinate reads the same
/// element).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dim {
    pub min: i32,
    pub extent: i32,
    pub stride: i32,
}

impl Dim {
    pub fn new(min: i32, extent: i32, stride: i32) -> Self {
        Self { min, extent, stride }
    }

    /// Largest coordinate covered (inclusive).
    pub fn max(&self) -> i32 {
        self.min + self.extent - 1
    }

    pub fn interval(&self) -> Interval {
        Interval::new(self.min, self.max())
    }
}

/// Strided shape with stack-allocated storage for ≤6 dimensions.
///
/// Dimension 0 is the innermost (fastest varying) one: for activations it is
/// the channel dimension, followed by x, y and batch.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Shape {
    dims: SmallVec<[Dim; 6]>,
}

impl Shape {
    /// Create a shape from explicit dimensions.
    pub fn new(dims: &[Dim]) -> Self {
        Self {
            dims: SmallVec::from_slice(dims),
        }
    }

    /// Dense shape with all mins at 0.
    pub fn contiguous(extents: &[i32]) -> Self {
        let mut dims = SmallVec::with_capacity(extents.len());
        let mut stride = 1;
        for &extent in extents {
            dims.push(Dim::new(0, extent, stride));
            stride *= extent.max(1);
        }
        Self { dims }
    }

    /// Dense shape covering the given bounds.
    pub fn from_bounds(bounds: &[Interval]) -> Self {
        let mut dims = SmallVec::with_capacity(bounds.len());
        let mut stride = 1;
        for b in bounds {
            let extent = b.extent().max(0);
            dims.push(Dim::new(b.min, extent, stride));
            stride *= extent.max(1);
        }
        Self { dims }
    }

    /// Number of dimensions (rank).
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn dim(&self, d: usize) -> &Dim {
        &self.dims[d]
    }

    pub fn dim_mut(&mut self, d: usize) -> &mut Dim {
        &mut self.dims[d]
    }

    /// Insert a dimension at position `d`.
    pub fn insert(&mut self, d: usize, dim: Dim) {
        self.dims.insert(d, dim);
    }

    /// Remove dimension `d`, returning it.
    pub fn remove(&mut self, d: usize) -> Dim {
        self.dims.remove(d)
    }

    /// Total number of elements (0 if any extent is empty).
    pub fn numel(&self) -> usize {
        self.dims
            .iter()
            .map(|d| d.extent.max(0) as usize)
            .product()
    }

    pub fn bounds(&self) -> SmallVec<[Interval; 6]> {
        self.dims.iter().map(|d| d.interval()).collect()
    }

    pub fn extents(&self) -> SmallVec<[i32; 6]> {
        self.dims.iter().map(|d| d.extent).collect()
    }

    /// Whether the strides describe a packed layout with dim 0 innermost.
    pub fn is_dense(&self) -> bool {
        let mut expected = 1i64;
        for d in &self.dims {
            if d.extent > 1 && d.stride as i64 != expected {
                return false;
            }
            expected *= d.extent.max(1) as i64;
        }
        true
    }

    /// Whether `coords` (one per dimension) lies inside the shape.
    pub fn contains(&self, coords: &[i32]) -> bool {
        coords.len() == self.dims.len()
            && self
                .dims
                .iter()
                .zip(coords)
                .all(|(d, &c)| d.min <= c && c <= d.max())
    }

    /// Element offset of `coords` relative to the element at the mins.
    pub fn element_offset(&self, coords: &[i32]) -> i64 {
        debug_assert_eq!(coords.len(), self.dims.len());
        self.dims
            .iter()
            .zip(coords)
            .map(|(d, &c)| (c - d.min) as i64 * d.stride as i64)
            .sum()
    }

    /// Element offset of the last element relative to the first one.
    pub fn span(&self) -> i64 {
        self.dims
            .iter()
            .map(|d| (d.extent.max(1) - 1) as i64 * d.stride as i64)
            .sum()
    }

    /// Visit every coordinate in order, dimension 0 fastest.
    pub fn for_each_coord(&self, mut f: impl FnMut(&[i32])) {
        if self.numel() == 0 {
            return;
        }
        let mut coords: SmallVec<[i32; 6]> = self.dims.iter().map(|d| d.min).collect();
        loop {
            f(&coords);
            let mut d = 0;
            loop {
                if d == coords.len() {
                    return;
                }
                coords[d] += 1;
                if coords[d] <= self.dims[d].max() {
                    break;
                }
                coords[d] = self.dims[d].min;
                d += 1;
            }
        }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}+{}:{}", d.min, d.extent, d.stride)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d.extent)?;
        }
        write!(f, "]")
    }
}

impl From<&[i32]> for Shape {
    fn from(extents: &[i32]) -> Self {
        Shape::contiguous(extents)
    }
}
