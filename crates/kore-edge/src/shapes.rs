//! Shape normalization ahead of kernel calls.
//!
//! Kernels are compiled for a fixed rank, so elementwise operators fuse
//! contiguous dimensions down and then pad back up with extent-1
//! dimensions. All helpers act on [`Layout`]s, leaving the storage alone.

use kore_core::{Dim, Layout, Storage};

use crate::error::{OpError, Result};

/// Whether dimensions `d0` and `d1` of `layout` address one contiguous run
/// and can be merged into `d0`.
pub fn can_fuse(layout: &Layout, d0: usize, d1: usize) -> bool {
    debug_assert_ne!(d0, d1);
    if d0 >= layout.rank() || d1 >= layout.rank() {
        return false;
    }
    let dim0 = layout.dim(d0);
    let dim1 = layout.dim(d1);
    dim0.min == 0 && dim1.stride > 0 && dim1.stride == dim0.extent * dim0.stride
}

pub fn can_fuse_cx(layout: &Layout) -> bool {
    can_fuse(layout, 0, 1)
}

pub fn can_fuse_xy(layout: &Layout) -> bool {
    can_fuse(layout, 1, 2)
}

/// Merge `d1` into `d0` and drop `d1`. The fused dimension keeps `d0`'s
/// min of 0 and stride.
pub fn fuse(layout: &mut Layout, d0: usize, d1: usize) -> Result<()> {
    if !can_fuse(layout, d0, d1) {
        return Err(OpError::Unfusable { d0, d1 });
    }
    let extent1 = layout.dim(d1).extent;
    let shape = layout.shape_mut();
    shape.dim_mut(d0).extent *= extent1;
    shape.remove(d1);
    Ok(())
}

pub fn fuse_cx(layout: &mut Layout) -> Result<()> {
    fuse(layout, 0, 1)
}

pub fn fuse_xy(layout: &mut Layout) -> Result<()> {
    fuse(layout, 1, 2)
}

/// Append extent-1 dimensions at coordinate 0 until `layout` has `rank`
/// dimensions.
pub fn pad_to_rank(layout: &mut Layout, rank: usize) {
    while layout.rank() < rank {
        let d = layout.rank();
        layout.embed(d, 0);
    }
}

/// Fuse dimensions 0 and 1 of every layout while all of them allow it and
/// agree on the extent of dimension 0 and the min of dimension 1, then pad
/// each to `rank`.
///
/// Layouts passed here must already cover the same coordinates, one operand
/// per slot; the element at a coordinate keeps its partners after fusing.
pub fn optimize_elementwise_shapes(layouts: &mut [&mut Layout], rank: usize) {
    loop {
        let Some(first) = layouts.first() else {
            return;
        };
        if first.rank() < 2 {
            break;
        }
        let extent0 = first.dim(0).extent;
        let min1 = first.dim(1).min;
        let fusable = layouts.iter().all(|l| {
            can_fuse_cx(l) && l.dim(0).extent == extent0 && l.dim(1).min == min1
        });
        if !fusable {
            break;
        }
        for l in layouts.iter_mut() {
            // Checked above.
            let extent1 = l.dim(1).extent;
            let shape = l.shape_mut();
            shape.dim_mut(0).extent *= extent1;
            shape.remove(1);
        }
    }
    for l in layouts.iter_mut() {
        pad_to_rank(l, rank);
    }
}

/// Pad both layouts to `rank`, then stretch extent-1 dimensions of either
/// across the other's range with stride 0.
///
/// An extent-1 dimension of `a` also moves to `b`'s min when both are
/// extent 1. Equal extents are left alone; any other mismatch is an error.
pub fn broadcast_shapes(a: &mut Layout, b: &mut Layout, rank: usize) -> Result<()> {
    pad_to_rank(a, rank);
    pad_to_rank(b, rank);
    if a.rank() != b.rank() {
        return Err(OpError::config(format!(
            "can't broadcast rank {} against rank {}",
            a.rank(),
            b.rank()
        )));
    }
    for d in 0..a.rank() {
        let da = *a.dim(d);
        let db = *b.dim(d);
        if da.extent == 1 && (db.extent != 1 || da.min != db.min) {
            *a.shape_mut().dim_mut(d) = Dim::new(db.min, db.extent, 0);
        } else if db.extent == 1 && da.extent != 1 {
            *b.shape_mut().dim_mut(d) = Dim::new(da.min, da.extent, 0);
        } else if da.extent != db.extent {
            return Err(OpError::Broadcast {
                dim: d,
                a: da.extent,
                b: db.extent,
            });
        }
    }
    Ok(())
}

/// Crop both layouts to the coordinates they have in common.
pub fn crop_to_union(a: &mut Layout, b: &mut Layout) -> Result<()> {
    if a.rank() != b.rank() {
        return Err(OpError::config(format!(
            "can't intersect rank {} with rank {}",
            a.rank(),
            b.rank()
        )));
    }
    for d in 0..a.rank() {
        let common = a.dim(d).interval().intersect(&b.dim(d).interval());
        a.crop(d, common);
        b.crop(d, common);
    }
    Ok(())
}

/// Whether two views touch overlapping bytes of one storage.
pub fn is_alias(a_storage: &Storage, a: &Layout, b_storage: &Storage, b: &Layout) -> bool {
    Storage::same(a_storage, b_storage) && a.overlaps(b)
}
