//! Byte addressing over shared storage.
//!
//! A [`Layout`] pins a [`Shape`] to a byte offset inside a storage, and the
//! typed [`Buffer`] / [`BufferMut`] views read and write elements through it.
//! Overlap between two layouts of the same storage is a half-open byte
//! range intersection; nothing here hands out raw pointers.

use std::marker::PhantomData;
use std::ops::Range;

use crate::{Dim, Element, Interval, KoreError, Result, Shape};

/// Shape plus the byte position of the element at the shape's mins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    offset: usize,
    elem_size: usize,
    shape: Shape,
}

impl Layout {
    pub fn new(shape: Shape, elem_size: usize, offset: usize) -> Self {
        Self {
            offset,
            elem_size,
            shape,
        }
    }

    /// Dense layout covering `bounds`, starting at byte `offset`.
    pub fn dense(bounds: &[Interval], elem_size: usize, offset: usize) -> Self {
        Self::new(Shape::from_bounds(bounds), elem_size, offset)
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn shape_mut(&mut self) -> &mut Shape {
        &mut self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn dim(&self, d: usize) -> &Dim {
        self.shape.dim(d)
    }

    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    /// Byte offset of the element at the mins.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn num_elements(&self) -> usize {
        self.shape.numel()
    }

    /// Shift the coordinate system of dimension `d`; the bytes addressed by
    /// each element stay the same.
    pub fn translate(&mut self, d: usize, delta: i32) {
        self.shape.dim_mut(d).min += delta;
    }

    pub fn translated(&self, d: usize, delta: i32) -> Self {
        let mut result = self.clone();
        result.translate(d, delta);
        result
    }

    /// Restrict dimension `d` to `bounds` intersected with its current range.
    pub fn crop(&mut self, d: usize, bounds: Interval) {
        let dim = *self.shape.dim(d);
        let cropped = bounds.intersect(&dim.interval());
        if cropped.is_empty() {
            self.shape.dim_mut(d).extent = 0;
            return;
        }
        let skipped = (cropped.min - dim.min) as usize * dim.stride.max(0) as usize;
        self.offset += skipped * self.elem_size;
        let dim = self.shape.dim_mut(d);
        dim.min = cropped.min;
        dim.extent = cropped.extent();
    }

    pub fn cropped(&self, d: usize, bounds: Interval) -> Self {
        let mut result = self.clone();
        result.crop(d, bounds);
        result
    }

    /// Crop every dimension; `bounds` must have one interval per dimension.
    pub fn crop_all(&mut self, bounds: &[Interval]) -> Result<()> {
        if bounds.len() != self.rank() {
            return Err(KoreError::ShapeMismatch {
                expected: vec![self.rank() as i64],
                got: vec![bounds.len() as i64],
            });
        }
        for (d, b) in bounds.iter().enumerate() {
            self.crop(d, *b);
        }
        Ok(())
    }

    /// Fix dimension `d` at coordinate `at` and drop it.
    pub fn slice(&mut self, d: usize, at: i32) {
        self.crop(d, Interval::point(at));
        self.shape.remove(d);
    }

    pub fn sliced(&self, d: usize, at: i32) -> Self {
        let mut result = self.clone();
        result.slice(d, at);
        result
    }

    /// Insert a broadcast dimension of extent 1 at position `d`.
    pub fn embed(&mut self, d: usize, at: i32) {
        self.shape.insert(d, Dim::new(at, 1, 0));
    }

    /// Byte offset of `coords` inside the storage.
    pub fn byte_offset(&self, coords: &[i32]) -> usize {
        let elements = self.shape.element_offset(coords);
        (self.offset as i64 + elements * self.elem_size as i64) as usize
    }

    /// First byte addressed by this layout.
    pub fn begin(&self) -> usize {
        self.offset
    }

    /// One past the last byte addressed (equal to `begin` when empty).
    pub fn end(&self) -> usize {
        if self.num_elements() == 0 {
            return self.offset;
        }
        self.offset + (self.shape.span() as usize + 1) * self.elem_size
    }

    pub fn byte_range(&self) -> Range<usize> {
        self.begin()..self.end()
    }

    /// Whether the half-open byte ranges of two layouts intersect.
    pub fn overlaps(&self, other: &Layout) -> bool {
        !(self.begin() >= other.end() || self.end() <= other.begin())
    }
}

/// Read-only typed view over storage bytes.
pub struct Buffer<'a, T: Element> {
    data: &'a [u8],
    layout: Layout,
    _marker: PhantomData<T>,
}

fn check_view<T: Element>(len: usize, layout: &Layout) -> Result<()> {
    if layout.elem_size() != std::mem::size_of::<T>() {
        return Err(KoreError::StorageError(format!(
            "{} view over {}-byte elements",
            T::DTYPE,
            layout.elem_size()
        )));
    }
    if layout.end() > len {
        return Err(KoreError::StorageError(format!(
            "layout addresses bytes {:?} of a {len}-byte storage",
            layout.byte_range()
        )));
    }
    Ok(())
}

impl<'a, T: Element> Buffer<'a, T> {
    pub fn new(data: &'a [u8], layout: Layout) -> Result<Self> {
        check_view::<T>(data.len(), &layout)?;
        Ok(Self {
            data,
            layout,
            _marker: PhantomData,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn shape(&self) -> &Shape {
        self.layout.shape()
    }

    pub fn rank(&self) -> usize {
        self.layout.rank()
    }

    pub fn dim(&self, d: usize) -> &Dim {
        self.layout.dim(d)
    }

    pub fn contains(&self, coords: &[i32]) -> bool {
        self.layout.shape().contains(coords)
    }

    /// Element at `coords`; the caller keeps coordinates inside the shape.
    pub fn get(&self, coords: &[i32]) -> T {
        let at = self.layout.byte_offset(coords);
        bytemuck::pod_read_unaligned(&self.data[at..at + std::mem::size_of::<T>()])
    }

    /// Elements in coordinate order, dimension 0 fastest.
    pub fn to_vec(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.layout.num_elements());
        self.layout.shape().for_each_coord(|c| out.push(self.get(c)));
        out
    }
}

/// Mutable typed view over storage bytes.
pub struct BufferMut<'a, T: Element> {
    data: &'a mut [u8],
    layout: Layout,
    _marker: PhantomData<T>,
}

impl<'a, T: Element> BufferMut<'a, T> {
    pub fn new(data: &'a mut [u8], layout: Layout) -> Result<Self> {
        check_view::<T>(data.len(), &layout)?;
        Ok(Self {
            data,
            layout,
            _marker: PhantomData,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn shape(&self) -> &Shape {
        self.layout.shape()
    }

    pub fn rank(&self) -> usize {
        self.layout.rank()
    }

    pub fn dim(&self, d: usize) -> &Dim {
        self.layout.dim(d)
    }

    pub fn get(&self, coords: &[i32]) -> T {
        let at = self.layout.byte_offset(coords);
        bytemuck::pod_read_unaligned(&self.data[at..at + std::mem::size_of::<T>()])
    }

    pub fn set(&mut self, coords: &[i32], value: T) {
        let at = self.layout.byte_offset(coords);
        self.data[at..at + std::mem::size_of::<T>()].copy_from_slice(bytemuck::bytes_of(&value));
    }

    /// Write `f(coords)` at every coordinate of the view.
    pub fn fill_with(&mut self, mut f: impl FnMut(&[i32]) -> T) {
        let shape = self.layout.shape().clone();
        shape.for_each_coord(|c| {
            let v = f(c);
            self.set(c, v);
        });
    }

    pub fn as_buffer(&self) -> Buffer<'_, T> {
        Buffer {
            data: self.data,
            layout: self.layout.clone(),
            _marker: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout_2d() -> Layout {
        // 4 channels x 3 columns of u8 at byte 8.
        Layout::new(Shape::contiguous(&[4, 3]), 1, 8)
    }

    #[test]
    fn test_byte_range() {
        let l = layout_2d();
        assert_eq!(l.begin(), 8);
        assert_eq!(l.end(), 20);
        assert_eq!(l.byte_offset(&[1, 2]), 8 + 1 + 8);
    }

    #[test]
    fn test_crop_moves_offset() {
        let mut l = layout_2d();
        l.crop(1, Interval::new(1, 5));
        assert_eq!(l.dim(1).min, 1);
        assert_eq!(l.dim(1).extent, 2);
        assert_eq!(l.offset(), 12);
        // Same bytes as before the crop.
        assert_eq!(l.byte_offset(&[0, 2]), layout_2d().byte_offset(&[0, 2]));
    }

    #[test]
    fn test_crop_to_empty() {
        let l = layout_2d().cropped(0, Interval::new(10, 12));
        assert_eq!(l.num_elements(), 0);
        assert_eq!(l.begin(), l.end());
    }

    #[test]
    fn test_translate_keeps_bytes() {
        let l = layout_2d();
        let t = l.translated(0, 3);
        assert_eq!(t.dim(0).min, 3);
        assert_eq!(t.byte_offset(&[3, 0]), l.byte_offset(&[0, 0]));
    }

    #[test]
    fn test_slice_and_embed() {
        let mut l = layout_2d();
        l.slice(1, 2);
        assert_eq!(l.rank(), 1);
        assert_eq!(l.offset(), 16);
        l.embed(1, 0);
        assert_eq!(l.rank(), 2);
        assert_eq!(l.dim(1).stride, 0);
        assert_eq!(l.byte_offset(&[2, 0]), 18);
    }

    #[test]
    fn test_overlap_half_open() {
        let a = Layout::new(Shape::contiguous(&[8]), 1, 0);
        let b = Layout::new(Shape::contiguous(&[8]), 1, 8);
        let c = Layout::new(Shape::contiguous(&[8]), 1, 7);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
    }

    #[test]
    fn test_buffer_roundtrip_i32() {
        let mut bytes = vec![0u8; 24];
        let layout = Layout::new(Shape::contiguous(&[3, 2]), 4, 0);
        {
            let mut buf = BufferMut::<i32>::new(&mut bytes, layout.clone()).unwrap();
            buf.fill_with(|c| c[0] * 10 + c[1] - 5);
        }
        let buf = Buffer::<i32>::new(&bytes, layout).unwrap();
        assert_eq!(buf.get(&[2, 1]), 16);
        assert_eq!(buf.to_vec(), vec![-5, 5, 15, -4, 6, 16]);
    }

    #[test]
    fn test_buffer_rejects_out_of_range() {
        let bytes = vec![0u8; 10];
        assert!(Buffer::<u8>::new(&bytes, layout_2d()).is_err());
        let l = Layout::new(Shape::contiguous(&[2]), 1, 0);
        assert!(Buffer::<i32>::new(&bytes, l).is_err());
    }

    #[test]
    fn test_broadcast_stride_reads_same_element() {
        let bytes = vec![7u8, 9];
        let l = Layout::new(Shape::new(&[Dim::new(0, 2, 1), Dim::new(0, 5, 0)]), 1, 0);
        let buf = Buffer::<u8>::new(&bytes, l).unwrap();
        assert_eq!(buf.get(&[1, 4]), 9);
        assert_eq!(buf.get(&[0, 3]), 7);
    }
}
