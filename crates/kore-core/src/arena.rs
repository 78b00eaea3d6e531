//! Bump allocator that places tensors inside one shared storage.
//!
//! Producer and consumer tensors carved from the same arena share a
//! [`Storage`], so the operator layer can see (and exploit) aliasing between
//! them. Call `reset()` between runs to reuse the memory.

use std::sync::Arc;

use crate::{DType, Interval, KoreError, Layout, QuantizationInfo, Result, Storage, Tensor, TensorPtr};

const ARENA_ALIGN: usize = 16;

/// A bump-pointer arena. Allocations are 16-byte aligned.
#[derive(Debug)]
pub struct Arena {
    storage: Storage,
    capacity: usize,
    offset: usize,
}

impl Arena {
    /// Create an arena with the given capacity in bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: Storage::zeros(capacity),
            capacity,
            offset: 0,
        }
    }

    /// Reserve `nbytes`, returning the aligned byte offset of the region.
    pub fn alloc(&mut self, nbytes: usize) -> Result<usize> {
        let aligned = align_up(self.offset, ARENA_ALIGN);
        let end = aligned + nbytes;
        if end > self.capacity {
            return Err(KoreError::ArenaExhausted {
                requested: nbytes,
                remaining: self.remaining(),
            });
        }
        self.offset = end;
        Ok(aligned)
    }

    /// Reserve a dense region covering `bounds`.
    pub fn alloc_layout(&mut self, dtype: DType, bounds: &[Interval]) -> Result<Layout> {
        let numel: usize = bounds.iter().map(|b| b.extent().max(0) as usize).product();
        let offset = self.alloc(dtype.storage_bytes(numel))?;
        Ok(Layout::dense(bounds, dtype.element_size(), offset))
    }

    /// Allocate a dense tensor with all mins at 0.
    pub fn alloc_tensor(
        &mut self,
        name: impl Into<String>,
        dtype: DType,
        extents: &[i32],
        quantization: QuantizationInfo,
    ) -> Result<TensorPtr> {
        let bounds: Vec<Interval> = extents.iter().map(|&e| Interval::from_extent(e)).collect();
        let layout = self.alloc_layout(dtype, &bounds)?;
        let tensor = Tensor::view(name, dtype, quantization, self.storage.clone(), layout)?;
        Ok(Arc::new(tensor))
    }

    /// The storage every allocation lives in.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Reset the arena for reuse. Does not deallocate.
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Current bytes used.
    pub fn used(&self) -> usize {
        self.offset
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remaining bytes available.
    pub fn remaining(&self) -> usize {
        self.capacity - self.offset
    }
}

fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}
