//! Reshape: reinterpret a dense tensor with a new shape.

use kore_core::{Interval, Shape, TensorPtr};

use crate::bounds::{BoundsMap, Region};
use crate::error::{OpError, Result};
use crate::ops::{no_bounds, InputView};
use crate::shapes::is_alias;
use crate::visitor::OpVisitor;

#[derive(Debug, Clone)]
pub struct ReshapeOp {
    inputs: [TensorPtr; 1],
    output: TensorPtr,
    /// Bounds of the whole reshaped tensor; element order is taken from
    /// them even when `output` covers only part of it.
    output_bounds: Region,
}

impl ReshapeOp {
    pub fn new(input: TensorPtr, output: TensorPtr) -> Self {
        let output_bounds = output.bounds_all();
        Self {
            inputs: [input],
            output,
            output_bounds,
        }
    }

    /// Run on a sub-region of the tensor whose full bounds are `bounds`.
    pub fn with_output_bounds(mut self, bounds: &[Interval]) -> Self {
        self.output_bounds = bounds.iter().copied().collect();
        self
    }

    pub fn output_bounds(&self) -> &[Interval] {
        &self.output_bounds
    }

    pub fn name(&self) -> &'static str {
        "Reshape"
    }

    pub fn input(&self) -> &TensorPtr {
        &self.inputs[0]
    }

    pub fn inputs(&self) -> &[TensorPtr] {
        &self.inputs
    }

    pub fn output(&self) -> &TensorPtr {
        &self.output
    }

    /// Any output element may come from any input element.
    pub fn map_bounds(&self, input: usize, output: usize) -> Result<BoundsMap> {
        if input != 0 || output != 0 {
            return Err(no_bounds(input, output));
        }
        Ok(BoundsMap::all(&self.input().bounds_all(), self.output.rank()))
    }

    pub fn execute(&self) -> Result<()> {
        let input = self.input();
        let (in_layout, out_layout) = (input.layout(), self.output.layout());
        if input.dtype() != self.output.dtype() {
            return Err(OpError::config(format!(
                "can't reshape {} into {}",
                input.dtype(),
                self.output.dtype()
            )));
        }
        let full = Shape::from_bounds(&self.output_bounds);
        if in_layout.num_elements() != full.numel() {
            return Err(OpError::config(format!(
                "can't reshape {} elements into {}",
                in_layout.num_elements(),
                full.numel()
            )));
        }
        if !in_layout.shape().is_dense() || !out_layout.shape().is_dense() {
            return Err(OpError::config("reshape needs dense tensors"));
        }
        let out_bounds = self.output.bounds_all();
        let whole = out_bounds.as_slice() == self.output_bounds.as_slice();
        if !whole
            && (out_bounds.len() != self.output_bounds.len()
                || out_bounds.iter().zip(&self.output_bounds).any(|(o, b)| !b.contains(o)))
        {
            return Err(OpError::config(format!(
                "output {} lies outside the reshaped bounds",
                self.output.shape()
            )));
        }

        if is_alias(input.storage(), in_layout, self.output.storage(), out_layout) {
            if !whole || in_layout.byte_range() != out_layout.byte_range() {
                return Err(OpError::config(format!(
                    "input bytes {:?} partially overlap output bytes {:?}",
                    in_layout.byte_range(),
                    out_layout.byte_range()
                )));
            }
            tracing::trace!("reshape: input already in place");
            return Ok(());
        }

        let view = InputView::new(input, &self.output);
        let src = view.bytes(in_layout)?;
        let mut out_bytes = self.output.storage().write();
        let range = out_layout.byte_range();
        let dst = out_bytes
            .get_mut(range.clone())
            .ok_or_else(|| OpError::config(format!("byte range {range:?} outside output")))?;
        if whole {
            dst.copy_from_slice(src);
            return Ok(());
        }

        // Each output element takes the input element at its flat index in
        // the whole reshaped tensor.
        let size = out_layout.elem_size();
        out_layout.shape().for_each_coord(|c| {
            let from = full.element_offset(c) as usize * size;
            let to = out_layout.byte_offset(c) - range.start;
            dst[to..to + size].copy_from_slice(&src[from..from + size]);
        });
        Ok(())
    }

    pub fn accept(&self, visitor: &mut dyn OpVisitor) {
        visitor.visit_reshape(self);
    }
}
