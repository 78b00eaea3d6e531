//! Relayout of conv filters into the tiled form the conv kernels read.

use kore_core::{BufferMut, DType, TensorPtr};
use kore_kernels::tile_conv_filter_u8;

use crate::bounds::BoundsMap;
use crate::error::Result;
use crate::ops::{expect_dtype, no_bounds, InputView};
use crate::quantize::{scale_and_zero, u8_zero};
use crate::visitor::OpVisitor;

/// `[C, W, H, K]` filter to `[vr, vt, ceil(C / vr), ceil(K / vt), W, H]`.
///
/// Usually runs once on a constant filter, ahead of the graph.
#[derive(Debug, Clone)]
pub struct TileConvFilterOp {
    inputs: [TensorPtr; 1],
    output: TensorPtr,
}

impl TileConvFilterOp {
    pub fn new(input: TensorPtr, output: TensorPtr) -> Self {
        Self {
            inputs: [input],
            output,
        }
    }

    pub fn name(&self) -> &'static str {
        "TileConvFilter"
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

    pub fn map_bounds(&self, input: usize, output: usize) -> Result<BoundsMap> {
        if input != 0 || output != 0 {
            return Err(no_bounds(input, output));
        }
        Ok(BoundsMap::all(&self.input().bounds_all(), self.output.rank()))
    }

    pub fn execute(&self) -> Result<()> {
        let input = self.input();
        expect_dtype(input, DType::U8)?;
        expect_dtype(&self.output, DType::U8)?;
        let input_zero = u8_zero(input.quantization())?;
        let (_, output_zero) = scale_and_zero(self.output.quantization())?;

        let view = InputView::new(input, &self.output);
        let in_buf = view.buffer::<u8>(input.layout())?;
        let mut out_bytes = self.output.storage().write();
        let mut out = BufferMut::<u8>::new(&mut out_bytes, self.output.layout().clone())?;
        tile_conv_filter_u8(&in_buf, input_zero, output_zero, &mut out)?;
        Ok(())
    }

    pub fn accept(&self, visitor: &mut dyn OpVisitor) {
        visitor.visit_tile_conv_filter(self);
    }
}
