//! L2 normalization along the channel dimension.

use kore_core::{BufferMut, DType, TensorPtr};
use kore_kernels::l2_normalization_u8;

use crate::bounds::BoundsMap;
use crate::error::Result;
use crate::ops::{expect_dtype, expect_quantization, flatten_to_2d, no_bounds, InputView};
use crate::quantize::u8_zero;
use crate::visitor::OpVisitor;

#[derive(Debug, Clone)]
pub struct L2NormalizationOp {
    inputs: [TensorPtr; 1],
    output: TensorPtr,
}

impl L2NormalizationOp {
    pub fn new(input: TensorPtr, output: TensorPtr) -> Self {
        Self {
            inputs: [input],
            output,
        }
    }

    pub fn name(&self) -> &'static str {
        "L2Normalization"
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

    /// Every output channel needs the whole channel vector.
    pub fn map_bounds(&self, input: usize, output: usize) -> Result<BoundsMap> {
        if input != 0 || output != 0 {
            return Err(no_bounds(input, output));
        }
        let x = self.input();
        let rank = x.rank();
        Ok((1..rank).fold(BoundsMap::new(rank, rank), |map, d| map.elementwise(d, d))
            .constant(0, x.bounds(0)))
    }

    pub fn execute(&self) -> Result<()> {
        let input = self.input();
        expect_dtype(input, DType::U8)?;
        expect_dtype(&self.output, DType::U8)?;
        expect_quantization(&self.output, 1.0 / 128.0, 128)?;
        let input_zero = u8_zero(input.quantization())?;

        let mut in_layout = input.layout().clone();
        let mut out_layout = self.output.layout().clone();
        flatten_to_2d(&mut in_layout, &mut out_layout)?;

        let view = InputView::new(input, &self.output);
        let in_buf = view.buffer::<u8>(&in_layout)?;
        let mut out_bytes = self.output.storage().write();
        let mut out = BufferMut::<u8>::new(&mut out_bytes, out_layout)?;
        l2_normalization_u8(&in_buf, input_zero, &mut out)?;
        Ok(())
    }

    pub fn accept(&self, visitor: &mut dyn OpVisitor) {
        visitor.visit_l2_normalization(self);
    }
}
