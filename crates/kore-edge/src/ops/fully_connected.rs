//! Fully connected layer.
//!
//! Input `[C, ..., B]` (all dimensions but the last are the reduction),
//! filter `[C, K]`, bias `[K]` (`i32`), output `[K, B]`.

use kore_core::{BufferMut, DType, TensorPtr};
use kore_kernels::{fully_connected_u8, FullyConnectedParams};

use crate::bounds::BoundsMap;
use crate::error::{OpError, Result};
use crate::ops::{expect_dtype, expect_rank, no_bounds, InputView};
use crate::quantize::{get_output_range, get_quantized_multiply_params, ActivationFunction};
use crate::shapes::{fuse_cx, pad_to_rank};
use crate::visitor::OpVisitor;

#[derive(Debug, Clone)]
pub struct FullyConnectedOp {
    inputs: [TensorPtr; 3],
    output: TensorPtr,
    activation: ActivationFunction,
}

impl FullyConnectedOp {
    pub fn new(
        input: TensorPtr,
        filter: TensorPtr,
        bias: TensorPtr,
        output: TensorPtr,
        activation: ActivationFunction,
    ) -> Self {
        Self {
            inputs: [input, filter, bias],
            output,
            activation,
        }
    }

    pub fn name(&self) -> &'static str {
        "FullyConnected"
    }

    pub fn input(&self) -> &TensorPtr {
        &self.inputs[0]
    }

    pub fn filter(&self) -> &TensorPtr {
        &self.inputs[1]
    }

    pub fn bias(&self) -> &TensorPtr {
        &self.inputs[2]
    }

    pub fn inputs(&self) -> &[TensorPtr] {
        &self.inputs
    }

    pub fn output(&self) -> &TensorPtr {
        &self.output
    }

    pub fn activation(&self) -> ActivationFunction {
        self.activation
    }

    pub fn map_bounds(&self, input: usize, output: usize) -> Result<BoundsMap> {
        if output != 0 {
            return Err(no_bounds(input, output));
        }
        match input {
            0 => {
                let x = self.input();
                if x.rank() == 0 {
                    return Err(OpError::config("fully connected input must have a batch dimension"));
                }
                let last = x.rank() - 1;
                let map = (0..last).fold(BoundsMap::new(x.rank(), 2), |map, d| map.constant(d, x.bounds(d)));
                Ok(map.elementwise(last, 1))
            }
            1 => {
                expect_rank(self.filter(), 2)?;
                Ok(BoundsMap::new(2, 2)
                    .constant(0, self.filter().bounds(0))
                    .elementwise(1, 0))
            }
            2 => Ok(BoundsMap::new(1, 2).elementwise(0, 0)),
            _ => Err(no_bounds(input, output)),
        }
    }

    pub fn execute(&self) -> Result<()> {
        let (input, filter, bias) = (self.input(), self.filter(), self.bias());
        expect_dtype(input, DType::U8)?;
        expect_dtype(filter, DType::U8)?;
        expect_dtype(bias, DType::I32)?;
        expect_dtype(&self.output, DType::U8)?;
        expect_rank(filter, 2)?;
        expect_rank(&self.output, 2)?;

        let mut in_layout = input.layout().clone();
        while in_layout.rank() > 2 {
            fuse_cx(&mut in_layout)?;
        }
        pad_to_rank(&mut in_layout, 2);

        let params = get_quantized_multiply_params(
            input.quantization(),
            filter.quantization(),
            self.output.quantization(),
        )?;
        let range = get_output_range(self.activation, self.output.quantization())?;
        let fc = FullyConnectedParams {
            input_zero: params.a_zero,
            filter_zero: params.b_zero,
            output: params.output_stage(range),
        };

        let in_view = InputView::new(input, &self.output);
        let filter_view = InputView::new(filter, &self.output);
        let bias_view = InputView::new(bias, &self.output);
        let in_buf = in_view.buffer::<u8>(&in_layout)?;
        let filter_buf = filter_view.buffer::<u8>(filter.layout())?;
        let bias_buf = bias_view.buffer::<i32>(bias.layout())?;
        let mut out_bytes = self.output.storage().write();
        let mut out = BufferMut::<u8>::new(&mut out_bytes, self.output.layout().clone())?;
        fully_connected_u8(&in_buf, &filter_buf, &bias_buf, &fc, &mut out)?;
        Ok(())
    }

    pub fn accept(&self, visitor: &mut dyn OpVisitor) {
        visitor.visit_fully_connected(self);
    }
}
