//! Softmax along the channel dimension.

use std::f32::consts::LOG2_E;

use kore_core::{BufferMut, DType, TensorPtr};
use kore_kernels::{softmax_u8, SoftmaxParams};

use crate::bounds::BoundsMap;
use crate::error::Result;
use crate::ops::{expect_dtype, flatten_to_2d, no_bounds, InputView};
use crate::quantize::{get_quantized_mul_and_shift_smaller_than_one, scale_and_zero, u8_zero};
use crate::visitor::OpVisitor;

/// Input multipliers are prescaled by `2^-INPUT_LEFT_SHIFT`.
const INPUT_LEFT_SHIFT: i32 = 6;

#[derive(Debug, Clone)]
pub struct SoftmaxOp {
    inputs: [TensorPtr; 1],
    output: TensorPtr,
    beta: f32,
}

impl SoftmaxOp {
    pub fn new(input: TensorPtr, output: TensorPtr, beta: f32) -> Self {
        Self {
            inputs: [input],
            output,
            beta,
        }
    }

    pub fn name(&self) -> &'static str {
        "Softmax"
    }

    pub fn beta(&self) -> f32 {
        self.beta
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
        let x = self.input();
        let rank = x.rank();
        Ok((1..rank).fold(BoundsMap::new(rank, rank), |map, d| map.elementwise(d, d))
            .constant(0, x.bounds(0)))
    }

    /// Fixed-point form of the input and output rescaling.
    ///
    /// `exp(beta * x)` is evaluated as `2^(x * beta * log2(e))`. The input
    /// zero-point cancels out of the ratio and isn't needed.
    pub fn params(&self) -> Result<SoftmaxParams> {
        let (in_scale, _) = scale_and_zero(self.input().quantization())?;
        let (out_scale, _) = scale_and_zero(self.output.quantization())?;
        let output_zero = u8_zero(self.output.quantization())?;

        let beta2 = self.beta * LOG2_E;
        let real_in = (in_scale * beta2 / (1 << INPUT_LEFT_SHIFT) as f32) as f64;
        let input = get_quantized_mul_and_shift_smaller_than_one(real_in, 16)?;
        let output = get_quantized_mul_and_shift_smaller_than_one(out_scale as f64, 32)?;
        Ok(SoftmaxParams {
            input_multiplier: input.multiplier,
            input_shift: -input.shift,
            output_zero,
            output_multiplier: output.multiplier,
            output_shift: -output.shift,
        })
    }

    pub fn execute(&self) -> Result<()> {
        let input = self.input();
        expect_dtype(input, DType::U8)?;
        expect_dtype(&self.output, DType::U8)?;
        let params = self.params()?;

        let mut in_layout = input.layout().clone();
        let mut out_layout = self.output.layout().clone();
        flatten_to_2d(&mut in_layout, &mut out_layout)?;

        let view = InputView::new(input, &self.output);
        let in_buf = view.buffer::<u8>(&in_layout)?;
        let mut out_bytes = self.output.storage().write();
        let mut out = BufferMut::<u8>::new(&mut out_bytes, out_layout)?;
        softmax_u8(&in_buf, &params, &mut out)?;
        Ok(())
    }

    pub fn accept(&self, visitor: &mut dyn OpVisitor) {
        visitor.visit_softmax(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kore_core::{QuantizationInfo, Tensor};

    fn out_q() -> QuantizationInfo {
        QuantizationInfo::new(1.0 / 256.0, 0)
    }

    #[test]
    fn test_uniform_input() {
        let input = Tensor::from_u8("input", &[4, 2], &[10; 8], QuantizationInfo::new(0.1, 0))
            .unwrap()
            .into_ptr();
        let out = Tensor::new("out", DType::U8, &[4, 2], out_q()).into_ptr();
        SoftmaxOp::new(input, out.clone(), 1.0).execute().unwrap();
        assert_eq!(out.to_vec::<u8>().unwrap(), [64; 8]);
    }

    #[test]
    fn test_dominant_channel() {
        let input = Tensor::from_u8("input", &[2, 1], &[0, 255], QuantizationInfo::new(1.0, 0))
            .unwrap()
            .into_ptr();
        let out = Tensor::new("out", DType::U8, &[2, 1], out_q()).into_ptr();
        SoftmaxOp::new(input, out.clone(), 1.0).execute().unwrap();
        assert_eq!(out.to_vec::<u8>().unwrap(), [0, 255]);
    }

    #[test]
    fn test_params() {
        let input = Tensor::new("input", DType::U8, &[2, 1], QuantizationInfo::new(1.0, 0)).into_ptr();
        let out = Tensor::new("out", DType::U8, &[2, 1], out_q()).into_ptr();
        let params = SoftmaxOp::new(input, out, 1.0).params().unwrap();
        // 1/256 = 0.5 * 2^-7
        assert_eq!(params.output_multiplier, 1 << 30);
        assert_eq!(params.output_shift, 7);
        assert!(params.input_shift >= 0);
    }
}
