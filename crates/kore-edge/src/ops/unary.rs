//! Logistic and tanh.

use std::f32::consts::LOG2_E;

use kore_core::{BufferMut, DType, TensorPtr};
use kore_kernels::{logistic_u8, tanh_u8, UnaryParams};

use crate::bounds::BoundsMap;
use crate::error::{OpError, Result};
use crate::ops::{expect_dtype, expect_quantization, no_bounds, InputView};
use crate::quantize::{get_quantized_mul_and_shift_smaller_than_one, scale_and_zero, u8_zero};
use crate::shapes::optimize_elementwise_shapes;
use crate::visitor::OpVisitor;

const INPUT_LEFT_SHIFT: i32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UnaryOperator {
    Logistic,
    Tanh,
}

impl UnaryOperator {
    pub fn name(&self) -> &'static str {
        match self {
            UnaryOperator::Logistic => "Logistic",
            UnaryOperator::Tanh => "Tanh",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnaryOp {
    inputs: [TensorPtr; 1],
    output: TensorPtr,
    op: UnaryOperator,
}

impl UnaryOp {
    pub fn new(input: TensorPtr, output: TensorPtr, op: UnaryOperator) -> Self {
        Self {
            inputs: [input],
            output,
            op,
        }
    }

    pub fn name(&self) -> &'static str {
        self.op.name()
    }

    pub fn operator(&self) -> UnaryOperator {
        self.op
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
        Ok(BoundsMap::elementwise_all(self.input().rank()))
    }

    /// Input rescaling into `log2` units; the output quantization is fixed
    /// per operator.
    fn params(&self) -> Result<UnaryParams> {
        let input_zero = u8_zero(self.input().quantization())?;
        let (in_scale, _) = scale_and_zero(self.input().quantization())?;
        let prescale = (1 << INPUT_LEFT_SHIFT) as f32;
        let (real, sign) = match self.op {
            UnaryOperator::Logistic => {
                expect_quantization(&self.output, 1.0 / 256.0, 0)?;
                (in_scale * LOG2_E / prescale, -1)
            }
            UnaryOperator::Tanh => {
                expect_quantization(&self.output, 1.0 / 128.0, 128)?;
                (2.0 * in_scale * LOG2_E / prescale, 1)
            }
        };
        let m = get_quantized_mul_and_shift_smaller_than_one(real as f64, 16)?;
        Ok(UnaryParams {
            input_zero,
            multiplier: sign * m.multiplier,
            shift: -m.shift,
        })
    }

    pub fn execute(&self) -> Result<()> {
        let input = self.input();
        expect_dtype(input, DType::U8)?;
        expect_dtype(&self.output, DType::U8)?;
        if input.rank() != self.output.rank() {
            return Err(OpError::config(format!(
                "input rank {} doesn't match output rank {}",
                input.rank(),
                self.output.rank()
            )));
        }
        let params = self.params()?;

        let mut in_layout = input.layout().clone();
        let mut out_layout = self.output.layout().clone();
        for d in 0..out_layout.rank() {
            in_layout.crop(d, out_layout.dim(d).interval());
        }
        optimize_elementwise_shapes(&mut [&mut in_layout, &mut out_layout], 1);

        let view = InputView::new(input, &self.output);
        let in_buf = view.buffer::<u8>(&in_layout)?;
        let mut out_bytes = self.output.storage().write();
        let mut out = BufferMut::<u8>::new(&mut out_bytes, out_layout)?;
        match self.op {
            UnaryOperator::Logistic => logistic_u8(&in_buf, &params, &mut out)?,
            UnaryOperator::Tanh => tanh_u8(&in_buf, &params, &mut out)?,
        }
        Ok(())
    }

    pub fn accept(&self, visitor: &mut dyn OpVisitor) {
        visitor.visit_unary(self);
    }
}
