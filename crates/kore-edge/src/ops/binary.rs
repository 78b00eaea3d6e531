//! Elementwise add, subtract and multiply with broadcasting.

use kore_core::{BufferMut, DType, Layout, TensorPtr};
use kore_kernels::{add_u8_u8, mul_u8_u8_u8};

use crate::bounds::BoundsMap;
use crate::error::{OpError, Result};
use crate::ops::{expect_dtype, no_bounds, InputView};
use crate::quantize::{get_add_params, get_mul_params, ActivationFunction};
use crate::shapes::{broadcast_shapes, optimize_elementwise_shapes, pad_to_rank};
use crate::visitor::OpVisitor;

/// Rank the elementwise kernels are called at.
const KERNEL_RANK: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
}

impl BinaryOperator {
    pub fn name(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "Add",
            BinaryOperator::Sub => "Sub",
            BinaryOperator::Mul => "Mul",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BinaryOp {
    inputs: [TensorPtr; 2],
    output: TensorPtr,
    op: BinaryOperator,
    activation: ActivationFunction,
}

impl BinaryOp {
    pub fn new(
        a: TensorPtr,
        b: TensorPtr,
        output: TensorPtr,
        op: BinaryOperator,
        activation: ActivationFunction,
    ) -> Self {
        Self {
            inputs: [a, b],
            output,
            op,
            activation,
        }
    }

    pub fn name(&self) -> &'static str {
        self.op.name()
    }

    pub fn operator(&self) -> BinaryOperator {
        self.op
    }

    pub fn activation(&self) -> ActivationFunction {
        self.activation
    }

    pub fn inputs(&self) -> &[TensorPtr] {
        &self.inputs
    }

    pub fn output(&self) -> &TensorPtr {
        &self.output
    }

    /// Elementwise, except that extent-1 input dimensions broadcast against
    /// wider outputs and always read their single coordinate.
    pub fn map_bounds(&self, input: usize, output: usize) -> Result<BoundsMap> {
        if input >= 2 || output != 0 {
            return Err(no_bounds(input, output));
        }
        let a = &self.inputs[input];
        let rank = self.output.rank();
        if a.rank() > rank {
            return Err(OpError::config(format!(
                "input rank {} exceeds output rank {rank}",
                a.rank()
            )));
        }
        let mut map = BoundsMap::new(a.rank(), rank);
        for d in 0..a.rank() {
            map = if a.extent(d) == 1 && self.output.extent(d) != 1 {
                map.constant(d, a.bounds(d))
            } else {
                map.elementwise(d, d)
            };
        }
        Ok(map)
    }

    pub fn execute(&self) -> Result<()> {
        let [a, b] = &self.inputs;
        expect_dtype(a, DType::U8)?;
        expect_dtype(b, DType::U8)?;
        expect_dtype(&self.output, DType::U8)?;

        let rank = self.output.rank().max(KERNEL_RANK);
        let mut out_layout = self.output.layout().clone();
        pad_to_rank(&mut out_layout, rank);
        let mut a_layout = a.layout().clone();
        let mut b_layout = b.layout().clone();
        broadcast_shapes(&mut a_layout, &mut b_layout, rank)?;
        fit_to_output(&mut a_layout, &out_layout)?;
        fit_to_output(&mut b_layout, &out_layout)?;
        optimize_elementwise_shapes(&mut [&mut a_layout, &mut b_layout, &mut out_layout], rank);

        let a_view = InputView::new(a, &self.output);
        let b_view = InputView::new(b, &self.output);
        let a_buf = a_view.buffer::<u8>(&a_layout)?;
        let b_buf = b_view.buffer::<u8>(&b_layout)?;
        let mut out_bytes = self.output.storage().write();
        let mut out = BufferMut::<u8>::new(&mut out_bytes, out_layout)?;

        let (aq, bq, oq) = (a.quantization(), b.quantization(), self.output.quantization());
        match self.op {
            BinaryOperator::Add | BinaryOperator::Sub => {
                let sign = if self.op == BinaryOperator::Add { 1 } else { -1 };
                let params = get_add_params(aq, bq, sign, oq, self.activation)?;
                add_u8_u8(&a_buf, &b_buf, &params, &mut out)?;
            }
            BinaryOperator::Mul => {
                let params = get_mul_params(aq, bq, oq, self.activation)?;
                mul_u8_u8_u8(&a_buf, &b_buf, &params, &mut out)?;
            }
        }
        Ok(())
    }

    pub fn accept(&self, visitor: &mut dyn OpVisitor) {
        visitor.visit_binary(self);
    }
}

/// Match one operand to the output region: broadcast dimensions stretch
/// across it with stride 0, the others are cropped to it and must cover it.
fn fit_to_output(input: &mut Layout, output: &Layout) -> Result<()> {
    for d in 0..output.rank() {
        let have = input.dim(d).interval();
        let want = output.dim(d).interval();
        if have.extent() == 1 && have != want {
            continue;
        }
        if !have.contains(&want) {
            return Err(OpError::config(format!(
                "input dimension {d} covers {have}, output needs {want}"
            )));
        }
        input.crop(d, want);
    }
    let mut target = output.clone();
    broadcast_shapes(input, &mut target, output.rank())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kore_core::{Interval, QuantizationInfo, Tensor};

    fn u8_tensor(name: &str, extents: &[i32], data: &[u8], q: &QuantizationInfo) -> TensorPtr {
        Tensor::from_u8(name, extents, data, q.clone()).unwrap().into_ptr()
    }

    #[test]
    fn test_add_same_quantization_is_saturating_sum() {
        let q = QuantizationInfo::new(0.25, 10);
        let a = u8_tensor("a", &[2, 3], &[10, 20, 30, 200, 250, 0], &q);
        let b = u8_tensor("b", &[2, 3], &[10, 15, 40, 100, 20, 5], &q);
        let out = Tensor::new("out", DType::U8, &[2, 3], q.clone()).into_ptr();
        let op = BinaryOp::new(a, b, out.clone(), BinaryOperator::Add, ActivationFunction::None);
        op.execute().unwrap();
        assert_eq!(out.to_vec::<u8>().unwrap(), [10, 25, 60, 255, 255, 0]);
    }

    #[test]
    fn test_sub_with_broadcast() {
        let q = QuantizationInfo::new(1.0, 0);
        let a = u8_tensor("a", &[3, 2], &[10, 20, 30, 40, 50, 60], &q);
        let b = u8_tensor("b", &[1, 2], &[5, 10], &q);
        let out = Tensor::new("out", DType::U8, &[3, 2], q.clone()).into_ptr();
        let op = BinaryOp::new(a, b, out.clone(), BinaryOperator::Sub, ActivationFunction::None);
        op.execute().unwrap();
        assert_eq!(out.to_vec::<u8>().unwrap(), [5, 15, 25, 30, 40, 50]);
    }

    #[test]
    fn test_mul_with_relu() {
        let q = QuantizationInfo::new(0.5, 128);
        let oq = QuantizationInfo::new(0.5, 128);
        let a = u8_tensor("a", &[4], &[130, 126, 132, 128], &q);
        let b = u8_tensor("b", &[4], &[132, 132, 120, 255], &q);
        let out = Tensor::new("out", DType::U8, &[4], oq).into_ptr();
        let op = BinaryOp::new(a, b, out.clone(), BinaryOperator::Mul, ActivationFunction::Relu);
        op.execute().unwrap();
        // Real products 1*2, -1*2, 2*-4, 0, rescaled to 0.5 steps.
        assert_eq!(out.to_vec::<u8>().unwrap(), [132, 128, 128, 128]);
    }

    #[test]
    fn test_broadcast_mismatch_fails() {
        let q = QuantizationInfo::new(1.0, 0);
        let a = u8_tensor("a", &[3], &[1, 2, 3], &q);
        let b = u8_tensor("b", &[2], &[1, 2], &q);
        let out = Tensor::new("out", DType::U8, &[3], q).into_ptr();
        let op = BinaryOp::new(a, b, out, BinaryOperator::Add, ActivationFunction::None);
        assert!(matches!(op.execute(), Err(OpError::Broadcast { dim: 0, a: 3, b: 2 })));
    }

    #[test]
    fn test_bounds_broadcast_dims_are_constant() {
        let q = QuantizationInfo::new(1.0, 0);
        let a = Tensor::new("a", DType::U8, &[8, 4], q.clone()).into_ptr();
        let b = Tensor::new("b", DType::U8, &[1, 4], q.clone()).into_ptr();
        let out = Tensor::new("out", DType::U8, &[8, 4], q).into_ptr();
        let op = BinaryOp::new(a, b, out, BinaryOperator::Add, ActivationFunction::None);
        let region = [Interval::new(2, 5), Interval::new(1, 1)];
        let a_region = op.map_bounds(0, 0).unwrap().evaluate(&region).unwrap();
        let b_region = op.map_bounds(1, 0).unwrap().evaluate(&region).unwrap();
        assert_eq!(a_region.as_slice(), &region);
        assert_eq!(b_region.as_slice(), &[Interval::point(0), Interval::new(1, 1)]);
        assert!(op.map_bounds(2, 0).is_err());
    }
}
