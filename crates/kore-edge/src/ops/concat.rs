//! Concatenation along one axis.

use kore_core::{BufferMut, DType, TensorPtr};

use crate::bounds::BoundsMap;
use crate::error::{OpError, Result};
use crate::ops::requantize::requantize;
use crate::ops::{expect_dtype, no_bounds, same_bytes, InputView};
use crate::shapes::crop_to_union;
use crate::visitor::OpVisitor;

#[derive(Debug, Clone)]
pub struct ConcatenationOp {
    inputs: Vec<TensorPtr>,
    output: TensorPtr,
    axis: usize,
}

impl ConcatenationOp {
    pub fn new(inputs: Vec<TensorPtr>, output: TensorPtr, axis: usize) -> Self {
        Self { inputs, output, axis }
    }

    pub fn name(&self) -> &'static str {
        "Concatenation"
    }

    pub fn axis(&self) -> usize {
        self.axis
    }

    pub fn inputs(&self) -> &[TensorPtr] {
        &self.inputs
    }

    pub fn output(&self) -> &TensorPtr {
        &self.output
    }

    /// `input = output + delta` along the axis for input `i`: each input
    /// starts where the previous ones end.
    fn axis_delta(&self, i: usize) -> Result<i32> {
        let rank = self.output.rank();
        if self.axis >= rank {
            return Err(OpError::config(format!("axis {} out of rank {rank}", self.axis)));
        }
        let mut start = self.output.bounds(self.axis).min;
        for input in &self.inputs[..i] {
            start += input.extent(self.axis);
        }
        Ok(self.inputs[i].bounds(self.axis).min - start)
    }

    pub fn map_bounds(&self, input: usize, output: usize) -> Result<BoundsMap> {
        if input >= self.inputs.len() || output != 0 {
            return Err(no_bounds(input, output));
        }
        let rank = self.output.rank();
        if self.inputs[input].rank() != rank {
            return Err(OpError::config(format!(
                "input rank {} doesn't match output rank {rank}",
                self.inputs[input].rank()
            )));
        }
        Ok(BoundsMap::elementwise_all(rank).offset(self.axis, self.axis_delta(input)?))
    }

    pub fn execute(&self) -> Result<()> {
        expect_dtype(&self.output, DType::U8)?;
        let mut layouts = Vec::with_capacity(self.inputs.len());
        for (i, input) in self.inputs.iter().enumerate() {
            expect_dtype(input, DType::U8)?;
            if input.rank() != self.output.rank() {
                return Err(OpError::config(format!(
                    "input {i} has rank {}, output has rank {}",
                    input.rank(),
                    self.output.rank()
                )));
            }
            let delta = self.axis_delta(i)?;
            layouts.push(input.layout().translated(self.axis, -delta));
        }
        let views: Vec<InputView> = self
            .inputs
            .iter()
            .map(|input| InputView::new(input, &self.output))
            .collect();

        let mut out_bytes = self.output.storage().write();
        for ((input, view), mut in_layout) in self.inputs.iter().zip(&views).zip(layouts) {
            let mut out_layout = self.output.layout().clone();
            crop_to_union(&mut out_layout, &mut in_layout)?;
            let in_place = same_bytes(input.storage(), &in_layout, self.output.storage(), &out_layout);
            let in_buf = view.buffer::<u8>(&in_layout)?;
            let mut out = BufferMut::<u8>::new(&mut out_bytes, out_layout)?;
            requantize(
                &in_buf,
                input.quantization(),
                &mut out,
                self.output.quantization(),
                in_place,
            )?;
        }
        Ok(())
    }

    pub fn accept(&self, visitor: &mut dyn OpVisitor) {
        visitor.visit_concatenation(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kore_core::{Interval, QuantizationInfo, Tensor};

    #[test]
    fn test_concat_axis_1_with_rescale() {
        let q = QuantizationInfo::new(1.0, 0);
        let half = QuantizationInfo::new(0.5, 0);
        let a = Tensor::from_u8("a", &[2, 1], &[1, 2], q.clone()).unwrap().into_ptr();
        let b = Tensor::from_u8("b", &[2, 2], &[6, 8, 10, 12], half).unwrap().into_ptr();
        let out = Tensor::new("out", DType::U8, &[2, 3], q).into_ptr();
        let op = ConcatenationOp::new(vec![a, b], out.clone(), 1);
        op.execute().unwrap();
        assert_eq!(out.to_vec::<u8>().unwrap(), [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_bounds_offsets() {
        let q = QuantizationInfo::new(1.0, 0);
        let a = Tensor::new("a", DType::U8, &[3], q.clone()).into_ptr();
        let b = Tensor::new("b", DType::U8, &[4], q.clone()).into_ptr();
        let out = Tensor::new("out", DType::U8, &[7], q).into_ptr();
        let op = ConcatenationOp::new(vec![a, b], out, 0);
        let region = [Interval::new(2, 5)];
        let first = op.map_bounds(0, 0).unwrap().evaluate(&region).unwrap();
        let second = op.map_bounds(1, 0).unwrap().evaluate(&region).unwrap();
        assert_eq!(first[0], Interval::new(2, 5));
        assert_eq!(second[0], Interval::new(-1, 2));
        assert!(op.map_bounds(2, 0).is_err());
    }
}
