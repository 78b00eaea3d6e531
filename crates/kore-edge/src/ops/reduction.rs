//! Reductions over a constant set of axes.

use kore_core::{BufferMut, DType, KoreError, TensorPtr};
use kore_kernels::{mean_u8, MeanWindow};
use smallvec::SmallVec;

use crate::bounds::BoundsMap;
use crate::error::{OpError, Result};
use crate::ops::{expect_dtype, expect_rank, no_bounds, InputView};
use crate::visitor::OpVisitor;

/// Rank the mean kernel works at.
const MEAN_RANK: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReductionOperator {
    Mean,
}

impl ReductionOperator {
    pub fn name(&self) -> &'static str {
        match self {
            ReductionOperator::Mean => "Mean",
        }
    }
}

/// Reduce `input` over the axes listed in the `i32` tensor `indices`.
///
/// Negative axes count from the end. The output either keeps the reduced
/// dimensions with extent 1 (same rank as the input) or drops them.
#[derive(Debug, Clone)]
pub struct ReductionOp {
    inputs: [TensorPtr; 2],
    output: TensorPtr,
    op: ReductionOperator,
}

impl ReductionOp {
    pub fn new(input: TensorPtr, indices: TensorPtr, output: TensorPtr, op: ReductionOperator) -> Self {
        Self {
            inputs: [input, indices],
            output,
            op,
        }
    }

    pub fn name(&self) -> &'static str {
        self.op.name()
    }

    pub fn operator(&self) -> ReductionOperator {
        self.op
    }

    pub fn input(&self) -> &TensorPtr {
        &self.inputs[0]
    }

    pub fn indices(&self) -> &TensorPtr {
        &self.inputs[1]
    }

    pub fn inputs(&self) -> &[TensorPtr] {
        &self.inputs
    }

    pub fn output(&self) -> &TensorPtr {
        &self.output
    }

    /// Per input dimension, whether it is reduced.
    pub fn reduced(&self) -> Result<SmallVec<[bool; 6]>> {
        let indices = self.indices();
        expect_dtype(indices, DType::I32)?;
        expect_rank(indices, 1)?;
        let rank = self.input().rank();
        let mut reduced: SmallVec<[bool; 6]> = SmallVec::from_elem(false, rank);
        let bounds = indices.bounds(0);
        for i in bounds.min..=bounds.max {
            let axis = indices.get::<i32>(&[i])?;
            let d = if axis < 0 { axis + rank as i32 } else { axis };
            if !(0..rank as i32).contains(&d) {
                return Err(KoreError::InvalidAxis {
                    axis: axis as i64,
                    rank,
                }
                .into());
            }
            reduced[d as usize] = true;
        }
        Ok(reduced)
    }

    /// Whether the output keeps reduced dimensions, checked against the
    /// output rank.
    fn keeps_dims(&self, reduced: &[bool]) -> Result<bool> {
        let rank_in = self.input().rank();
        let rank_out = self.output.rank();
        let remaining = rank_in - reduced.iter().filter(|&&r| r).count();
        if rank_out == rank_in {
            Ok(true)
        } else if rank_out == remaining {
            Ok(false)
        } else {
            Err(OpError::config(format!(
                "reducing rank {rank_in} can't produce rank {rank_out}"
            )))
        }
    }

    pub fn map_bounds(&self, input: usize, output: usize) -> Result<BoundsMap> {
        if output != 0 {
            return Err(no_bounds(input, output));
        }
        let rank_out = self.output.rank();
        match input {
            0 => {
                let x = self.input();
                let reduced = self.reduced()?;
                let keep = self.keeps_dims(&reduced)?;
                let mut map = BoundsMap::new(x.rank(), rank_out);
                let mut d_out = 0;
                for (d, &r) in reduced.iter().enumerate() {
                    if r {
                        map = map.constant(d, x.bounds(d));
                        if keep {
                            d_out += 1;
                        }
                    } else {
                        map = map.elementwise(d, d_out);
                        d_out += 1;
                    }
                }
                Ok(map)
            }
            1 => Ok(BoundsMap::all(&self.indices().bounds_all(), rank_out)),
            _ => Err(no_bounds(input, output)),
        }
    }

    pub fn execute(&self) -> Result<()> {
        let input = self.input();
        expect_dtype(input, DType::U8)?;
        expect_dtype(&self.output, DType::U8)?;
        expect_rank(input, MEAN_RANK)?;
        if input.quantization() != self.output.quantization() {
            return Err(OpError::Quantization(
                "mean input and output quantization must match".into(),
            ));
        }
        let reduced = self.reduced()?;
        let keep = self.keeps_dims(&reduced)?;

        let in_layout = input.layout();
        let mut out_layout = self.output.layout().clone();
        if !keep {
            for (d, &r) in reduced.iter().enumerate() {
                if r {
                    out_layout.embed(d, 0);
                }
            }
        }

        let mut window: MeanWindow = [(0, 1); MEAN_RANK];
        for (d, &r) in reduced.iter().enumerate() {
            if !r {
                continue;
            }
            let out_dim = out_layout.dim(d);
            if out_dim.extent != 1 {
                return Err(OpError::config(format!(
                    "reduced output dimension {d} has extent {}",
                    out_dim.extent
                )));
            }
            let in_dim = in_layout.dim(d);
            window[d] = (in_dim.min - out_dim.min, in_dim.extent);
        }

        let view = InputView::new(input, &self.output);
        let in_buf = view.buffer::<u8>(in_layout)?;
        let mut out_bytes = self.output.storage().write();
        let mut out = BufferMut::<u8>::new(&mut out_bytes, out_layout)?;
        match self.op {
            ReductionOperator::Mean => mean_u8(&in_buf, &window, &mut out)?,
        }
        Ok(())
    }

    pub fn accept(&self, visitor: &mut dyn OpVisitor) {
        visitor.visit_reduction(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kore_core::{Interval, QuantizationInfo, Tensor};

    fn q() -> QuantizationInfo {
        QuantizationInfo::new(0.5, 3)
    }

    fn input() -> TensorPtr {
        let data: Vec<u8> = (0..8).collect();
        Tensor::from_u8("input", &[2, 2, 2, 1], &data, q()).unwrap().into_ptr()
    }

    fn axes(values: &[i32]) -> TensorPtr {
        Tensor::from_i32("axes", &[values.len() as i32], values, QuantizationInfo::default())
            .unwrap()
            .into_ptr()
    }

    #[test]
    fn test_mean_keep_dims() {
        let out = Tensor::new("out", DType::U8, &[2, 1, 1, 1], q()).into_ptr();
        let op = ReductionOp::new(input(), axes(&[1, 2]), out.clone(), ReductionOperator::Mean);
        op.execute().unwrap();
        assert_eq!(out.to_vec::<u8>().unwrap(), [3, 4]);
    }

    #[test]
    fn test_mean_drops_dims_with_negative_axis() {
        let out = Tensor::new("out", DType::U8, &[2, 1], q()).into_ptr();
        let op = ReductionOp::new(input(), axes(&[-3, 2]), out.clone(), ReductionOperator::Mean);
        assert_eq!(op.reduced().unwrap().as_slice(), &[false, true, true, false]);
        op.execute().unwrap();
        assert_eq!(out.to_vec::<u8>().unwrap(), [3, 4]);

        let r = op
            .map_bounds(0, 0)
            .unwrap()
            .evaluate(&[Interval::new(1, 1), Interval::new(0, 0)])
            .unwrap();
        assert_eq!(
            r.as_slice(),
            &[Interval::new(1, 1), Interval::new(0, 1), Interval::new(0, 1), Interval::new(0, 0)]
        );
    }

    #[test]
    fn test_invalid_axis() {
        let out = Tensor::new("out", DType::U8, &[2, 2, 2, 1], q()).into_ptr();
        let op = ReductionOp::new(input(), axes(&[4]), out, ReductionOperator::Mean);
        let err = op.execute().unwrap_err();
        assert!(matches!(err, OpError::Core(KoreError::InvalidAxis { axis: 4, rank: 4 })));
    }

    #[test]
    fn test_quantization_must_match() {
        let out = Tensor::new("out", DType::U8, &[2, 1, 1, 1], QuantizationInfo::new(1.0, 0)).into_ptr();
        let op = ReductionOp::new(input(), axes(&[1, 2]), out, ReductionOperator::Mean);
        assert!(matches!(op.execute(), Err(OpError::Quantization(_))));
    }
}
