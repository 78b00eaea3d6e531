//! Average and max pooling with "same" padding.

use kore_core::{BufferMut, DType, Interval, TensorPtr};
use kore_kernels::{average_pool_u8, max_pool_u8, PoolParams};

use crate::bounds::BoundsMap;
use crate::error::Result;
use crate::ops::{expect_dtype, expect_rank, no_bounds, InputView};
use crate::quantize::{get_output_range, ActivationFunction};
use crate::visitor::OpVisitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PoolOperator {
    Average,
    Max,
}

impl PoolOperator {
    pub fn name(&self) -> &'static str {
        match self {
            PoolOperator::Average => "Average",
            PoolOperator::Max => "Max",
        }
    }
}

/// Padding before the first window so that `out_size` windows center on
/// `in_size` inputs.
///
/// Both sizes are full tensor extents. A sub-region of either gives a
/// different padding, so the result is fixed when the op is built.
fn same_padding(stride: i32, in_size: i32, filter_size: i32, out_size: i32) -> i32 {
    ((out_size - 1) * stride + filter_size - in_size).max(0) / 2
}

#[derive(Debug, Clone)]
pub struct PoolOp {
    inputs: [TensorPtr; 1],
    output: TensorPtr,
    op: PoolOperator,
    stride: [i32; 2],
    filter_size: [i32; 2],
    padding: [i32; 2],
    activation: ActivationFunction,
}

impl PoolOp {
    pub fn new(
        input: TensorPtr,
        output: TensorPtr,
        op: PoolOperator,
        stride: [i32; 2],
        filter_size: [i32; 2],
        activation: ActivationFunction,
    ) -> Self {
        let padding = if input.rank() == 4 && output.rank() == 4 {
            [1, 2].map(|d| same_padding(stride[d - 1], input.extent(d), filter_size[d - 1], output.extent(d)))
        } else {
            [0, 0]
        };
        Self {
            inputs: [input],
            output,
            op,
            stride,
            filter_size,
            padding,
            activation,
        }
    }

    /// Replace the padding derived from the constructor's tensors, for an op
    /// running on sub-regions of larger tensors.
    pub fn with_padding(mut self, padding: [i32; 2]) -> Self {
        self.padding = padding;
        self
    }

    pub fn name(&self) -> &'static str {
        match self.op {
            PoolOperator::Average => "AveragePool",
            PoolOperator::Max => "MaxPool",
        }
    }

    pub fn operator(&self) -> PoolOperator {
        self.op
    }

    pub fn stride(&self) -> [i32; 2] {
        self.stride
    }

    pub fn filter_size(&self) -> [i32; 2] {
        self.filter_size
    }

    /// Input padding before the first window along x and y.
    pub fn padding(&self) -> [i32; 2] {
        self.padding
    }

    pub fn activation(&self) -> ActivationFunction {
        self.activation
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
        Ok(BoundsMap::new(4, 4)
            .elementwise(0, 0)
            .downsample(1, 1, self.stride[0], Interval::new(0, self.filter_size[0] - 1))
            .offset(1, -self.padding[0])
            .downsample(2, 2, self.stride[1], Interval::new(0, self.filter_size[1] - 1))
            .offset(2, -self.padding[1])
            .elementwise(3, 3))
    }

    pub fn execute(&self) -> Result<()> {
        let input = self.input();
        expect_dtype(input, DType::U8)?;
        expect_dtype(&self.output, DType::U8)?;
        expect_rank(input, 4)?;
        expect_rank(&self.output, 4)?;
        let range = get_output_range(self.activation, self.output.quantization())?;

        let mut in_layout = input.layout().clone();
        in_layout.translate(1, self.padding[0]);
        in_layout.translate(2, self.padding[1]);

        let params = PoolParams {
            stride: self.stride,
            filter: self.filter_size,
            min: range.min as u8,
            max: range.max as u8,
        };
        let view = InputView::new(input, &self.output);
        let in_buf = view.buffer::<u8>(&in_layout)?;
        let mut out_bytes = self.output.storage().write();
        let mut out = BufferMut::<u8>::new(&mut out_bytes, self.output.layout().clone())?;
        match self.op {
            PoolOperator::Average => average_pool_u8(&in_buf, &params, &mut out)?,
            PoolOperator::Max => max_pool_u8(&in_buf, &params, &mut out)?,
        }
        Ok(())
    }

    pub fn accept(&self, visitor: &mut dyn OpVisitor) {
        visitor.visit_pool(self);
    }
}
