//! 2-D convolution over a tiled filter.
//!
//! Tensors: input `[C, X, Y, B]`, filter in the tiled 6-D layout produced by
//! [`TileConvFilterOp`](crate::TileConvFilterOp), bias `[K]` (`i32`),
//! output `[K, X', Y', B]`.

use kore_core::{align_up, ceil_div, BufferMut, DType, Interval, TensorPtr};
use kore_kernels::{ConvParams, TargetConfig};

use crate::bounds::BoundsMap;
use crate::dispatch::ConvKernel;
use crate::error::Result;
use crate::ops::{expect_dtype, expect_rank, no_bounds, InputView};
use crate::quantize::{get_output_range, get_quantized_multiply_params, ActivationFunction};
use crate::shapes::{can_fuse_xy, fuse_xy, pad_to_rank};
use crate::visitor::OpVisitor;

#[derive(Debug, Clone)]
pub struct Conv2DOp {
    inputs: [TensorPtr; 3],
    output: TensorPtr,
    stride: [i32; 2],
    dilation: [i32; 2],
    activation: ActivationFunction,
    target: TargetConfig,
}

impl Conv2DOp {
    pub fn new(
        input: TensorPtr,
        filter: TensorPtr,
        bias: TensorPtr,
        output: TensorPtr,
        stride: [i32; 2],
        dilation: [i32; 2],
        activation: ActivationFunction,
    ) -> Self {
        Self {
            inputs: [input, filter, bias],
            output,
            stride,
            dilation,
            activation,
            target: *TargetConfig::host(),
        }
    }

    /// Build for `target` instead of the host.
    pub fn with_target(mut self, target: TargetConfig) -> Self {
        self.target = target;
        self
    }

    pub fn name(&self) -> &'static str {
        "Conv2D"
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

    pub fn stride(&self) -> [i32; 2] {
        self.stride
    }

    pub fn dilation(&self) -> [i32; 2] {
        self.dilation
    }

    pub fn activation(&self) -> ActivationFunction {
        self.activation
    }

    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    /// Kernel variant used for the full input.
    pub fn kernel(&self) -> ConvKernel {
        ConvKernel::select(&self.target, self.input().extent(0))
    }

    pub fn map_bounds(&self, input: usize, output: usize) -> Result<BoundsMap> {
        if output != 0 {
            return Err(no_bounds(input, output));
        }
        expect_rank(self.filter(), 6)?;
        let channels = self.input().extent(0);
        let unroll = self.target.conv_unroll(channels);
        let filter = self.filter();
        match input {
            0 => {
                let fw = filter.extent(4);
                let fh = filter.extent(5);
                Ok(BoundsMap::new(4, 4)
                    .constant_extent(0, align_up(channels, unroll))
                    .downsample(1, 1, self.stride[0], Interval::new(0, self.dilation[0] * (fw - 1)))
                    .downsample(2, 2, self.stride[1], Interval::new(0, self.dilation[1] * (fh - 1)))
                    .elementwise(3, 3))
            }
            1 => {
                let tiling = self.target.conv_tiling;
                let vr = tiling.vector_reduction;
                let vt = tiling.vector_tile;
                Ok(BoundsMap::new(6, 4)
                    .constant_extent(0, vr)
                    .constant_extent(1, vt)
                    .constant_extent(2, align_up(ceil_div(channels, vr), tiling.channel_alignment(unroll)))
                    .upsample(3, 0, vt)
                    .constant(4, filter.bounds(4))
                    .constant(5, filter.bounds(5)))
            }
            2 => Ok(BoundsMap::new(1, 4).elementwise(0, 0)),
            _ => Err(no_bounds(input, output)),
        }
    }

    pub fn execute(&self) -> Result<()> {
        let (input, filter, bias) = (self.input(), self.filter(), self.bias());
        expect_dtype(input, DType::U8)?;
        expect_dtype(filter, DType::U8)?;
        expect_dtype(bias, DType::I32)?;
        expect_dtype(&self.output, DType::U8)?;
        expect_rank(filter, 6)?;

        let params = get_quantized_multiply_params(
            input.quantization(),
            filter.quantization(),
            self.output.quantization(),
        )?;
        let range = get_output_range(self.activation, self.output.quantization())?;

        let mut in_layout = input.layout().clone();
        let mut out_layout = self.output.layout().clone();
        if filter.extent(4) == 1 && filter.extent(5) == 1 && self.stride == [1, 1] {
            // 1x1 filters see x and y as one dimension.
            while can_fuse_xy(&in_layout)
                && can_fuse_xy(&out_layout)
                && in_layout.dim(1).extent == out_layout.dim(1).extent
                && in_layout.dim(2).min == out_layout.dim(2).min
            {
                fuse_xy(&mut in_layout)?;
                fuse_xy(&mut out_layout)?;
            }
            pad_to_rank(&mut in_layout, 4);
            pad_to_rank(&mut out_layout, 4);
        }

        let kernel = ConvKernel::select(&self.target, in_layout.dim(0).extent);
        tracing::debug!(kernel = kernel.name(), "conv2d");

        let conv = ConvParams {
            input_zero: params.a_zero,
            filter_zero: params.b_zero,
            stride: self.stride,
            dilation: self.dilation,
            output: params.output_stage(range),
        };
        let in_view = InputView::new(input, &self.output);
        let filter_view = InputView::new(filter, &self.output);
        let bias_view = InputView::new(bias, &self.output);
        let in_buf = in_view.buffer::<u8>(&in_layout)?;
        let filter_buf = filter_view.buffer::<u8>(filter.layout())?;
        let bias_buf = bias_view.buffer::<i32>(bias.layout())?;
        let mut out_bytes = self.output.storage().write();
        let mut out = BufferMut::<u8>::new(&mut out_bytes, out_layout)?;
        kernel.run(&in_buf, &filter_buf, &bias_buf, &conv, &mut out)?;
        Ok(())
    }

    pub fn accept(&self, visitor: &mut dyn OpVisitor) {
        visitor.visit_conv2d(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kore_core::{QuantizationInfo, Tensor};
    use kore_kernels::TargetArch;

    use crate::ops::TileConvFilterOp;
    use crate::OpError;

    fn tiled_filter(
        target: &TargetConfig,
        values: &[u8],
        extents: [i32; 4],
        q: &QuantizationInfo,
    ) -> TensorPtr {
        let [c, w, h, k] = extents;
        let raw = Tensor::from_u8("raw", &extents, values, q.clone()).unwrap().into_ptr();
        let tiled_extents = target.tiled_filter_extents(c, w, h, k);
        let tiled = Tensor::new("filter", DType::U8, &tiled_extents, q.clone()).into_ptr();
        TileConvFilterOp::new(raw, tiled.clone()).execute().unwrap();
        tiled
    }

    #[test]
    fn test_1x1_conv_fuses_xy() {
        let target = TargetConfig::for_arch(TargetArch::X86_64);
        let q = QuantizationInfo::new(1.0, 0);
        let fq = QuantizationInfo::new(0.5, 0);
        // Two input channels over a 3x2 image, one output channel summing both.
        let input = Tensor::from_u8(
            "input",
            &[2, 3, 2, 1],
            &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12],
            q.clone(),
        )
        .unwrap()
        .into_ptr();
        let filter = tiled_filter(&target, &[2, 2], [2, 1, 1, 1], &fq);
        let bias = Tensor::from_i32("bias", &[1], &[0], QuantizationInfo::default())
            .unwrap()
            .into_ptr();
        let out = Tensor::new("out", DType::U8, &[1, 3, 2, 1], q).into_ptr();
        let op = Conv2DOp::new(input, filter, bias, out.clone(), [1, 1], [1, 1], ActivationFunction::None)
            .with_target(target);
        assert_eq!(op.kernel(), ConvKernel::Standard);
        op.execute().unwrap();
        assert_eq!(out.to_vec::<u8>().unwrap(), [3, 7, 11, 15, 19, 23]);
    }

    #[test]
    fn test_filter_bounds_use_target_tiling() {
        let target = TargetConfig::for_arch(TargetArch::Aarch64);
        let q = QuantizationInfo::new(1.0, 0);
        let input = Tensor::new("input", DType::U8, &[20, 4, 4, 1], q.clone()).into_ptr();
        let filter = Tensor::new("filter", DType::U8, &target.tiled_filter_extents(20, 3, 3, 32), q.clone()).into_ptr();
        let bias = Tensor::new("bias", DType::I32, &[32], QuantizationInfo::default()).into_ptr();
        let out = Tensor::new("out", DType::U8, &[32, 2, 2, 1], q).into_ptr();
        let op = Conv2DOp::new(input, filter, bias, out, [1, 1], [1, 1], ActivationFunction::None)
            .with_target(target);
        assert_eq!(op.kernel(), ConvKernel::LargeReduction);

        let region = [
            Interval::new(16, 31),
            Interval::new(0, 1),
            Interval::new(1, 1),
            Interval::new(0, 0),
        ];
        let input_region = op.map_bounds(0, 0).unwrap().evaluate(&region).unwrap();
        // 20 channels rounded up to the 16-wide unroll.
        assert_eq!(input_region[0], Interval::new(0, 31));
        assert_eq!(input_region[1], Interval::new(0, 3));
        assert_eq!(input_region[2], Interval::new(1, 3));

        let filter_region = op.map_bounds(1, 0).unwrap().evaluate(&region).unwrap();
        assert_eq!(filter_region[0], Interval::new(0, 3));
        assert_eq!(filter_region[1], Interval::new(0, 15));
        assert_eq!(filter_region[2], Interval::new(0, 7));
        assert_eq!(filter_region[3], Interval::new(1, 1));
        assert_eq!(filter_region[4], Interval::new(0, 2));

        assert!(matches!(op.map_bounds(3, 0), Err(OpError::Config(_))));
    }

    #[test]
    fn test_rejects_untiled_filter() {
        let q = QuantizationInfo::new(1.0, 0);
        let input = Tensor::new("input", DType::U8, &[4, 1, 1, 1], q.clone()).into_ptr();
        let filter = Tensor::new("filter", DType::U8, &[4, 1, 1, 1], q.clone()).into_ptr();
        let bias = Tensor::new("bias", DType::I32, &[1], QuantizationInfo::default()).into_ptr();
        let out = Tensor::new("out", DType::U8, &[1, 1, 1, 1], q).into_ptr();
        let op = Conv2DOp::new(input, filter, bias, out, [1, 1], [1, 1], ActivationFunction::None);
        assert!(matches!(op.execute(), Err(OpError::Config(_))));
    }
}
