//! Depthwise 2-D convolution.
//!
//! Tensors: input `[C, X, Y, B]`, filter `[C * dm, W, H]` or
//! `[C * dm, W, H, 1]`, bias `[C * dm]` (`i32`), output
//! `[C * dm, X', Y', B]`.

use kore_core::{floor_div, BufferMut, DType, Interval, TensorPtr};
use kore_kernels::{DepthwiseParams, TargetConfig};

use crate::bounds::BoundsMap;
use crate::dispatch::DepthwiseKernel;
use crate::error::{OpError, Result};
use crate::ops::{expect_dtype, no_bounds, InputView};
use crate::quantize::{get_output_range, get_quantized_multiply_params, ActivationFunction};
use crate::visitor::OpVisitor;

#[derive(Debug, Clone)]
pub struct DepthwiseConv2DOp {
    inputs: [TensorPtr; 3],
    output: TensorPtr,
    depth_multiplier: i32,
    stride: [i32; 2],
    dilation: [i32; 2],
    activation: ActivationFunction,
    target: TargetConfig,
}

impl DepthwiseConv2DOp {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input: TensorPtr,
        filter: TensorPtr,
        bias: TensorPtr,
        output: TensorPtr,
        depth_multiplier: i32,
        stride: [i32; 2],
        dilation: [i32; 2],
        activation: ActivationFunction,
    ) -> Self {
        Self {
            inputs: [input, filter, bias],
            output,
            depth_multiplier,
            stride,
            dilation,
            activation,
            target: *TargetConfig::host(),
        }
    }

    pub fn with_target(mut self, target: TargetConfig) -> Self {
        self.target = target;
        self
    }

    pub fn name(&self) -> &'static str {
        "DepthwiseConv2D"
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

    pub fn depth_multiplier(&self) -> i32 {
        self.depth_multiplier
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

    /// Kernel variant for the output's current channel extent.
    pub fn kernel(&self) -> DepthwiseKernel {
        DepthwiseKernel::select(self.depth_multiplier, self.output.extent(0))
    }

    fn check_filter(&self) -> Result<()> {
        let filter = self.filter();
        match filter.rank() {
            3 => Ok(()),
            4 if filter.extent(3) == 1 => Ok(()),
            _ => Err(OpError::config(format!(
                "depthwise filter must be [C, W, H] or [C, W, H, 1], got {}",
                filter.shape()
            ))),
        }
    }

    /// Output channel `k` reads filter channel `k` and input channel
    /// `k / dm`, so both must exist for every output channel. Sub-region
    /// runs see cropped tensors, hence coverage rather than equal extents.
    fn check_channels(&self) -> Result<()> {
        let out = self.output.bounds(0);
        if out.is_empty() {
            return Ok(());
        }
        let dm = self.depth_multiplier;
        let filter = self.filter().bounds(0);
        let input = self.input().bounds(0);
        let from_input = Interval::new(input.min * dm, input.max * dm + dm - 1);
        if !filter.contains(&out) || !from_input.contains(&out) {
            return Err(OpError::config(format!(
                "output channels {out} need filter channels {out} and input channels {} with depth multiplier {dm}, \
                 got filter {filter} and input {input}",
                Interval::new(floor_div(out.min, dm), floor_div(out.max, dm)),
            )));
        }
        Ok(())
    }

    pub fn map_bounds(&self, input: usize, output: usize) -> Result<BoundsMap> {
        if output != 0 {
            return Err(no_bounds(input, output));
        }
        if self.depth_multiplier < 1 {
            return Err(OpError::config(format!(
                "depth multiplier {} must be positive",
                self.depth_multiplier
            )));
        }
        self.check_filter()?;
        self.check_channels()?;
        let filter = self.filter();
        match input {
            0 => {
                let fw = filter.extent(1);
                let fh = filter.extent(2);
                let map = BoundsMap::new(4, 4)
                    .upsample(0, 0, self.depth_multiplier)
                    .downsample(1, 1, self.stride[0], Interval::new(0, self.dilation[0] * (fw - 1)))
                    .downsample(2, 2, self.stride[1], Interval::new(0, self.dilation[1] * (fh - 1)))
                    .elementwise(3, 3);
                if self.depth_multiplier == 1 {
                    Ok(map.align(0, self.target.depthwise_alignment()))
                } else {
                    Ok(map)
                }
            }
            1 => {
                let mut map = BoundsMap::new(filter.rank(), 4)
                    .elementwise(0, 0)
                    .constant(1, filter.bounds(1))
                    .constant(2, filter.bounds(2));
                if filter.rank() == 4 {
                    map = map.constant(3, filter.bounds(3));
                }
                Ok(map)
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
        if self.depth_multiplier < 1 {
            return Err(OpError::config(format!(
                "depth multiplier {} must be positive",
                self.depth_multiplier
            )));
        }
        self.check_filter()?;
        self.check_channels()?;

        let params = get_quantized_multiply_params(
            input.quantization(),
            filter.quantization(),
            self.output.quantization(),
        )?;
        let range = get_output_range(self.activation, self.output.quantization())?;

        let mut filter_layout = filter.layout().clone();
        if filter_layout.rank() == 4 {
            let at = filter_layout.dim(3).min;
            filter_layout.slice(3, at);
        }

        let kernel = self.kernel();
        tracing::debug!(kernel = kernel.name(), depth_multiplier = self.depth_multiplier, "depthwise_conv2d");

        let dw = DepthwiseParams {
            depth_multiplier: self.depth_multiplier,
            input_zero: params.a_zero,
            filter_zero: params.b_zero,
            stride: self.stride,
            dilation: self.dilation,
            output: params.output_stage(range),
        };
        let in_view = InputView::new(input, &self.output);
        let filter_view = InputView::new(filter, &self.output);
        let bias_view = InputView::new(bias, &self.output);
        let in_buf = in_view.buffer::<u8>(input.layout())?;
        let filter_buf = filter_view.buffer::<u8>(&filter_layout)?;
        let bias_buf = bias_view.buffer::<i32>(bias.layout())?;
        let mut out_bytes = self.output.storage().write();
        let mut out = BufferMut::<u8>::new(&mut out_bytes, self.output.layout().clone())?;
        kernel.run(&in_buf, &filter_buf, &bias_buf, &dw, &mut out)?;
        Ok(())
    }

    pub fn accept(&self, visitor: &mut dyn OpVisitor) {
        visitor.visit_depthwise_conv2d(self);
    }
}
