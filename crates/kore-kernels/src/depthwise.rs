//! Depthwise convolution.
//!
//! Buffers use absolute coordinates: input `[C, X, Y, B]`, filter
//! `[C * depth_multiplier, W, H]`, bias `[C * depth_multiplier]`, output
//! `[C * depth_multiplier, X', Y', B]`. Output channel `k` reads input
//! channel `k / depth_multiplier`.
//!
//! Three variants exist: one for outputs narrower than the depth multiplier
//! (every output channel of the region reads the same input channel), one
//! for a depth multiplier of 1, and the general case.

use kore_core::{floor_div, Buffer, BufferMut, Interval};

use crate::conv::{expect_positive, window};
use crate::error::{expect_covers, expect_rank, KernelError, KernelResult, BAD_PARAM};
use crate::fixed_point::OutputStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthwiseParams {
    pub depth_multiplier: i32,
    pub input_zero: i32,
    pub filter_zero: i32,
    pub stride: [i32; 2],
    pub dilation: [i32; 2],
    pub output: OutputStage,
}

/// Variant for `depth_multiplier >= output channels`.
pub fn depthwise_conv_broadcast_u8(
    input: &Buffer<u8>,
    filter: &Buffer<u8>,
    bias: &Buffer<i32>,
    params: &DepthwiseParams,
    output: &mut BufferMut<u8>,
) -> KernelResult {
    const NAME: &str = "depthwise_conv_broadcast_u8";
    if params.depth_multiplier < output.dim(0).extent {
        return Err(KernelError::new(
            NAME,
            BAD_PARAM,
            format!(
                "depth multiplier {} is narrower than {} output channels",
                params.depth_multiplier,
                output.dim(0).extent
            ),
        ));
    }
    depthwise_impl(NAME, input, filter, bias, params, output)
}

/// Variant for `depth_multiplier == 1`.
pub fn depthwise_conv_dm1_u8(
    input: &Buffer<u8>,
    filter: &Buffer<u8>,
    bias: &Buffer<i32>,
    params: &DepthwiseParams,
    output: &mut BufferMut<u8>,
) -> KernelResult {
    const NAME: &str = "depthwise_conv_dm1_u8";
    if params.depth_multiplier != 1 {
        return Err(KernelError::new(
            NAME,
            BAD_PARAM,
            format!("depth multiplier {} is not 1", params.depth_multiplier),
        ));
    }
    depthwise_impl(NAME, input, filter, bias, params, output)
}

pub fn depthwise_conv_u8(
    input: &Buffer<u8>,
    filter: &Buffer<u8>,
    bias: &Buffer<i32>,
    params: &DepthwiseParams,
    output: &mut BufferMut<u8>,
) -> KernelResult {
    depthwise_impl("depthwise_conv_u8", input, filter, bias, params, output)
}

fn depthwise_impl(
    name: &'static str,
    input: &Buffer<u8>,
    filter: &Buffer<u8>,
    bias: &Buffer<i32>,
    p: &DepthwiseParams,
    output: &mut BufferMut<u8>,
) -> KernelResult {
    expect_rank(name, "input", input.rank(), 4)?;
    expect_rank(name, "filter", filter.rank(), 3)?;
    expect_rank(name, "bias", bias.rank(), 1)?;
    expect_rank(name, "output", output.rank(), 4)?;
    expect_positive(name, p.stride, p.dilation)?;
    if p.depth_multiplier < 1 {
        return Err(KernelError::new(name, BAD_PARAM, "depth multiplier must be positive"));
    }

    let dm = p.depth_multiplier;
    let fw = *filter.dim(1);
    let fh = *filter.dim(2);
    let out = output.shape().clone();
    if out.numel() == 0 {
        return Ok(());
    }
    let out_c = out.dim(0).interval();

    expect_covers(
        name,
        "input channels",
        input.dim(0).interval(),
        Interval::new(floor_div(out_c.min, dm), floor_div(out_c.max, dm)),
    )?;
    expect_covers(
        name,
        "input x",
        input.dim(1).interval(),
        window(out.dim(1).interval(), p.stride[0], p.dilation[0], fw.extent),
    )?;
    expect_covers(
        name,
        "input y",
        input.dim(2).interval(),
        window(out.dim(2).interval(), p.stride[1], p.dilation[1], fh.extent),
    )?;
    expect_covers(name, "input batch", input.dim(3).interval(), out.dim(3).interval())?;
    expect_covers(name, "filter channels", filter.dim(0).interval(), out_c)?;
    expect_covers(name, "bias", bias.dim(0).interval(), out_c)?;

    output.fill_with(|o| {
        let k = o[0];
        let c = if dm == 1 { k } else { floor_div(k, dm) };
        let mut acc = bias.get(&[k]);
        for fy in 0..fh.extent {
            let y = o[2] * p.stride[1] + fy * p.dilation[1];
            for fx in 0..fw.extent {
                let x = o[1] * p.stride[0] + fx * p.dilation[0];
                let a = input.get(&[c, x, y, o[3]]) as i32 - p.input_zero;
                let f = filter.get(&[k, fw.min + fx, fh.min + fy]) as i32 - p.filter_zero;
                acc += a * f;
            }
        }
        p.output.apply(acc)
    });
    Ok(())
}
