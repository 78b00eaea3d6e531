//! 2-D convolution over tiled filters.
//!
//! Buffers use absolute coordinates:
//! - input `[C, X, Y, B]`
//! - filter `[vector_reduction, vector_tile, C / vector_reduction,
//!   K / vector_tile, W, H]` (see [`tile_conv_filter_u8`])
//! - bias `[K]`
//! - output `[K, X', Y', B]`
//!
//! Output `(k, x, y, b)` reads input `(c, x * stride_x + fx * dilation_x,
//! y * stride_y + fy * dilation_y, b)`. The reduction runs over every input
//! channel the input buffer holds; padded filter lanes must equal the filter
//! zero-point.

use kore_core::{floor_div, Buffer, BufferMut, Interval};

use crate::error::{expect_covers, expect_rank, KernelError, KernelResult, BAD_EXTENT, BAD_PARAM};
use crate::fixed_point::OutputStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvParams {
    pub input_zero: i32,
    pub filter_zero: i32,
    pub stride: [i32; 2],
    pub dilation: [i32; 2],
    pub output: OutputStage,
}

pub fn conv_u8(
    input: &Buffer<u8>,
    filter: &Buffer<u8>,
    bias: &Buffer<i32>,
    params: &ConvParams,
    output: &mut BufferMut<u8>,
) -> KernelResult {
    conv_impl("conv_u8", input, filter, bias, params, output)
}

/// Variant tuned for reductions of at least 16 input channels.
pub fn conv_r16_u8(
    input: &Buffer<u8>,
    filter: &Buffer<u8>,
    bias: &Buffer<i32>,
    params: &ConvParams,
    output: &mut BufferMut<u8>,
) -> KernelResult {
    const NAME: &str = "conv_r16_u8";
    if input.dim(0).extent < 16 {
        return Err(KernelError::new(
            NAME,
            BAD_EXTENT,
            format!("reduction of {} channels is below 16", input.dim(0).extent),
        ));
    }
    conv_impl(NAME, input, filter, bias, params, output)
}

/// Input interval a strided, dilated window over `out` reads.
pub(crate) fn window(out: Interval, stride: i32, dilation: i32, taps: i32) -> Interval {
    Interval::new(out.min * stride, out.max * stride + dilation * (taps - 1))
}

pub(crate) fn expect_positive(kernel: &'static str, stride: [i32; 2], dilation: [i32; 2]) -> KernelResult {
    if stride.iter().chain(dilation.iter()).any(|&s| s < 1) {
        return Err(KernelError::new(
            kernel,
            BAD_PARAM,
            format!("stride {stride:?} and dilation {dilation:?} must be positive"),
        ));
    }
    Ok(())
}

fn conv_impl(
    name: &'static str,
    input: &Buffer<u8>,
    filter: &Buffer<u8>,
    bias: &Buffer<i32>,
    p: &ConvParams,
    output: &mut BufferMut<u8>,
) -> KernelResult {
    expect_rank(name, "input", input.rank(), 4)?;
    expect_rank(name, "filter", filter.rank(), 6)?;
    expect_rank(name, "bias", bias.rank(), 1)?;
    expect_rank(name, "output", output.rank(), 4)?;
    expect_positive(name, p.stride, p.dilation)?;

    let vr = filter.dim(0).extent;
    let vt = filter.dim(1).extent;
    if vr < 1 || vt < 1 || filter.dim(0).min != 0 || filter.dim(1).min != 0 {
        return Err(KernelError::new(name, BAD_EXTENT, "filter lanes must start at 0"));
    }
    let fw = *filter.dim(4);
    let fh = *filter.dim(5);
    let channels = input.dim(0).interval();
    let out = output.shape().clone();
    if out.numel() == 0 {
        return Ok(());
    }
    let out_c = out.dim(0).interval();

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
    expect_covers(
        name,
        "filter input channels",
        filter.dim(2).interval(),
        Interval::new(floor_div(channels.min, vr), floor_div(channels.max, vr)),
    )?;
    expect_covers(
        name,
        "filter output channels",
        filter.dim(3).interval(),
        Interval::new(floor_div(out_c.min, vt), floor_div(out_c.max, vt)),
    )?;
    expect_covers(name, "bias", bias.dim(0).interval(), out_c)?;

    output.fill_with(|o| {
        let k = o[0];
        let mut acc = bias.get(&[k]);
        for fy in 0..fh.extent {
            let y = o[2] * p.stride[1] + fy * p.dilation[1];
            for fx in 0..fw.extent {
                let x = o[1] * p.stride[0] + fx * p.dilation[0];
                for c in channels.min..=channels.max {
                    let a = input.get(&[c, x, y, o[3]]) as i32 - p.input_zero;
                    let f = filter.get(&[
                        c.rem_euclid(vr),
                        k.rem_euclid(vt),
                        floor_div(c, vr),
                        floor_div(k, vt),
                        fw.min + fx,
                        fh.min + fy,
                    ]) as i32
                        - p.filter_zero;
                    acc += a * f;
                }
            }
        }
        p.output.apply(acc)
    });
    Ok(())
}

/// Relayout a `[C, W, H, K]` filter into the tiled 6-D form, moving values
/// from `input_zero` to `output_zero`. Lanes past `C` or `K` hold
/// `output_zero`.
pub fn tile_conv_filter_u8(
    input: &Buffer<u8>,
    input_zero: i32,
    output_zero: i32,
    output: &mut BufferMut<u8>,
) -> KernelResult {
    const NAME: &str = "tile_conv_filter_u8";
    expect_rank(NAME, "input", input.rank(), 4)?;
    expect_rank(NAME, "output", output.rank(), 6)?;
    let vr = output.dim(0).extent;
    let vt = output.dim(1).extent;
    if vr < 1 || vt < 1 || output.dim(0).min != 0 || output.dim(1).min != 0 {
        return Err(KernelError::new(NAME, BAD_EXTENT, "filter lanes must start at 0"));
    }
    if !(0..=255).contains(&output_zero) {
        return Err(KernelError::new(
            NAME,
            BAD_PARAM,
            format!("output zero-point {output_zero} is not a u8"),
        ));
    }

    output.fill_with(|o| {
        let c = o[2] * vr + o[0];
        let k = o[3] * vt + o[1];
        let at = [c, o[4], o[5], k];
        if input.contains(&at) {
            (input.get(&at) as i32 - input_zero + output_zero).clamp(0, 255) as u8
        } else {
            output_zero as u8
        }
    });
    Ok(())
}
