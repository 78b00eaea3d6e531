//! Average and max pooling over `[C, X, Y, B]` buffers.
//!
//! Output `(c, x, y, b)` pools input `(c, x * stride_x + fx, y * stride_y +
//! fy, b)` for the filter taps that land inside the input buffer; taps
//! outside are skipped, so "same" padding is expressed by translating the
//! input.

use kore_core::{Buffer, BufferMut};

use crate::error::{expect_covers, expect_rank, KernelError, KernelResult, BAD_PARAM};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolParams {
    pub stride: [i32; 2],
    pub filter: [i32; 2],
    pub min: u8,
    pub max: u8,
}

fn check(name: &'static str, input: &Buffer<u8>, params: &PoolParams, output: &BufferMut<u8>) -> KernelResult {
    expect_rank(name, "input", input.rank(), 4)?;
    expect_rank(name, "output", output.rank(), 4)?;
    if params.stride.iter().chain(params.filter.iter()).any(|&s| s < 1) {
        return Err(KernelError::new(
            name,
            BAD_PARAM,
            format!("stride {:?} and filter {:?} must be positive", params.stride, params.filter),
        ));
    }
    if output.shape().numel() == 0 {
        return Ok(());
    }
    expect_covers(name, "input channels", input.dim(0).interval(), output.dim(0).interval())?;
    expect_covers(name, "input batch", input.dim(3).interval(), output.dim(3).interval())
}

fn pool(
    input: &Buffer<u8>,
    params: &PoolParams,
    output: &mut BufferMut<u8>,
    reduce: impl Fn(&mut dyn Iterator<Item = u8>) -> Option<u8>,
) {
    output.fill_with(|o| {
        let mut taps = (0..params.filter[1]).flat_map(|fy| {
            (0..params.filter[0]).filter_map(move |fx| {
                let at = [
                    o[0],
                    o[1] * params.stride[0] + fx,
                    o[2] * params.stride[1] + fy,
                    o[3],
                ];
                input.contains(&at).then(|| input.get(&at))
            })
        });
        let v = reduce(&mut taps).unwrap_or(params.min);
        v.clamp(params.min, params.max)
    });
}

/// Rounded mean of the in-bounds taps.
pub fn average_pool_u8(input: &Buffer<u8>, params: &PoolParams, output: &mut BufferMut<u8>) -> KernelResult {
    check("average_pool_u8", input, params, output)?;
    pool(input, params, output, |taps| {
        let (sum, count) = taps.fold((0u32, 0u32), |(s, n), v| (s + v as u32, n + 1));
        (count > 0).then(|| ((sum + count / 2) / count) as u8)
    });
    Ok(())
}

pub fn max_pool_u8(input: &Buffer<u8>, params: &PoolParams, output: &mut BufferMut<u8>) -> KernelResult {
    check("max_pool_u8", input, params, output)?;
    pool(input, params, output, |taps| taps.max());
    Ok(())
}
