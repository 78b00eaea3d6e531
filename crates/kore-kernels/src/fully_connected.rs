use kore_core::{Buffer, BufferMut};

use crate::error::{expect_covers, expect_rank, KernelResult};
use crate::fixed_point::OutputStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullyConnectedParams {
    pub input_zero: i32,
    pub filter_zero: i32,
    pub output: OutputStage,
}

/// `output[k, b] = bias[k] + Σ_c input[c, b] * filter[c, k]`, requantized.
///
/// Input `[C, B]`, filter `[C, K]`, bias `[K]`, output `[K, B]`. The
/// reduction runs over the input's channel range.
pub fn fully_connected_u8(
    input: &Buffer<u8>,
    filter: &Buffer<u8>,
    bias: &Buffer<i32>,
    params: &FullyConnectedParams,
    output: &mut BufferMut<u8>,
) -> KernelResult {
    const NAME: &str = "fully_connected_u8";
    expect_rank(NAME, "input", input.rank(), 2)?;
    expect_rank(NAME, "filter", filter.rank(), 2)?;
    expect_rank(NAME, "bias", bias.rank(), 1)?;
    expect_rank(NAME, "output", output.rank(), 2)?;

    let channels = input.dim(0).interval();
    let out = output.shape().clone();
    if out.numel() == 0 {
        return Ok(());
    }
    expect_covers(NAME, "filter channels", filter.dim(0).interval(), channels)?;
    expect_covers(NAME, "filter outputs", filter.dim(1).interval(), out.dim(0).interval())?;
    expect_covers(NAME, "bias", bias.dim(0).interval(), out.dim(0).interval())?;
    expect_covers(NAME, "input batch", input.dim(1).interval(), out.dim(1).interval())?;

    output.fill_with(|o| {
        let (k, b) = (o[0], o[1]);
        let mut acc = bias.get(&[k]);
        for c in channels.min..=channels.max {
            let a = input.get(&[c, b]) as i32 - params.input_zero;
            let f = filter.get(&[c, k]) as i32 - params.filter_zero;
            acc += a * f;
        }
        params.output.apply(acc)
    });
    Ok(())
}
