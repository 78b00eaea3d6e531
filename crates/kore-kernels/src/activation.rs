//! Nonlinear `u8` kernels.
//!
//! These reconstruct the real-valued input multiplier from its 16-bit
//! fixed-point form and evaluate the nonlinearity in `f64`, then round to
//! the output quantization. Input multipliers are prescaled by `2^-6`
//! (`left_shift` 6), so the kernels multiply by 64 to undo it.

use kore_core::{Buffer, BufferMut, Interval};

use crate::elementwise::expect_elementwise;
use crate::error::{expect_covers, expect_rank, KernelError, KernelResult, BAD_PARAM};
use crate::fixed_point::real_multiplier;

const INPUT_LEFT_SHIFT: i32 = 6;

/// Input rescaling for logistic and tanh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnaryParams {
    pub input_zero: i32,
    /// 16-bit multiplier of `log2` units per input step, signed.
    pub multiplier: i32,
    pub shift: i32,
}

impl UnaryParams {
    fn exponent_per_step(&self) -> f64 {
        real_multiplier(self.multiplier, self.shift, 16) * (1 << INPUT_LEFT_SHIFT) as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftmaxParams {
    /// 16-bit multiplier of `log2` units per input step.
    pub input_multiplier: i32,
    pub input_shift: i32,
    pub output_zero: i32,
    /// 32-bit multiplier encoding the output scale.
    pub output_multiplier: i32,
    pub output_shift: i32,
}

fn to_u8(x: f64) -> u8 {
    x.round().clamp(0.0, 255.0) as u8
}

/// `1 / (1 + 2^((x - zero) * m))` with output scale 1/256, zero 0.
///
/// A negative multiplier gives the usual increasing logistic curve.
pub fn logistic_u8(input: &Buffer<u8>, params: &UnaryParams, output: &mut BufferMut<u8>) -> KernelResult {
    let shape = output.shape().clone();
    expect_elementwise("logistic_u8", "input", input.shape(), &shape)?;
    let m = params.exponent_per_step();
    output.fill_with(|c| {
        let e = ((input.get(c) as i32 - params.input_zero) as f64 * m).exp2();
        to_u8(256.0 / (1.0 + e))
    });
    Ok(())
}

/// `tanh` with the input prescaled so `2^((x - zero) * m) = e^(2x)`; output
/// scale 1/128, zero 128.
pub fn tanh_u8(input: &Buffer<u8>, params: &UnaryParams, output: &mut BufferMut<u8>) -> KernelResult {
    let shape = output.shape().clone();
    expect_elementwise("tanh_u8", "input", input.shape(), &shape)?;
    let m = params.exponent_per_step();
    output.fill_with(|c| {
        let e = ((input.get(c) as i32 - params.input_zero) as f64 * m).exp2();
        let t = if e.is_infinite() { 1.0 } else { (e - 1.0) / (e + 1.0) };
        to_u8(128.0 + 128.0 * t)
    });
    Ok(())
}

/// Softmax along dimension 0 of `[C, B]` buffers.
pub fn softmax_u8(input: &Buffer<u8>, params: &SoftmaxParams, output: &mut BufferMut<u8>) -> KernelResult {
    const NAME: &str = "softmax_u8";
    expect_rank(NAME, "input", input.rank(), 2)?;
    expect_rank(NAME, "output", output.rank(), 2)?;
    let out_scale = real_multiplier(params.output_multiplier, params.output_shift, 32);
    if out_scale <= 0.0 {
        return Err(KernelError::new(NAME, BAD_PARAM, "output scale must be positive"));
    }
    if output.shape().numel() == 0 {
        return Ok(());
    }
    let channels = input.dim(0).interval();
    expect_covers(NAME, "input channels", channels, output.dim(0).interval())?;
    expect_covers(NAME, "input batch", input.dim(1).interval(), output.dim(1).interval())?;

    let m = real_multiplier(params.input_multiplier, params.input_shift, 16) * (1 << INPUT_LEFT_SHIFT) as f64;
    let batches = output.dim(1).interval();
    for b in batches.min..=batches.max {
        let row: Vec<i32> = (channels.min..=channels.max)
            .map(|c| input.get(&[c, b]) as i32)
            .collect();
        let max = row.iter().copied().max().unwrap_or(0);
        let total: f64 = row.iter().map(|&x| ((x - max) as f64 * m).exp2()).sum();
        let out_c = output.dim(0).interval();
        for c in out_c.min..=out_c.max {
            let x = row[(c - channels.min) as usize];
            let p = ((x - max) as f64 * m).exp2() / total;
            output.set(&[c, b], to_u8(params.output_zero as f64 + p / out_scale));
        }
    }
    Ok(())
}

/// `v / |v|` along dimension 0 of `[C, B]` buffers, output scale 1/128,
/// zero 128. A zero vector maps to 128.
pub fn l2_normalization_u8(input: &Buffer<u8>, input_zero: i32, output: &mut BufferMut<u8>) -> KernelResult {
    const NAME: &str = "l2_normalization_u8";
    expect_rank(NAME, "input", input.rank(), 2)?;
    expect_rank(NAME, "output", output.rank(), 2)?;
    if output.shape().numel() == 0 {
        return Ok(());
    }
    let channels: Interval = input.dim(0).interval();
    expect_covers(NAME, "input channels", channels, output.dim(0).interval())?;
    expect_covers(NAME, "input batch", input.dim(1).interval(), output.dim(1).interval())?;

    let batches = output.dim(1).interval();
    let out_c = output.dim(0).interval();
    for b in batches.min..=batches.max {
        let norm: f64 = (channels.min..=channels.max)
            .map(|c| {
                let v = (input.get(&[c, b]) as i32 - input_zero) as f64;
                v * v
            })
            .sum::<f64>()
            .sqrt();
        for c in out_c.min..=out_c.max {
            let v = (input.get(&[c, b]) as i32 - input_zero) as f64;
            let n = if norm > 0.0 { v / norm } else { 0.0 };
            output.set(&[c, b], to_u8(128.0 + 128.0 * n));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kore_core::{Layout, Shape};

    fn layout(extents: &[i32]) -> Layout {
        Layout::new(Shape::contiguous(extents), 1, 0)
    }

    #[test]
    fn test_logistic_midpoint_and_tails() {
        let input = [128u8, 255, 0];
        let input = Buffer::new(&input, layout(&[3])).unwrap();
        let mut out = [0u8; 3];
        let mut o = BufferMut::new(&mut out, layout(&[3])).unwrap();
        // m = -0.5 log2 units per step: -(2^14 / 2^15)
        let params = UnaryParams {
            input_zero: 128,
            multiplier: -(1 << 14),
            shift: 6,
        };
        logistic_u8(&input, &params, &mut o).unwrap();
        assert_eq!(out[0], 128);
        assert_eq!(out[1], 255);
        assert_eq!(out[2], 0);
    }

    #[test]
    fn test_tanh_symmetric() {
        let input = [128u8, 129, 127];
        let input = Buffer::new(&input, layout(&[3])).unwrap();
        let mut out = [0u8; 3];
        let mut o = BufferMut::new(&mut out, layout(&[3])).unwrap();
        let params = UnaryParams {
            input_zero: 128,
            multiplier: 1 << 14,
            shift: 6,
        };
        tanh_u8(&input, &params, &mut o).unwrap();
        assert_eq!(out[0], 128);
        assert_eq!(out[1] as i32 - 128, 128 - out[2] as i32);
        assert!(out[1] > 128);
    }

    #[test]
    fn test_softmax_uniform_row() {
        let input = [7u8; 4];
        let input = Buffer::new(&input, layout(&[4, 1])).unwrap();
        let mut out = [0u8; 4];
        let mut o = BufferMut::new(&mut out, layout(&[4, 1])).unwrap();
        // Output scale 1/256: 2^30 / 2^31 / 2^7.
        let params = SoftmaxParams {
            input_multiplier: 1 << 14,
            input_shift: 6,
            output_zero: 0,
            output_multiplier: 1 << 30,
            output_shift: 7,
        };
        softmax_u8(&input, &params, &mut o).unwrap();
        assert_eq!(out, [64; 4]);
    }

    #[test]
    fn test_softmax_one_hot() {
        let input = [0u8, 255];
        let input = Buffer::new(&input, layout(&[2, 1])).unwrap();
        let mut out = [0u8; 2];
        let mut o = BufferMut::new(&mut out, layout(&[2, 1])).unwrap();
        let params = SoftmaxParams {
            input_multiplier: 1 << 14,
            input_shift: 6,
            output_zero: 0,
            output_multiplier: 1 << 30,
            output_shift: 7,
        };
        softmax_u8(&input, &params, &mut o).unwrap();
        assert_eq!(out, [0, 255]);
    }

    #[test]
    fn test_l2_unit_vector() {
        // (3, 4) / 5 -> (0.6, 0.8)
        let input = [131u8, 132, 128, 128];
        let input = Buffer::new(&input, layout(&[2, 2])).unwrap();
        let mut out = [0u8; 4];
        let mut o = BufferMut::new(&mut out, layout(&[2, 2])).unwrap();
        l2_normalization_u8(&input, 128, &mut o).unwrap();
        assert_eq!(out, [205, 230, 128, 128]);
    }
}
