//! Elementwise `u8` kernels: add, multiply, copy-with-padding and fill.

use kore_core::{Buffer, BufferMut, Shape};

use crate::error::{expect_covers, expect_rank, KernelResult};
use crate::fixed_point::{multiply_quantized, OutputStage};

/// One operand of [`add_u8_u8`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddInput {
    pub zero: i32,
    /// Signed; a negative multiplier subtracts the operand.
    pub multiplier: i32,
    pub shift: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddParams {
    /// Headroom applied to both operands before rescaling.
    pub left_shift: i32,
    pub inputs: [AddInput; 2],
    pub output: OutputStage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MulParams {
    pub input_zeros: [i32; 2],
    pub output: OutputStage,
}

/// Every input dimension must cover the matching output dimension.
pub(crate) fn expect_elementwise(kernel: &'static str, what: &str, input: &Shape, output: &Shape) -> KernelResult {
    expect_rank(kernel, what, input.rank(), output.rank())?;
    for d in 0..output.rank() {
        expect_covers(
            kernel,
            &format!("{what} dim {d}"),
            input.dim(d).interval(),
            output.dim(d).interval(),
        )?;
    }
    Ok(())
}

/// `out = clamp(zero + rescale(rescale(a) + rescale(b)))`, each operand
/// rescaled after a common left shift.
pub fn add_u8_u8(a: &Buffer<u8>, b: &Buffer<u8>, params: &AddParams, output: &mut BufferMut<u8>) -> KernelResult {
    const NAME: &str = "add_u8_u8";
    let shape = output.shape().clone();
    expect_elementwise(NAME, "input 1", a.shape(), &shape)?;
    expect_elementwise(NAME, "input 2", b.shape(), &shape)?;

    let [p1, p2] = params.inputs;
    let scale = |x: u8, p: &AddInput| {
        let shifted = (x as i32 - p.zero) << params.left_shift;
        multiply_quantized(shifted, p.multiplier, p.shift)
    };
    output.fill_with(|c| {
        let sum = scale(a.get(c), &p1) + scale(b.get(c), &p2);
        params.output.apply(sum)
    });
    Ok(())
}

/// `out = clamp(zero + rescale((a - za) * (b - zb)))`.
pub fn mul_u8_u8_u8(a: &Buffer<u8>, b: &Buffer<u8>, params: &MulParams, output: &mut BufferMut<u8>) -> KernelResult {
    const NAME: &str = "mul_u8_u8_u8";
    let shape = output.shape().clone();
    expect_elementwise(NAME, "input 1", a.shape(), &shape)?;
    expect_elementwise(NAME, "input 2", b.shape(), &shape)?;

    let [za, zb] = params.input_zeros;
    output.fill_with(|c| {
        let product = (a.get(c) as i32 - za) * (b.get(c) as i32 - zb);
        params.output.apply(product)
    });
    Ok(())
}

/// Copy `input` into `output`; output coordinates the input does not cover
/// get `pad_value`.
pub fn copy_u8_u8(input: &Buffer<u8>, pad_value: u8, output: &mut BufferMut<u8>) -> KernelResult {
    expect_rank("copy_u8_u8", "input", input.rank(), output.rank())?;
    output.fill_with(|c| if input.contains(c) { input.get(c) } else { pad_value });
    Ok(())
}

pub fn fill_u8(value: u8, output: &mut BufferMut<u8>) -> KernelResult {
    output.fill_with(|_| value);
    Ok(())
}
