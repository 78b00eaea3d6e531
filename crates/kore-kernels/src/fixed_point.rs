//! Integer fixed-point arithmetic shared by every quantized kernel.
//!
//! A real multiplier `m` is represented as `multiplier * 2^-31 * 2^-shift`
//! with `multiplier` in `[2^30, 2^31)` (or 0) and `shift` a right shift.

/// `round(a * b / 2^31)`, saturating the single overflow case
/// (`i32::MIN * i32::MIN`).
pub fn rounding_doubling_high_mul(a: i32, b: i32) -> i32 {
    let ab = a as i64 * b as i64;
    let result = (ab + (1i64 << 30)) >> 31;
    result.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Divide by `2^shift`, rounding half up. Non-positive shifts are no-ops.
pub fn rounding_shift_right(x: i32, shift: i32) -> i32 {
    if shift <= 0 {
        return x;
    }
    let shift = shift.min(62) as u32;
    ((x as i64 + (1i64 << (shift - 1))) >> shift) as i32
}

/// Apply a quantized multiplier and right shift to `x`.
pub fn multiply_quantized(x: i32, multiplier: i32, shift: i32) -> i32 {
    rounding_shift_right(rounding_doubling_high_mul(x, multiplier), shift)
}

/// Final requantization of an `i32` accumulator into a clamped `u8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputStage {
    pub zero: i32,
    pub multiplier: i32,
    /// Right shift, `>= 0`.
    pub shift: i32,
    pub min: u8,
    pub max: u8,
}

impl OutputStage {
    pub fn apply(&self, acc: i32) -> u8 {
        let v = self.zero as i64 + multiply_quantized(acc, self.multiplier, self.shift) as i64;
        v.clamp(self.min as i64, self.max as i64) as u8
    }
}

/// Real value of a `bits`-wide quantized multiplier with a right shift.
pub(crate) fn real_multiplier(multiplier: i32, shift: i32, bits: u32) -> f64 {
    multiplier as f64 / (1u64 << (bits - 1)) as f64 / 2f64.powi(shift)
}
