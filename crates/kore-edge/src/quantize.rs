//! Fixed-point parameters from floating-point quantization.
//!
//! A real multiplier `m` becomes an integer `multiplier` and a power-of-two
//! `shift` with `m ≈ multiplier * 2^(shift - (bits - 1))`.
//! Kernels apply it as `rounding_shift_right(rounding_doubling_high_mul(x,
//! multiplier), -shift)`.

use kore_core::{Interval, QuantizationInfo};
use kore_kernels::{AddInput, AddParams, MulParams, OutputStage};

use crate::error::{OpError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuantizedMulAndShift {
    pub multiplier: i32,
    pub shift: i32,
}

/// Fused activation of an operator's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ActivationFunction {
    #[default]
    None,
    Relu,
    ReluN1To1,
    Relu6,
    Tanh,
    SignBit,
}

/// Split `x` into a mantissa in `[0.5, 1)` and a power of two.
pub(crate) fn frexp(x: f64) -> (f64, i32) {
    if x == 0.0 || !x.is_finite() {
        return (x, 0);
    }
    let bits = x.to_bits();
    let exp = ((bits >> 52) & 0x7ff) as i32;
    if exp == 0 {
        // Subnormal: scale into the normal range first.
        let (m, e) = frexp(x * 2f64.powi(64));
        return (m, e - 64);
    }
    // Biased exponent 1022 puts the significand in [0.5, 1); the bias of
    // 1023 then leaves exp - 1022 as the power of two.
    let mantissa = f64::from_bits((bits & !(0x7ffu64 << 52)) | (1022u64 << 52));
    (mantissa, exp - 1022)
}

/// Quantize `m` to a `bits`-wide multiplier and a left shift.
///
/// Multipliers too small to represent become `(0, 0)`.
pub fn get_quantized_mul_and_shift(m: f64, bits: u32) -> Result<QuantizedMulAndShift> {
    if !m.is_finite() {
        return Err(OpError::Quantization(format!("multiplier {m} is not finite")));
    }
    if m == 0.0 {
        return Ok(QuantizedMulAndShift::default());
    }
    let one = 1i64 << (bits - 1);
    let (q, mut shift) = frexp(m);
    let mut q_fixed = (q * one as f64).round() as i64;
    if q_fixed.abs() == one {
        q_fixed /= 2;
        shift += 1;
    }
    if shift < -(bits as i32 - 1) {
        return Ok(QuantizedMulAndShift::default());
    }
    Ok(QuantizedMulAndShift {
        multiplier: q_fixed as i32,
        shift,
    })
}

/// As [`get_quantized_mul_and_shift`], for `0 <= m < 1`; the shift is never
/// positive.
pub fn get_quantized_mul_and_shift_smaller_than_one(m: f64, bits: u32) -> Result<QuantizedMulAndShift> {
    if !(0.0..1.0).contains(&m) {
        return Err(OpError::Quantization(format!("multiplier {m} is not in [0, 1)")));
    }
    let result = get_quantized_mul_and_shift(m, bits)?;
    if result.shift > 0 {
        return Err(OpError::Quantization(format!(
            "multiplier {m} rounds up to a positive shift"
        )));
    }
    Ok(result)
}

/// First scale and zero-point of a tensor's quantization.
pub fn scale_and_zero(q: &QuantizationInfo) -> Result<(f32, i32)> {
    match (q.first_scale(), q.first_zero()) {
        (Some(scale), Some(zero)) => Ok((scale, zero)),
        _ => Err(OpError::Quantization("tensor has no quantization parameters".into())),
    }
}

/// Zero-point of a `u8` tensor, checked to be representable.
pub fn u8_zero(q: &QuantizationInfo) -> Result<i32> {
    let (_, zero) = scale_and_zero(q)?;
    if !(0..=255).contains(&zero) {
        return Err(OpError::Quantization(format!("zero-point {zero} is not a u8")));
    }
    Ok(zero)
}

/// Quantized range the activation clamps to, within `[0, 255]`.
pub fn get_quantized_min_max(activation: ActivationFunction, zero: i32, scale: f64) -> Result<Interval> {
    let (min, max) = match activation {
        ActivationFunction::None => (0, 255),
        ActivationFunction::Relu => (zero, 255),
        ActivationFunction::Relu6 => (zero, zero + (6.0 / scale).round() as i32),
        ActivationFunction::ReluN1To1 => (
            zero + (-1.0 / scale).round() as i32,
            zero + (1.0 / scale).round() as i32,
        ),
        ActivationFunction::Tanh | ActivationFunction::SignBit => {
            return Err(OpError::config(format!(
                "unsupported fused activation {activation:?}"
            )))
        }
    };
    Ok(Interval::new(min.max(0), max.min(255)))
}

/// Output clamp range for `activation` under `quantization`.
pub fn get_output_range(activation: ActivationFunction, quantization: &QuantizationInfo) -> Result<Interval> {
    let zero = u8_zero(quantization)?;
    let (scale, _) = scale_and_zero(quantization)?;
    let range = get_quantized_min_max(activation, zero, scale as f64)?;
    if range.is_empty() {
        return Err(OpError::Quantization(format!(
            "activation {activation:?} leaves an empty output range {range}"
        )));
    }
    Ok(range)
}

/// Zero-points and output rescale shared by conv, depthwise conv and fully
/// connected. `c.shift` is a right shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplyParams {
    pub a_zero: i32,
    pub b_zero: i32,
    pub c_zero: i32,
    pub c: QuantizedMulAndShift,
}

impl MultiplyParams {
    pub fn output_stage(&self, range: Interval) -> OutputStage {
        output_stage(self.c_zero, self.c, range)
    }
}

pub(crate) fn output_stage(zero: i32, c: QuantizedMulAndShift, range: Interval) -> OutputStage {
    OutputStage {
        zero,
        multiplier: c.multiplier,
        shift: c.shift,
        min: range.min.clamp(0, 255) as u8,
        max: range.max.clamp(0, 255) as u8,
    }
}

pub fn get_quantized_multiply_params(
    a: &QuantizationInfo,
    b: &QuantizationInfo,
    c: &QuantizationInfo,
) -> Result<MultiplyParams> {
    let (a_scale, a_zero) = scale_and_zero(a)?;
    let (b_scale, b_zero) = scale_and_zero(b)?;
    let (c_scale, c_zero) = scale_and_zero(c)?;
    let ab_scale = (a_scale * b_scale) as f64;
    let mut mul = get_quantized_mul_and_shift_smaller_than_one(ab_scale / c_scale as f64, 32)?;
    mul.shift = -mul.shift;
    Ok(MultiplyParams {
        a_zero,
        b_zero,
        c_zero,
        c: mul,
    })
}

const ADD_LEFT_SHIFT: i32 = 20;

/// Parameters of `out = in1 + sign * in2`. `in2_sign` 0 rescales `in1`
/// alone.
pub fn get_add_params(
    in1: &QuantizationInfo,
    in2: &QuantizationInfo,
    in2_sign: i32,
    out: &QuantizationInfo,
    activation: ActivationFunction,
) -> Result<AddParams> {
    let (in1_scale, in1_zero) = scale_and_zero(in1)?;
    let (in2_scale, in2_zero) = scale_and_zero(in2)?;
    let (out_scale, out_zero) = scale_and_zero(out)?;

    let twice_max_input_scale = 2.0 * in1_scale.max(in2_scale) as f64;
    let real_in1 = in1_scale as f64 / twice_max_input_scale;
    let real_in2 = in2_scale as f64 / twice_max_input_scale;
    let real_out = twice_max_input_scale / ((1 << ADD_LEFT_SHIFT) as f64 * out_scale as f64);

    let m1 = get_quantized_mul_and_shift_smaller_than_one(real_in1, 32)?;
    let m2 = get_quantized_mul_and_shift_smaller_than_one(real_in2, 32)?;
    let mo = get_quantized_mul_and_shift_smaller_than_one(real_out, 32)?;
    let range = get_output_range(activation, out)?;

    Ok(AddParams {
        left_shift: ADD_LEFT_SHIFT,
        inputs: [
            AddInput {
                zero: in1_zero,
                multiplier: m1.multiplier,
                shift: -m1.shift,
            },
            AddInput {
                zero: in2_zero,
                multiplier: m2.multiplier * in2_sign,
                shift: -m2.shift,
            },
        ],
        output: output_stage(
            out_zero,
            QuantizedMulAndShift {
                multiplier: mo.multiplier,
                shift: -mo.shift,
            },
            range,
        ),
    })
}

pub fn get_mul_params(
    in1: &QuantizationInfo,
    in2: &QuantizationInfo,
    out: &QuantizationInfo,
    activation: ActivationFunction,
) -> Result<MulParams> {
    let (in1_scale, in1_zero) = scale_and_zero(in1)?;
    let (in2_scale, in2_zero) = scale_and_zero(in2)?;
    let (out_scale, out_zero) = scale_and_zero(out)?;
    let multiplier = (in1_scale * in2_scale / out_scale) as f64;
    let m = get_quantized_mul_and_shift_smaller_than_one(multiplier, 32)?;
    let range = get_output_range(activation, out)?;
    Ok(MulParams {
        input_zeros: [in1_zero, in2_zero],
        output: output_stage(
            out_zero,
            QuantizedMulAndShift {
                multiplier: m.multiplier,
                shift: -m.shift,
            },
            range,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kore_kernels::multiply_quantized;

    #[test]
    fn test_frexp() {
        assert_eq!(frexp(0.5), (0.5, 0));
        assert_eq!(frexp(1.0), (0.5, 1));
        assert_eq!(frexp(0.375), (0.75, -1));
        assert_eq!(frexp(-3.0), (-0.75, 2));
        let tiny = f64::MIN_POSITIVE / 8.0;
        let (m, e) = frexp(tiny);
        assert_eq!(m, 0.5);
        assert_eq!(m * 2f64.powi(e), tiny);
    }

    #[test]
    fn test_half() {
        let r = get_quantized_mul_and_shift(0.5, 32).unwrap();
        assert_eq!(r.multiplier, 1 << 30);
        assert_eq!(r.shift, 0);
        let r = get_quantized_mul_and_shift(0.25, 32).unwrap();
        assert_eq!(r, QuantizedMulAndShift { multiplier: 1 << 30, shift: -1 });
    }

    #[test]
    fn test_zero_and_tiny() {
        assert_eq!(get_quantized_mul_and_shift(0.0, 32).unwrap(), QuantizedMulAndShift::default());
        assert_eq!(get_quantized_mul_and_shift(1e-12, 32).unwrap(), QuantizedMulAndShift::default());
        assert!(get_quantized_mul_and_shift(f64::NAN, 32).is_err());
    }

    #[test]
    fn test_rounding_up_to_next_power() {
        // Rounds to 2^15 in 16 bits, so it is halved and the shift grows.
        let r = get_quantized_mul_and_shift(0.99999999, 16).unwrap();
        assert_eq!(r, QuantizedMulAndShift { multiplier: 1 << 14, shift: 1 });
        assert!(get_quantized_mul_and_shift_smaller_than_one(0.99999999, 16).is_err());
    }

    #[test]
    fn test_smaller_than_one_range() {
        assert!(get_quantized_mul_and_shift_smaller_than_one(1.0, 32).is_err());
        assert!(get_quantized_mul_and_shift_smaller_than_one(-0.1, 32).is_err());
        assert!(get_quantized_mul_and_shift_smaller_than_one(0.3, 32).unwrap().shift <= 0);
    }

    #[test]
    fn test_relu6_range() {
        let r = get_quantized_min_max(ActivationFunction::Relu6, 10, 0.1).unwrap();
        assert_eq!(r, Interval::new(10, 70));
        // Clamped into u8.
        let r = get_quantized_min_max(ActivationFunction::Relu6, 10, 0.01).unwrap();
        assert_eq!(r, Interval::new(10, 255));
    }

    #[test]
    fn test_other_activation_ranges() {
        assert_eq!(
            get_quantized_min_max(ActivationFunction::None, 100, 1.0).unwrap(),
            Interval::new(0, 255)
        );
        assert_eq!(
            get_quantized_min_max(ActivationFunction::Relu, 100, 1.0).unwrap(),
            Interval::new(100, 255)
        );
        assert_eq!(
            get_quantized_min_max(ActivationFunction::ReluN1To1, 128, 1.0 / 64.0).unwrap(),
            Interval::new(64, 192)
        );
        assert!(get_quantized_min_max(ActivationFunction::Tanh, 0, 1.0).is_err());
        assert!(get_quantized_min_max(ActivationFunction::SignBit, 0, 1.0).is_err());
    }

    #[test]
    fn test_output_range_checks_zero() {
        let bad = QuantizationInfo::new(1.0, 300);
        assert!(matches!(
            get_output_range(ActivationFunction::None, &bad),
            Err(OpError::Quantization(_))
        ));
        assert!(get_output_range(ActivationFunction::None, &QuantizationInfo::default()).is_err());
    }

    #[test]
    fn test_multiply_params() {
        let a = QuantizationInfo::new(0.5, 128);
        let b = QuantizationInfo::new(0.25, 120);
        let c = QuantizationInfo::new(1.0, 3);
        let p = get_quantized_multiply_params(&a, &b, &c).unwrap();
        assert_eq!((p.a_zero, p.b_zero, p.c_zero), (128, 120, 3));
        // 0.125 = 0.5 * 2^-2, applied as a right shift of 2.
        assert_eq!(p.c, QuantizedMulAndShift { multiplier: 1 << 30, shift: 2 });
        assert_eq!(multiply_quantized(800, p.c.multiplier, p.c.shift), 100);
    }

    #[test]
    fn test_multiply_params_reject_large_ratio() {
        let a = QuantizationInfo::new(1.0, 0);
        let c = QuantizationInfo::new(0.5, 0);
        assert!(get_quantized_multiply_params(&a, &a, &c).is_err());
    }

    #[test]
    fn test_add_params_sub_negates() {
        let q = QuantizationInfo::new(0.1, 128);
        let add = get_add_params(&q, &q, 1, &q, ActivationFunction::None).unwrap();
        let sub = get_add_params(&q, &q, -1, &q, ActivationFunction::None).unwrap();
        assert_eq!(add.inputs[1].multiplier, -sub.inputs[1].multiplier);
        assert_eq!(add.left_shift, 20);
        let rescale = get_add_params(&q, &q, 0, &q, ActivationFunction::None).unwrap();
        assert_eq!(rescale.inputs[1].multiplier, 0);
    }

    proptest::proptest! {
        #[test]
        fn prop_round_trip_within_one(m in 1e-6f64..0.999_999, x in -1_000_000i32..1_000_000) {
            let q = get_quantized_mul_and_shift_smaller_than_one(m, 32).unwrap();
            let got = multiply_quantized(x, q.multiplier, -q.shift) as f64;
            let expected = x as f64 * m;
            proptest::prop_assert!((got - expected).abs() <= 1.0, "m={} x={} got={} expected={}", m, x, got, expected);
        }
    }
}
