//! Moving `u8` values between quantizations.

use kore_core::{Buffer, BufferMut, QuantizationInfo};
use kore_kernels::{add_u8_u8, copy_u8_u8};

use crate::error::Result;
use crate::quantize::{get_add_params, ActivationFunction};

/// Write `input` into `output` under `output_q`.
///
/// Equal quantizations copy, or do nothing when `in_place` says the output
/// already holds the input's bytes. Otherwise the values are rescaled by the
/// add kernel with the second operand switched off.
pub(crate) fn requantize(
    input: &Buffer<u8>,
    input_q: &QuantizationInfo,
    output: &mut BufferMut<u8>,
    output_q: &QuantizationInfo,
    in_place: bool,
) -> Result<()> {
    if input_q == output_q {
        if in_place {
            tracing::trace!("requantize: input already in place");
            return Ok(());
        }
        copy_u8_u8(input, 0, output)?;
        return Ok(());
    }
    let params = get_add_params(input_q, input_q, 0, output_q, ActivationFunction::None)?;
    add_u8_u8(input, input, &params, output)?;
    Ok(())
}
