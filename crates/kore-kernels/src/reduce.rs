use kore_core::{Buffer, BufferMut, Interval};

use crate::error::{expect_covers, expect_rank, KernelError, KernelResult, BAD_EXTENT};

/// Reduction window along one dimension: `(min, extent)`.
pub type MeanWindow = [(i32, i32); 4];

/// Rank-4 mean. Output `o` averages input `o + (min_d + r_d)` for `r_d` in
/// `0..extent_d` along every dimension, rounding half up. Non-reduced
/// dimensions use the window `(0, 1)`.
pub fn mean_u8(input: &Buffer<u8>, window: &MeanWindow, output: &mut BufferMut<u8>) -> KernelResult {
    const NAME: &str = "mean_u8";
    expect_rank(NAME, "input", input.rank(), 4)?;
    expect_rank(NAME, "output", output.rank(), 4)?;
    if window.iter().any(|&(_, extent)| extent < 1) {
        return Err(KernelError::new(NAME, BAD_EXTENT, format!("empty window {window:?}")));
    }
    if output.shape().numel() == 0 {
        return Ok(());
    }
    for (d, &(min, extent)) in window.iter().enumerate() {
        let out = output.dim(d).interval();
        expect_covers(
            NAME,
            &format!("input dim {d}"),
            input.dim(d).interval(),
            Interval::new(out.min + min, out.max + min + extent - 1),
        )?;
    }

    let count: i64 = window.iter().map(|&(_, e)| e as i64).product();
    output.fill_with(|o| {
        let mut sum = 0i64;
        for r3 in 0..window[3].1 {
            for r2 in 0..window[2].1 {
                for r1 in 0..window[1].1 {
                    for r0 in 0..window[0].1 {
                        sum += input.get(&[
                            o[0] + window[0].0 + r0,
                            o[1] + window[1].0 + r1,
                            o[2] + window[2].0 + r2,
                            o[3] + window[3].0 + r3,
                        ]) as i64;
                    }
                }
            }
        }
        ((sum + count / 2) / count) as u8
    });
    Ok(())
}
