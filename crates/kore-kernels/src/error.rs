/// Failure status reported by a kernel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("kernel '{kernel}' failed with status {code}: {reason}")]
pub struct KernelError {
    pub kernel: &'static str,
    pub code: i32,
    pub reason: String,
}

pub type KernelResult = Result<(), KernelError>;

/// A buffer has the wrong number of dimensions.
pub const BAD_RANK: i32 = 1;
/// An input does not cover the region the output needs.
pub const OUT_OF_BOUNDS: i32 = 2;
/// An extent violates the kernel's requirements.
pub const BAD_EXTENT: i32 = 3;
/// A scalar parameter is out of range.
pub const BAD_PARAM: i32 = 4;

impl KernelError {
    pub fn new(kernel: &'static str, code: i32, reason: impl Into<String>) -> Self {
        Self {
            kernel,
            code,
            reason: reason.into(),
        }
    }
}

pub(crate) fn expect_rank(kernel: &'static str, what: &str, rank: usize, expected: usize) -> KernelResult {
    if rank != expected {
        return Err(KernelError::new(
            kernel,
            BAD_RANK,
            format!("{what} has rank {rank}, expected {expected}"),
        ));
    }
    Ok(())
}

pub(crate) fn expect_covers(
    kernel: &'static str,
    what: &str,
    have: kore_core::Interval,
    need: kore_core::Interval,
) -> KernelResult {
    if !have.contains(&need) {
        return Err(KernelError::new(
            kernel,
            OUT_OF_BOUNDS,
            format!("{what} covers {have}, needs {need}"),
        ));
    }
    Ok(())
}
