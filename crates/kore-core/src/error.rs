use crate::DType;

/// Errors raised by tensor construction and addressing.
#[derive(Debug, thiserror::Error)]
pub enum KoreError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<i64>, got: Vec<i64> },

    #[error("unsupported dtype: {0}")]
    UnsupportedDType(DType),

    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },

    #[error("invalid axis {axis} for rank {rank}")]
    InvalidAxis { axis: i64, rank: usize },

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("arena exhausted: requested {requested} bytes, {remaining} remaining")]
    ArenaExhausted { requested: usize, remaining: usize },
}
