use kore_core::{DType, KoreError};
use kore_kernels::KernelError;

/// Errors from bounds inference and operator execution.
///
/// Configuration, type and quantization errors describe a graph the
/// interpreter cannot run; callers should stop rather than retry.
#[derive(Debug, thiserror::Error)]
pub enum OpError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unsupported tensor type {dtype}")]
    UnsupportedType { dtype: DType },

    #[error("quantization error: {0}")]
    Quantization(String),

    #[error("can't broadcast dimension {dim}: extents {a} and {b}")]
    Broadcast { dim: usize, a: i32, b: i32 },

    #[error("can't fuse dimensions {d0} and {d1}")]
    Unfusable { d0: usize, d1: usize },

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Core(#[from] KoreError),

    #[error("{op}: {source}")]
    InOp {
        op: &'static str,
        #[source]
        source: Box<OpError>,
    },
}

impl OpError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        OpError::Config(msg.into())
    }

    /// The error with any `InOp` context removed.
    pub fn root(&self) -> &OpError {
        match self {
            OpError::InOp { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, OpError>;
