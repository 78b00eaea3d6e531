//! # kore-core
//!
//! Tensor storage and addressing for the kore quantized edge interpreter.
//!
//! Provides:
//! - `Tensor`: a named, quantized, strided view over shared byte storage
//! - `Shape` / `Dim`: per-dimension `(min, extent, stride)` descriptions
//! - `Layout`, `Buffer`, `BufferMut`: byte addressing and typed element access
//! - `Storage` and `Arena`: shared backing memory, so several tensors can
//!   alias one allocation for in-place execution
//! - `QuantizationInfo` and `Interval`, the vocabulary of the operator layer

pub mod arena;
pub mod buffer;
pub mod dtype;
pub mod error;
pub mod interval;
pub mod quant;
pub mod shape;
pub mod storage;
pub mod tensor;

pub use arena::Arena;
pub use buffer::{Buffer, BufferMut, Layout};
pub use dtype::{DType, Element};
pub use error::KoreError;
pub use interval::{align_up, ceil_div, floor_div, Interval};
pub use quant::QuantizationInfo;
pub use shape::{Dim, Shape};
pub use storage::Storage;
pub use tensor::{Tensor, TensorPtr};

pub type Result<T> = std::result::Result<T, KoreError>;
