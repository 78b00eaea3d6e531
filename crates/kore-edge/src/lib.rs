//! # kore-edge
//!
//! Operator execution layer of the kore quantized edge interpreter.
//!
//! Each operator consumes `u8`-quantized tensors and produces a quantized
//! output in place. The layer combines three concerns:
//! - Bounds inference: which input region an output region needs
//!   ([`BoundsMap`], `Op::map_bounds`)
//! - Fixed-point parameters derived from scales and zero-points
//!   ([`quantize`])
//! - Shape normalization, so a few kernels cover many layouts ([`shapes`])
//!
//! Kernels live in `kore-kernels`; [`dispatch`] picks the variant for the
//! current shapes and target. [`OpVisitor`] lets later passes walk the
//! closed [`Op`] catalog.

pub mod bounds;
pub mod dispatch;
pub mod error;
pub mod ops;
pub mod quantize;
pub mod shapes;
pub mod visitor;

pub use bounds::{BoundsMap, DimMap, Region};
pub use dispatch::{ConvKernel, DepthwiseKernel};
pub use error::{OpError, Result};
pub use ops::{
    BinaryOp, BinaryOperator, ConcatenationOp, Conv2DOp, DepthwiseConv2DOp, FullyConnectedOp,
    L2NormalizationOp, Op, PadOp, PoolOp, PoolOperator, ReductionOp, ReductionOperator, ReshapeOp,
    SoftmaxOp, TileConvFilterOp, UnaryOp, UnaryOperator,
};
pub use quantize::{ActivationFunction, MultiplyParams, QuantizedMulAndShift};
pub use visitor::OpVisitor;
