//! The operator catalog.
//!
//! [`Op`] is a closed enum over every operator kind the interpreter runs.
//! Each variant owns shared references to its input tensors, its single
//! output and immutable configuration, and exposes:
//! - `map_bounds(input, output)`: the [`BoundsMap`] from an output region to
//!   the input region the operator reads
//! - `execute()`: read the inputs and write the output in place
//! - `accept(visitor)`: call the matching [`OpVisitor`] method
//!
//! Every operator works on absolute coordinates, so a scheduler can hand it
//! tensors that view sub-regions of larger buffers.

use std::ops::Deref;

use kore_core::{Buffer, DType, Element, Layout, Storage, Tensor, TensorPtr};
use parking_lot::RwLockReadGuard;

use crate::bounds::BoundsMap;
use crate::error::{OpError, Result};
use crate::quantize::scale_and_zero;
use crate::shapes::{fuse, pad_to_rank};
use crate::visitor::OpVisitor;

pub mod binary;
pub mod concat;
pub mod conv;
pub mod depthwise;
pub mod fully_connected;
pub mod l2_norm;
pub mod pad;
pub mod pool;
pub mod reduction;
pub mod requantize;
pub mod reshape;
pub mod softmax;
pub mod tile_filter;
pub mod unary;

pub use binary::{BinaryOp, BinaryOperator};
pub use concat::ConcatenationOp;
pub use conv::Conv2DOp;
pub use depthwise::DepthwiseConv2DOp;
pub use fully_connected::FullyConnectedOp;
pub use l2_norm::L2NormalizationOp;
pub use pad::PadOp;
pub use pool::{PoolOp, PoolOperator};
pub use reduction::{ReductionOp, ReductionOperator};
pub use reshape::ReshapeOp;
pub use softmax::SoftmaxOp;
pub use tile_filter::TileConvFilterOp;
pub use unary::{UnaryOp, UnaryOperator};

#[derive(Debug, Clone)]
pub enum Op {
    Binary(BinaryOp),
    Concatenation(ConcatenationOp),
    Conv2D(Conv2DOp),
    DepthwiseConv2D(DepthwiseConv2DOp),
    FullyConnected(FullyConnectedOp),
    L2Normalization(L2NormalizationOp),
    Pad(PadOp),
    Pool(PoolOp),
    Reduction(ReductionOp),
    Reshape(ReshapeOp),
    Softmax(SoftmaxOp),
    TileConvFilter(TileConvFilterOp),
    Unary(UnaryOp),
}

macro_rules! for_each_op {
    ($self:expr, $op:ident => $body:expr) => {
        match $self {
            Op::Binary($op) => $body,
            Op::Concatenation($op) => $body,
            Op::Conv2D($op) => $body,
            Op::DepthwiseConv2D($op) => $body,
            Op::FullyConnected($op) => $body,
            Op::L2Normalization($op) => $body,
            Op::Pad($op) => $body,
            Op::Pool($op) => $body,
            Op::Reduction($op) => $body,
            Op::Reshape($op) => $body,
            Op::Softmax($op) => $body,
            Op::TileConvFilter($op) => $body,
            Op::Unary($op) => $body,
        }
    };
}

impl Op {
    pub fn name(&self) -> &'static str {
        for_each_op!(self, op => op.name())
    }

    pub fn inputs(&self) -> &[TensorPtr] {
        for_each_op!(self, op => op.inputs())
    }

    pub fn input(&self, i: usize) -> Option<&TensorPtr> {
        self.inputs().get(i)
    }

    pub fn output(&self) -> &TensorPtr {
        for_each_op!(self, op => op.output())
    }

    /// Bounds of input `input` as a function of output `output`.
    pub fn map_bounds(&self, input: usize, output: usize) -> Result<BoundsMap> {
        for_each_op!(self, op => op.map_bounds(input, output)).map_err(|e| self.in_op(e))
    }

    /// Compute the output from the current input contents.
    pub fn execute(&self) -> Result<()> {
        let name = self.name();
        let _span = tracing::debug_span!("execute", op = name, output = self.output().name()).entered();
        for_each_op!(self, op => op.execute()).map_err(|e| self.in_op(e))
    }

    pub fn accept(&self, visitor: &mut dyn OpVisitor) {
        for_each_op!(self, op => op.accept(visitor))
    }

    fn in_op(&self, source: OpError) -> OpError {
        OpError::InOp {
            op: self.name(),
            source: Box::new(source),
        }
    }
}

macro_rules! impl_from_op {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Op {
                fn from(op: $ty) -> Self {
                    Op::$variant(op)
                }
            }
        )*
    };
}

impl_from_op!(
    Binary(BinaryOp),
    Concatenation(ConcatenationOp),
    Conv2D(Conv2DOp),
    DepthwiseConv2D(DepthwiseConv2DOp),
    FullyConnected(FullyConnectedOp),
    L2Normalization(L2NormalizationOp),
    Pad(PadOp),
    Pool(PoolOp),
    Reduction(ReductionOp),
    Reshape(ReshapeOp),
    Softmax(SoftmaxOp),
    TileConvFilter(TileConvFilterOp),
    Unary(UnaryOp),
);

// =============================================================================
// Shared execution helpers
// =============================================================================

pub(crate) fn expect_dtype(tensor: &Tensor, dtype: DType) -> Result<()> {
    if tensor.dtype() != dtype {
        return Err(OpError::UnsupportedType {
            dtype: tensor.dtype(),
        });
    }
    Ok(())
}

pub(crate) fn expect_rank(tensor: &Tensor, rank: usize) -> Result<()> {
    if tensor.rank() != rank {
        return Err(OpError::config(format!(
            "tensor '{}' has rank {}, expected {rank}",
            tensor.name(),
            tensor.rank()
        )));
    }
    Ok(())
}

/// Fail unless `tensor` is quantized with exactly `scale` and `zero`.
pub(crate) fn expect_quantization(tensor: &Tensor, scale: f32, zero: i32) -> Result<()> {
    let (s, z) = scale_and_zero(tensor.quantization())?;
    if s != scale || z != zero {
        return Err(OpError::Quantization(format!(
            "'{}' must have scale {scale} and zero-point {zero}, got {s} and {z}",
            tensor.name()
        )));
    }
    Ok(())
}

pub(crate) fn no_bounds(input: usize, output: usize) -> OpError {
    OpError::config(format!("no bounds for input {input} of output {output}"))
}

/// Input bytes held for the duration of a kernel call.
enum InputBytes<'a> {
    Shared(RwLockReadGuard<'a, Vec<u8>>),
    /// Snapshot of an input that lives in the output's storage.
    Copied(Vec<u8>),
}

impl Deref for InputBytes<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            InputBytes::Shared(guard) => guard.as_slice(),
            InputBytes::Copied(bytes) => bytes.as_slice(),
        }
    }
}

/// Read access to one input while the output is written.
///
/// An input sharing the output's storage is copied out first, so taking the
/// output's write guard afterwards never waits on our own read guard and
/// in-place writes can't change what the kernel reads.
pub(crate) struct InputView<'a> {
    bytes: InputBytes<'a>,
    base: usize,
}

impl<'a> InputView<'a> {
    pub(crate) fn new(input: &'a Tensor, output: &Tensor) -> Self {
        if Storage::same(input.storage(), output.storage()) {
            let range = input.layout().byte_range();
            let bytes = input.storage().read()[range.clone()].to_vec();
            Self {
                bytes: InputBytes::Copied(bytes),
                base: range.start,
            }
        } else {
            Self {
                bytes: InputBytes::Shared(input.storage().read()),
                base: 0,
            }
        }
    }

    fn rebase(&self, layout: &Layout) -> Result<Layout> {
        let offset = layout.offset().checked_sub(self.base).ok_or_else(|| {
            OpError::config(format!(
                "view at byte {} starts before its input at byte {}",
                layout.offset(),
                self.base
            ))
        })?;
        Ok(Layout::new(layout.shape().clone(), layout.elem_size(), offset))
    }

    /// Typed view through `layout`, given in the input tensor's coordinates.
    pub(crate) fn buffer<T: Element>(&self, layout: &Layout) -> Result<Buffer<'_, T>> {
        Ok(Buffer::new(&self.bytes, self.rebase(layout)?)?)
    }

    /// Raw bytes addressed by `layout`.
    pub(crate) fn bytes(&self, layout: &Layout) -> Result<&[u8]> {
        let range = self.rebase(layout)?.byte_range();
        self.bytes
            .get(range.clone())
            .ok_or_else(|| OpError::config(format!("byte range {range:?} outside input")))
    }
}

/// Whether two views address exactly the same bytes in the same arrangement.
pub(crate) fn same_bytes(a_storage: &Storage, a: &Layout, b_storage: &Storage, b: &Layout) -> bool {
    Storage::same(a_storage, b_storage)
        && a.offset() == b.offset()
        && a.elem_size() == b.elem_size()
        && a.shape() == b.shape()
}

/// Reduce `[C, ...]` views to `[C, B]` for kernels that normalize along
/// dimension 0: crop the input to the output outside dimension 0, pad both
/// to rank 2 and fuse the remaining dimensions into one.
pub(crate) fn flatten_to_2d(input: &mut Layout, output: &mut Layout) -> Result<()> {
    if input.rank() != output.rank() || input.rank() == 0 {
        return Err(OpError::config(format!(
            "input rank {} doesn't match output rank {}",
            input.rank(),
            output.rank()
        )));
    }
    for d in 1..output.rank() {
        input.crop(d, output.dim(d).interval());
    }
    pad_to_rank(input, 2);
    pad_to_rank(output, 2);
    while input.rank() > 2 {
        fuse(input, 1, 2)?;
        fuse(output, 1, 2)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kore_core::{Arena, Interval, QuantizationInfo, Shape};

    fn q() -> QuantizationInfo {
        QuantizationInfo::new(0.5, 0)
    }

    #[derive(Default)]
    struct Names(Vec<&'static str>);

    impl OpVisitor for Names {
        fn visit_reshape(&mut self, _op: &ReshapeOp) {
            self.0.push("reshape");
        }

        fn visit_unary(&mut self, _op: &UnaryOp) {
            self.0.push("unary");
        }
    }

    #[test]
    fn test_accept_calls_matching_method() {
        let a = Tensor::new("a", DType::U8, &[4], q()).into_ptr();
        let b = Tensor::new("b", DType::U8, &[4], q()).into_ptr();
        let ops: Vec<Op> = vec![
            ReshapeOp::new(a.clone(), b.clone()).into(),
            UnaryOp::new(a.clone(), b.clone(), UnaryOperator::Tanh).into(),
            PoolOp::new(a, b, PoolOperator::Max, [1, 1], [1, 1], Default::default()).into(),
        ];
        let mut names = Names::default();
        for op in &ops {
            op.accept(&mut names);
        }
        assert_eq!(names.0, ["reshape", "unary"]);
    }

    #[test]
    fn test_errors_name_the_operator() {
        let a = Tensor::new("a", DType::I32, &[4], q()).into_ptr();
        let b = Tensor::new("b", DType::U8, &[4], q()).into_ptr();
        let op: Op = UnaryOp::new(a, b, UnaryOperator::Logistic).into();
        let err = op.execute().unwrap_err();
        assert!(matches!(err, OpError::InOp { op: "Logistic", .. }));
        assert!(matches!(err.root(), OpError::UnsupportedType { dtype: DType::I32 }));

        let err = op.map_bounds(3, 0).unwrap_err();
        assert!(matches!(err.root(), OpError::Config(_)));
    }

    #[test]
    fn test_input_view_snapshots_shared_storage() {
        let mut arena = Arena::new(64);
        let a = arena.alloc_tensor("a", DType::U8, &[4], q()).unwrap();
        let b = arena.alloc_tensor("b", DType::U8, &[4], q()).unwrap();
        a.copy_from_slice(&[1u8, 2, 3, 4]).unwrap();
        let view = InputView::new(&a, &b);
        // The output's write guard is free while the view is alive.
        b.fill(9u8).unwrap();
        let buf = view.buffer::<u8>(a.layout()).unwrap();
        assert_eq!(buf.to_vec(), [1, 2, 3, 4]);
        let cropped = a.layout().cropped(0, Interval::new(2, 3));
        assert_eq!(view.bytes(&cropped).unwrap(), &[3, 4]);
    }

    #[test]
    fn test_same_bytes() {
        let s = Storage::zeros(16);
        let a = Layout::new(Shape::contiguous(&[4]), 1, 0);
        assert!(same_bytes(&s, &a, &s, &a.clone()));
        assert!(!same_bytes(&s, &a, &s, &a.translated(0, 1)));
        assert!(!same_bytes(&s, &a, &Storage::zeros(16), &a));
    }

    #[test]
    fn test_flatten_to_2d() {
        let mut input = Layout::new(Shape::contiguous(&[5, 2, 3]), 1, 0);
        let mut output = input.clone();
        flatten_to_2d(&mut input, &mut output).unwrap();
        assert_eq!(input.shape().extents().as_slice(), &[5, 6]);
        assert_eq!(output.shape().extents().as_slice(), &[5, 6]);

        let mut input = Layout::new(Shape::contiguous(&[5]), 1, 0);
        let mut output = input.clone();
        flatten_to_2d(&mut input, &mut output).unwrap();
        assert_eq!(input.rank(), 2);
    }
}
