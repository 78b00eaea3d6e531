//! Double dispatch over the operator catalog.

use crate::ops::{
    BinaryOp, ConcatenationOp, Conv2DOp, DepthwiseConv2DOp, FullyConnectedOp, L2NormalizationOp,
    PadOp, PoolOp, ReductionOp, ReshapeOp, SoftmaxOp, TileConvFilterOp, UnaryOp,
};

/// Receives one call per operator from [`Op::accept`](crate::Op::accept).
///
/// Every method defaults to doing nothing, so a pass only overrides the
/// kinds it cares about.
pub trait OpVisitor {
    fn visit_binary(&mut self, _op: &BinaryOp) {}
    fn visit_concatenation(&mut self, _op: &ConcatenationOp) {}
    fn visit_conv2d(&mut self, _op: &Conv2DOp) {}
    fn visit_depthwise_conv2d(&mut self, _op: &DepthwiseConv2DOp) {}
    fn visit_fully_connected(&mut self, _op: &FullyConnectedOp) {}
    fn visit_l2_normalization(&mut self, _op: &L2NormalizationOp) {}
    fn visit_pad(&mut self, _op: &PadOp) {}
    fn visit_pool(&mut self, _op: &PoolOp) {}
    fn visit_reduction(&mut self, _op: &ReductionOp) {}
    fn visit_reshape(&mut self, _op: &ReshapeOp) {}
    fn visit_softmax(&mut self, _op: &SoftmaxOp) {}
    fn visit_tile_conv_filter(&mut self, _op: &TileConvFilterOp) {}
    fn visit_unary(&mut self, _op: &UnaryOp) {}
}
