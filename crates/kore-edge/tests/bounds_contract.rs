//! Running an operator on the input regions its bounds map asks for must
//! reproduce the matching part of the full output exactly.

use kore_core::{DType, Interval, QuantizationInfo, Shape, Tensor, TensorPtr};
use kore_edge::{
    ActivationFunction, BinaryOp, BinaryOperator, ConcatenationOp, Conv2DOp, DepthwiseConv2DOp,
    FullyConnectedOp, L2NormalizationOp, Op, PadOp, PoolOp, PoolOperator, ReductionOp, ReductionOperator,
    ReshapeOp, SoftmaxOp, TileConvFilterOp, UnaryOp, UnaryOperator,
};
use kore_kernels::{TargetArch, TargetConfig};

/// Deterministic pseudo-random bytes.
fn pattern(n: i32, seed: u32) -> Vec<u8> {
    (0..n as u32).map(|i| ((i * 37 + seed * 11 + 5) % 251) as u8).collect()
}

fn u8_tensor(name: &str, extents: &[i32], seed: u32, q: QuantizationInfo) -> TensorPtr {
    let n = extents.iter().product();
    Tensor::from_u8(name, extents, &pattern(n, seed), q).unwrap().into_ptr()
}

fn i32_tensor(name: &str, extents: &[i32], values: &[i32]) -> TensorPtr {
    Tensor::from_i32(name, extents, values, QuantizationInfo::default())
        .unwrap()
        .into_ptr()
}

fn bias(values: &[i32]) -> TensorPtr {
    i32_tensor("bias", &[values.len() as i32], values)
}

/// `t` restricted to `region` (intersected with its own bounds), sharing
/// its storage.
fn crop_view(t: &TensorPtr, region: &[Interval]) -> TensorPtr {
    let mut layout = t.layout().clone();
    layout.crop_all(region).unwrap();
    Tensor::view(
        format!("{}_view", t.name()),
        t.dtype(),
        t.quantization().clone(),
        t.storage().clone(),
        layout,
    )
    .unwrap()
    .into_ptr()
}

/// Execute `op` in full, then again on `region` alone via `rebuild`, and
/// compare.
fn check_sub_region(op: &Op, region: &[Interval], rebuild: impl Fn(Vec<TensorPtr>, TensorPtr) -> Op) {
    op.execute().unwrap();
    let inputs: Vec<TensorPtr> = op
        .inputs()
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let needed = op.map_bounds(i, 0).unwrap().evaluate(region).unwrap();
            crop_view(t, &needed)
        })
        .collect();
    let out = op.output();
    let sub_out = Tensor::with_bounds("sub", out.dtype(), region, out.quantization().clone()).into_ptr();
    rebuild(inputs, sub_out.clone()).execute().unwrap();

    Shape::from_bounds(region).for_each_coord(|c| {
        assert_eq!(
            sub_out.get::<u8>(c).unwrap(),
            out.get::<u8>(c).unwrap(),
            "{} differs at {c:?}",
            op.name()
        );
    });
}

fn region(r: &[(i32, i32)]) -> Vec<Interval> {
    r.iter().map(|&(a, b)| Interval::new(a, b)).collect()
}

// =============================================================================
// Convolutions
// =============================================================================

#[test]
fn test_conv2d_sub_region() {
    let target = TargetConfig::for_arch(TargetArch::X86_64);
    let fq = QuantizationInfo::new(0.25, 5);
    let raw = u8_tensor("raw", &[4, 3, 3, 3], 1, fq.clone());
    let filter = Tensor::new("filter", DType::U8, &target.tiled_filter_extents(4, 3, 3, 3), fq).into_ptr();
    TileConvFilterOp::new(raw, filter.clone()).execute().unwrap();

    let input = u8_tensor("input", &[4, 5, 5, 1], 2, QuantizationInfo::new(0.5, 3));
    let out = Tensor::new("out", DType::U8, &[3, 3, 3, 1], QuantizationInfo::new(2.0, 10)).into_ptr();
    let build = move |inputs: Vec<TensorPtr>, output: TensorPtr| -> Op {
        Conv2DOp::new(
            inputs[0].clone(),
            inputs[1].clone(),
            inputs[2].clone(),
            output,
            [1, 1],
            [1, 1],
            ActivationFunction::Relu,
        )
        .with_target(target)
        .into()
    };
    let op = build(vec![input, filter, bias(&[3, -7, 11])], out);
    check_sub_region(&op, &region(&[(1, 2), (1, 2), (0, 1), (0, 0)]), build);
}

#[test]
fn test_depthwise_sub_region() {
    for dm in [1, 2] {
        let channels = 3 * dm;
        let input = u8_tensor("input", &[3, 6, 6, 1], 3, QuantizationInfo::new(0.5, 7));
        let filter = u8_tensor("filter", &[channels, 3, 3, 1], 4, QuantizationInfo::new(0.125, 9));
        let out = Tensor::new("out", DType::U8, &[channels, 2, 2, 1], QuantizationInfo::new(1.0, 20)).into_ptr();
        let biases: Vec<i32> = (0..channels).map(|k| k * 5 - 6).collect();
        let build = move |inputs: Vec<TensorPtr>, output: TensorPtr| -> Op {
            DepthwiseConv2DOp::new(
                inputs[0].clone(),
                inputs[1].clone(),
                inputs[2].clone(),
                output,
                dm,
                [2, 2],
                [1, 1],
                ActivationFunction::None,
            )
            .with_target(TargetConfig::for_arch(TargetArch::X86_64))
            .into()
        };
        let op = build(vec![input, filter, bias(&biases)], out);
        check_sub_region(&op, &region(&[(1, channels - 1), (1, 1), (0, 1), (0, 0)]), build);
    }
}

// =============================================================================
// Binary and fully connected
// =============================================================================

#[test]
fn test_binary_sub_region_with_broadcast() {
    for operator in [BinaryOperator::Add, BinaryOperator::Sub, BinaryOperator::Mul] {
        let a = u8_tensor("a", &[4, 3], 5, QuantizationInfo::new(0.5, 10));
        let b = u8_tensor("b", &[1, 3], 6, QuantizationInfo::new(0.25, 20));
        let out = Tensor::new("out", DType::U8, &[4, 3], QuantizationInfo::new(1.0, 5)).into_ptr();
        let build = move |inputs: Vec<TensorPtr>, output: TensorPtr| -> Op {
            BinaryOp::new(inputs[0].clone(), inputs[1].clone(), output, operator, ActivationFunction::Relu).into()
        };
        let op = build(vec![a, b], out);
        check_sub_region(&op, &region(&[(1, 2), (1, 2)]), build);
    }
}

#[test]
fn test_fully_connected_sub_region() {
    let input = u8_tensor("input", &[6, 4], 7, QuantizationInfo::new(0.5, 100));
    let filter = u8_tensor("filter", &[6, 5], 8, QuantizationInfo::new(0.05, 128));
    let out = Tensor::new("out", DType::U8, &[5, 4], QuantizationInfo::new(1.0, 128)).into_ptr();
    let build = |inputs: Vec<TensorPtr>, output: TensorPtr| -> Op {
        FullyConnectedOp::new(
            inputs[0].clone(),
            inputs[1].clone(),
            inputs[2].clone(),
            output,
            ActivationFunction::None,
        )
        .into()
    };
    let op = build(vec![input, filter, bias(&[0, 50, -50, 500, -500])], out);
    check_sub_region(&op, &region(&[(1, 3), (2, 3)]), build);
}

#[test]
fn test_tile_conv_filter_sub_region() {
    let target = TargetConfig::for_arch(TargetArch::X86_64);
    let q = QuantizationInfo::new(0.25, 5);
    let raw = u8_tensor("raw", &[4, 3, 3, 3], 9, q.clone());
    let extents = target.tiled_filter_extents(4, 3, 3, 3);
    let tiled = Tensor::new("tiled", DType::U8, &extents, QuantizationInfo::new(0.25, 128)).into_ptr();
    let build = |inputs: Vec<TensorPtr>, output: TensorPtr| -> Op { TileConvFilterOp::new(inputs[0].clone(), output).into() };
    let op = build(vec![raw], tiled);

    // Lanes stay whole; the spatial taps are split.
    let mut sub: Vec<(i32, i32)> = extents[..4].iter().map(|&e| (0, e - 1)).collect();
    sub.extend([(1, 2), (0, 1)]);
    check_sub_region(&op, &region(&sub), build);
}

// =============================================================================
// Data movement
// =============================================================================

#[test]
fn test_pad_sub_region() {
    // Before/after per dimension: one on each side of dim 0, two after dim 1.
    let padding = i32_tensor("padding", &[2, 2], &[1, 1, 0, 2]);
    let input = u8_tensor("input", &[3, 2], 10, QuantizationInfo::new(0.5, 7));
    let out = Tensor::new("out", DType::U8, &[5, 4], QuantizationInfo::new(0.5, 7)).into_ptr();
    let build = |inputs: Vec<TensorPtr>, output: TensorPtr| -> Op {
        PadOp::new(inputs[0].clone(), inputs.get(1).cloned(), output).into()
    };
    let op = build(vec![input, padding], out);
    check_sub_region(&op, &region(&[(0, 2), (1, 3)]), build);
    // Nothing of the input is needed here; the whole region is padding.
    check_sub_region(&op, &region(&[(4, 4), (2, 3)]), build);
}

#[test]
fn test_concatenation_sub_region() {
    let a = u8_tensor("a", &[2, 3], 11, QuantizationInfo::new(1.0, 0));
    let b = u8_tensor("b", &[2, 4], 12, QuantizationInfo::new(0.5, 0));
    let out = Tensor::new("out", DType::U8, &[2, 7], QuantizationInfo::new(1.0, 0)).into_ptr();
    let build = |inputs: Vec<TensorPtr>, output: TensorPtr| -> Op { ConcatenationOp::new(inputs, output, 1).into() };
    let op = build(vec![a, b], out);
    check_sub_region(&op, &region(&[(0, 1), (2, 4)]), build);
    check_sub_region(&op, &region(&[(0, 1), (4, 6)]), build);
    check_sub_region(&op, &region(&[(1, 1), (0, 1)]), build);
}

#[test]
fn test_reshape_sub_region() {
    let input = u8_tensor("input", &[4, 3], 13, QuantizationInfo::new(1.0, 0));
    let out = Tensor::new("out", DType::U8, &[6, 2], QuantizationInfo::new(1.0, 0)).into_ptr();
    let whole = out.bounds_all();
    let build = move |inputs: Vec<TensorPtr>, output: TensorPtr| -> Op {
        ReshapeOp::new(inputs[0].clone(), output).with_output_bounds(&whole).into()
    };
    let op = build(vec![input], out);
    check_sub_region(&op, &region(&[(1, 4), (0, 1)]), build);
}

// =============================================================================
// Pooling and reductions
// =============================================================================

#[test]
fn test_pool_sub_region_with_same_padding() {
    let input = u8_tensor("input", &[1, 3, 3, 1], 14, QuantizationInfo::new(1.0, 0));
    let out = Tensor::new("out", DType::U8, &[1, 3, 3, 1], QuantizationInfo::new(1.0, 0)).into_ptr();
    let full = PoolOp::new(input, out, PoolOperator::Average, [1, 1], [3, 3], ActivationFunction::None);
    let padding = full.padding();
    let build = move |inputs: Vec<TensorPtr>, output: TensorPtr| -> Op {
        PoolOp::new(inputs[0].clone(), output, PoolOperator::Average, [1, 1], [3, 3], ActivationFunction::None)
            .with_padding(padding)
            .into()
    };
    let op: Op = full.into();
    check_sub_region(&op, &region(&[(0, 0), (2, 2), (2, 2), (0, 0)]), &build);
    check_sub_region(&op, &region(&[(0, 0), (0, 1), (1, 2), (0, 0)]), &build);
}

#[test]
fn test_max_pool_sub_region_strided() {
    let input = u8_tensor("input", &[2, 5, 5, 1], 15, QuantizationInfo::new(1.0, 0));
    let out = Tensor::new("out", DType::U8, &[2, 3, 3, 1], QuantizationInfo::new(1.0, 0)).into_ptr();
    let full = PoolOp::new(input, out, PoolOperator::Max, [2, 2], [3, 3], ActivationFunction::Relu);
    assert_eq!(full.padding(), [1, 1]);
    let padding = full.padding();
    let build = move |inputs: Vec<TensorPtr>, output: TensorPtr| -> Op {
        PoolOp::new(inputs[0].clone(), output, PoolOperator::Max, [2, 2], [3, 3], ActivationFunction::Relu)
            .with_padding(padding)
            .into()
    };
    let op: Op = full.into();
    check_sub_region(&op, &region(&[(1, 1), (1, 2), (0, 1), (0, 0)]), build);
}

#[test]
fn test_mean_sub_region() {
    let q = QuantizationInfo::new(0.5, 3);
    let input = u8_tensor("input", &[3, 4, 4, 2], 16, q.clone());

    let kept = Tensor::new("kept", DType::U8, &[3, 1, 1, 2], q.clone()).into_ptr();
    let build = |inputs: Vec<TensorPtr>, output: TensorPtr| -> Op {
        ReductionOp::new(inputs[0].clone(), inputs[1].clone(), output, ReductionOperator::Mean).into()
    };
    let op = build(vec![input.clone(), i32_tensor("axes", &[2], &[1, 2])], kept);
    check_sub_region(&op, &region(&[(1, 2), (0, 0), (0, 0), (1, 1)]), build);

    let dropped = Tensor::new("dropped", DType::U8, &[3, 2], q).into_ptr();
    let op = build(vec![input, i32_tensor("axes", &[2], &[-3, 2])], dropped);
    check_sub_region(&op, &region(&[(0, 1), (1, 1)]), build);
}

// =============================================================================
// Normalizations and activations
// =============================================================================

#[test]
fn test_softmax_sub_region() {
    let input = u8_tensor("input", &[5, 3], 17, QuantizationInfo::new(0.1, 0));
    let out = Tensor::new("out", DType::U8, &[5, 3], QuantizationInfo::new(1.0 / 256.0, 0)).into_ptr();
    let build = |inputs: Vec<TensorPtr>, output: TensorPtr| -> Op { SoftmaxOp::new(inputs[0].clone(), output, 1.0).into() };
    let op = build(vec![input], out);
    check_sub_region(&op, &region(&[(1, 3), (1, 2)]), build);
}

#[test]
fn test_l2_normalization_sub_region() {
    let input = u8_tensor("input", &[4, 3, 2], 18, QuantizationInfo::new(0.5, 100));
    let out = Tensor::new("out", DType::U8, &[4, 3, 2], QuantizationInfo::new(1.0 / 128.0, 128)).into_ptr();
    let build = |inputs: Vec<TensorPtr>, output: TensorPtr| -> Op { L2NormalizationOp::new(inputs[0].clone(), output).into() };
    let op = build(vec![input], out);
    check_sub_region(&op, &region(&[(1, 2), (0, 2), (1, 1)]), build);
}

#[test]
fn test_unary_sub_region() {
    for (operator, out_q) in [
        (UnaryOperator::Logistic, QuantizationInfo::new(1.0 / 256.0, 0)),
        (UnaryOperator::Tanh, QuantizationInfo::new(1.0 / 128.0, 128)),
    ] {
        let input = u8_tensor("input", &[4, 3], 19, QuantizationInfo::new(0.1, 128));
        let out = Tensor::new("out", DType::U8, &[4, 3], out_q).into_ptr();
        let build = move |inputs: Vec<TensorPtr>, output: TensorPtr| -> Op {
            UnaryOp::new(inputs[0].clone(), output, operator).into()
        };
        let op = build(vec![input], out);
        check_sub_region(&op, &region(&[(1, 2), (1, 2)]), build);
    }
}
