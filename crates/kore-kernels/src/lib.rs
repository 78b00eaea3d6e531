//! # kore-kernels
//!
//! Scalar reference kernels for quantized `u8` inference, plus the
//! per-target capability table the operator layer consults.
//!
//! Provides:
//! - Fixed-point helpers (rounding doubling high multiply, rounding shift)
//! - Target capability detection (`TargetConfig`, resolved once per process)
//! - Elementwise add/mul/copy/fill
//! - Convolution (standard and large-reduction), three depthwise variants,
//!   fully connected, pooling, mean
//! - Softmax, logistic, tanh, L2 normalization
//! - Conv filter tiling
//!
//! Every kernel takes typed strided views in absolute coordinates and
//! returns `Result<(), KernelError>`; it never panics on a bad shape.

pub mod activation;
pub mod conv;
pub mod depthwise;
pub mod elementwise;
pub mod error;
pub mod fixed_point;
pub mod fully_connected;
pub mod pool;
pub mod reduce;
pub mod target;

pub use activation::{l2_normalization_u8, logistic_u8, softmax_u8, tanh_u8, SoftmaxParams, UnaryParams};
pub use conv::{conv_r16_u8, conv_u8, tile_conv_filter_u8, ConvParams};
pub use depthwise::{
    depthwise_conv_broadcast_u8, depthwise_conv_dm1_u8, depthwise_conv_u8, DepthwiseParams,
};
pub use elementwise::{add_u8_u8, copy_u8_u8, fill_u8, mul_u8_u8_u8, AddInput, AddParams, MulParams};
pub use error::{KernelError, KernelResult};
pub use fixed_point::{multiply_quantized, rounding_doubling_high_mul, rounding_shift_right, OutputStage};
pub use fully_connected::{fully_connected_u8, FullyConnectedParams};
pub use pool::{average_pool_u8, max_pool_u8, PoolParams};
pub use reduce::{mean_u8, MeanWindow};
pub use target::{FilterTiling, TargetArch, TargetConfig};
