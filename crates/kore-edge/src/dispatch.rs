//! Kernel variant selection.
//!
//! Each operator with more than one compiled kernel picks the variant here,
//! from the current shapes and the target capability table, so the choice is
//! made in one place and can be tested without running the kernel.

use kore_core::{Buffer, BufferMut};
use kore_kernels::{
    conv_r16_u8, conv_u8, depthwise_conv_broadcast_u8, depthwise_conv_dm1_u8, depthwise_conv_u8,
    ConvParams, DepthwiseParams, KernelResult, TargetConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvKernel {
    Standard,
    /// Unrolls the reduction by 16; needs at least 16 input channels.
    LargeReduction,
}

impl ConvKernel {
    pub fn select(target: &TargetConfig, input_channels: i32) -> Self {
        if target.uses_large_reduction(input_channels) {
            ConvKernel::LargeReduction
        } else {
            ConvKernel::Standard
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConvKernel::Standard => "conv_u8",
            ConvKernel::LargeReduction => "conv_r16_u8",
        }
    }

    pub fn run(
        &self,
        input: &Buffer<u8>,
        filter: &Buffer<u8>,
        bias: &Buffer<i32>,
        params: &ConvParams,
        output: &mut BufferMut<u8>,
    ) -> KernelResult {
        match self {
            ConvKernel::Standard => conv_u8(input, filter, bias, params, output),
            ConvKernel::LargeReduction => conv_r16_u8(input, filter, bias, params, output),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthwiseKernel {
    /// Every output channel in the region reads one input channel.
    Broadcast,
    DepthMultiplier1,
    General,
}

impl DepthwiseKernel {
    pub fn select(depth_multiplier: i32, output_channels: i32) -> Self {
        if depth_multiplier >= output_channels {
            DepthwiseKernel::Broadcast
        } else if depth_multiplier == 1 {
            DepthwiseKernel::DepthMultiplier1
        } else {
            DepthwiseKernel::General
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DepthwiseKernel::Broadcast => "depthwise_conv_broadcast_u8",
            DepthwiseKernel::DepthMultiplier1 => "depthwise_conv_dm1_u8",
            DepthwiseKernel::General => "depthwise_conv_u8",
        }
    }

    pub fn run(
        &self,
        input: &Buffer<u8>,
        filter: &Buffer<u8>,
        bias: &Buffer<i32>,
        params: &DepthwiseParams,
        output: &mut BufferMut<u8>,
    ) -> KernelResult {
        match self {
            DepthwiseKernel::Broadcast => depthwise_conv_broadcast_u8(input, filter, bias, params, output),
            DepthwiseKernel::DepthMultiplier1 => depthwise_conv_dm1_u8(input, filter, bias, params, output),
            DepthwiseKernel::General => depthwise_conv_u8(input, filter, bias, params, output),
        }
    }
}
