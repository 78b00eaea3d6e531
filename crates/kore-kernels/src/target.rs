//! Per-target kernel capabilities.
//!
//! The operator layer needs a few facts about the compiled kernels: the SIMD
//! width depthwise convolution pads channels to, the layout of tiled conv
//! filters, and whether the large-reduction conv variant was built. They are
//! kept in one table keyed by architecture and resolved once per process.

use std::sync::OnceLock;

use kore_core::{align_up, ceil_div};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TargetArch {
    X86_64,
    Aarch64,
    Arm,
    Wasm32,
    Other,
}

impl TargetArch {
    /// Architecture this crate was compiled for.
    pub fn host() -> Self {
        if cfg!(target_arch = "x86_64") {
            TargetArch::X86_64
        } else if cfg!(target_arch = "aarch64") {
            TargetArch::Aarch64
        } else if cfg!(target_arch = "arm") {
            TargetArch::Arm
        } else if cfg!(target_arch = "wasm32") {
            TargetArch::Wasm32
        } else {
            TargetArch::Other
        }
    }
}

/// Layout of a tiled conv filter: `[vector_reduction, vector_tile,
/// input channel groups, output channel groups, width, height]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterTiling {
    /// Input channels interleaved per lane group.
    pub vector_reduction: i32,
    /// Output channels computed together.
    pub vector_tile: i32,
}

impl FilterTiling {
    /// Input channel groups must be a multiple of this.
    pub fn channel_alignment(&self, unroll_reduction: i32) -> i32 {
        (unroll_reduction / self.vector_reduction).max(1)
    }

    /// Extents of the tiled filter for a `[C, W, H, K]` filter.
    pub fn tiled_extents(
        &self,
        input_channels: i32,
        width: i32,
        height: i32,
        output_channels: i32,
        unroll_reduction: i32,
    ) -> [i32; 6] {
        [
            self.vector_reduction,
            self.vector_tile,
            align_up(
                ceil_div(input_channels, self.vector_reduction),
                self.channel_alignment(unroll_reduction),
            ),
            ceil_div(output_channels, self.vector_tile),
            width,
            height,
        ]
    }
}

/// Capability table for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetConfig {
    pub arch: TargetArch,
    /// Natural vector width in bytes; dm=1 depthwise pads channels to it.
    pub vector_bytes: i32,
    pub conv_tiling: FilterTiling,
    /// Whether `conv_r16_u8` is available.
    pub large_reduction_conv: bool,
}

static HOST: OnceLock<TargetConfig> = OnceLock::new();

impl TargetConfig {
    pub fn for_arch(arch: TargetArch) -> Self {
        let (vector_bytes, vector_tile, large_reduction_conv) = match arch {
            TargetArch::X86_64 => (32, 8, true),
            TargetArch::Aarch64 => (16, 16, true),
            TargetArch::Arm | TargetArch::Wasm32 => (16, 8, false),
            TargetArch::Other => (32, 8, false),
        };
        Self {
            arch,
            vector_bytes,
            conv_tiling: FilterTiling {
                vector_reduction: 4,
                vector_tile,
            },
            large_reduction_conv,
        }
    }

    /// Capabilities of the current process, resolved once.
    pub fn host() -> &'static TargetConfig {
        HOST.get_or_init(|| TargetConfig::for_arch(TargetArch::host()))
    }

    /// Input channel unroll of the conv kernel chosen for `input_channels`.
    pub fn conv_unroll(&self, input_channels: i32) -> i32 {
        if self.uses_large_reduction(input_channels) {
            16
        } else {
            4
        }
    }

    pub fn uses_large_reduction(&self, input_channels: i32) -> bool {
        self.large_reduction_conv && input_channels >= 16
    }

    /// Extents of the tiled filter conv expects for a `[C, W, H, K]` filter.
    pub fn tiled_filter_extents(&self, input_channels: i32, width: i32, height: i32, output_channels: i32) -> [i32; 6] {
        self.conv_tiling.tiled_extents(
            input_channels,
            width,
            height,
            output_channels,
            self.conv_unroll(input_channels),
        )
    }

    /// Channel alignment required of a dm=1 depthwise conv input.
    pub fn depthwise_alignment(&self) -> i32 {
        self.vector_bytes
    }
}
