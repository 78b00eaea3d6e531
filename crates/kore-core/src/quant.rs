/// Affine quantization parameters: `real = scale * (q - zero)`.
///
/// Scales and zero-points are stored per channel along `dimension`; the
/// operators in this workspace only use the first entry.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuantizationInfo {
    pub dimension: usize,
    pub scale: Vec<f32>,
    pub zero: Vec<i32>,
}

impl QuantizationInfo {
    /// Per-tensor quantization.
    pub fn new(scale: f32, zero: i32) -> Self {
        Self {
            dimension: 0,
            scale: vec![scale],
            zero: vec![zero],
        }
    }

    pub fn per_channel(dimension: usize, scale: Vec<f32>, zero: Vec<i32>) -> Self {
        Self {
            dimension,
            scale,
            zero,
        }
    }

    pub fn first_scale(&self) -> Option<f32> {
        self.scale.first().copied()
    }

    pub fn first_zero(&self) -> Option<i32> {
        self.zero.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.scale.is_empty() && self.zero.is_empty()
    }
}
