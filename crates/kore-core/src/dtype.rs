use std::fmt;

/// Element types an interpreter tensor can hold.
///
/// Activations, filters and quantized outputs are `U8`; biases, padding
/// amounts and reduction axis lists are `I32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DType {
    /// 8-bit unsigned integer
    U8,
    /// 32-bit signed integer
    I32,
}

impl DType {
    /// Size in bytes of a single element.
    pub fn element_size(&self) -> usize {
        match self {
            DType::U8 => 1,
            DType::I32 => 4,
        }
    }

    /// Number of bytes needed to store `n` elements of this dtype.
    pub fn storage_bytes(&self, n: usize) -> usize {
        self.element_size() * n
    }

    /// Inclusive range of values representable by this dtype, as i64.
    pub fn value_range(&self) -> (i64, i64) {
        match self {
            DType::U8 => (u8::MIN as i64, u8::MAX as i64),
            DType::I32 => (i32::MIN as i64, i32::MAX as i64),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::U8 => write!(f, "u8"),
            DType::I32 => write!(f, "i32"),
        }
    }
}

/// A Rust scalar type that can be stored in a tensor.
pub trait Element: bytemuck::Pod + Copy + Default + fmt::Debug + PartialEq {
    const DTYPE: DType;
}

impl Element for u8 {
    const DTYPE: DType = DType::U8;
}

impl Element for i32 {
    const DTYPE: DType = DType::I32;
}
