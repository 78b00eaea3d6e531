use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::buffer::{Buffer, BufferMut, Layout};
use crate::dtype::{DType, Element};
use crate::error::KoreError;
use crate::interval::Interval;
use crate::quant::QuantizationInfo;
use crate::shape::Shape;
use crate::storage::Storage;
use crate::Result;

/// Shared handle to a tensor. Operators hold these for their inputs and
/// output; the graph builder owns the tensors.
pub type TensorPtr = Arc<Tensor>;

/// A named, quantized, strided view over shared storage.
///
/// Tensors support:
/// - `u8` activations/weights and `i32` biases and index tensors
/// - Arbitrary per-dimension mins, so a tensor may cover `[-1, 6]` in x
/// - Aliasing: several tensors may view one [`Storage`]
///
/// # Examples
///
/// ```
/// use kore_core::{QuantizationInfo, Tensor};
///
/// let t = Tensor::from_u8("x", &[2, 2], &[1, 2, 3, 4], QuantizationInfo::new(0.5, 0)).unwrap();
/// assert_eq!(t.rank(), 2);
/// assert_eq!(t.get::<u8>(&[1, 1]).unwrap(), 4);
/// ```
#[derive(Clone)]
pub struct Tensor {
    name: String,
    dtype: DType,
    quantization: QuantizationInfo,
    storage: Storage,
    layout: Layout,
}

impl Tensor {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Zero-filled dense tensor with all mins at 0.
    pub fn new(
        name: impl Into<String>,
        dtype: DType,
        extents: &[i32],
        quantization: QuantizationInfo,
    ) -> Self {
        let bounds: SmallVec<[Interval; 6]> =
            extents.iter().map(|&e| Interval::from_extent(e)).collect();
        Self::with_bounds(name, dtype, &bounds, quantization)
    }

    /// Zero-filled dense tensor covering `bounds`.
    pub fn with_bounds(
        name: impl Into<String>,
        dtype: DType,
        bounds: &[Interval],
        quantization: QuantizationInfo,
    ) -> Self {
        let layout = Layout::dense(bounds, dtype.element_size(), 0);
        let storage = Storage::zeros(dtype.storage_bytes(layout.num_elements()));
        Self {
            name: name.into(),
            dtype,
            quantization,
            storage,
            layout,
        }
    }

    /// Dense `u8` tensor filled from `data` (dimension 0 fastest).
    pub fn from_u8(
        name: impl Into<String>,
        extents: &[i32],
        data: &[u8],
        quantization: QuantizationInfo,
    ) -> Result<Self> {
        let t = Self::new(name, DType::U8, extents, quantization);
        t.copy_from_slice(data)?;
        Ok(t)
    }

    /// Dense `i32` tensor filled from `data` (dimension 0 fastest).
    pub fn from_i32(
        name: impl Into<String>,
        extents: &[i32],
        data: &[i32],
        quantization: QuantizationInfo,
    ) -> Result<Self> {
        let t = Self::new(name, DType::I32, extents, quantization);
        t.copy_from_slice(data)?;
        Ok(t)
    }

    /// View an existing storage through `layout`.
    pub fn view(
        name: impl Into<String>,
        dtype: DType,
        quantization: QuantizationInfo,
        storage: Storage,
        layout: Layout,
    ) -> Result<Self> {
        if layout.elem_size() != dtype.element_size() {
            return Err(KoreError::StorageError(format!(
                "{dtype} tensor with {}-byte layout",
                layout.elem_size()
            )));
        }
        if layout.end() > storage.nbytes() {
            return Err(KoreError::StorageError(format!(
                "layout ends at byte {} of a {}-byte storage",
                layout.end(),
                storage.nbytes()
            )));
        }
        Ok(Self {
            name: name.into(),
            dtype,
            quantization,
            storage,
            layout,
        })
    }

    pub fn into_ptr(self) -> TensorPtr {
        Arc::new(self)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn quantization(&self) -> &QuantizationInfo {
        &self.quantization
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn shape(&self) -> &Shape {
        self.layout.shape()
    }

    pub fn rank(&self) -> usize {
        self.layout.rank()
    }

    pub fn extent(&self, d: usize) -> i32 {
        self.layout.dim(d).extent
    }

    pub fn bounds(&self, d: usize) -> Interval {
        self.layout.dim(d).interval()
    }

    pub fn bounds_all(&self) -> SmallVec<[Interval; 6]> {
        self.layout.shape().bounds()
    }

    pub fn numel(&self) -> usize {
        self.layout.num_elements()
    }

    /// Whether both tensors address overlapping bytes of one storage.
    pub fn is_alias(&self, other: &Tensor) -> bool {
        Storage::same(&self.storage, &other.storage) && self.layout.overlaps(&other.layout)
    }

    // =========================================================================
    // Element access (tests and graph builders)
    // =========================================================================

    fn check_dtype<T: Element>(&self) -> Result<()> {
        if T::DTYPE != self.dtype {
            return Err(KoreError::DTypeMismatch {
                expected: self.dtype,
                got: T::DTYPE,
            });
        }
        Ok(())
    }

    pub fn get<T: Element>(&self, coords: &[i32]) -> Result<T> {
        self.check_dtype::<T>()?;
        if !self.shape().contains(coords) {
            return Err(KoreError::ShapeMismatch {
                expected: self.bounds_all().iter().map(|b| b.extent() as i64).collect(),
                got: coords.iter().map(|&c| c as i64).collect(),
            });
        }
        let bytes = self.storage.read();
        Ok(Buffer::<T>::new(&bytes, self.layout.clone())?.get(coords))
    }

    pub fn set<T: Element>(&self, coords: &[i32], value: T) -> Result<()> {
        self.check_dtype::<T>()?;
        if !self.shape().contains(coords) {
            return Err(KoreError::ShapeMismatch {
                expected: self.bounds_all().iter().map(|b| b.extent() as i64).collect(),
                got: coords.iter().map(|&c| c as i64).collect(),
            });
        }
        let mut bytes = self.storage.write();
        BufferMut::<T>::new(&mut bytes, self.layout.clone())?.set(coords, value);
        Ok(())
    }

    /// Elements in coordinate order, dimension 0 fastest.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.check_dtype::<T>()?;
        let bytes = self.storage.read();
        Ok(Buffer::<T>::new(&bytes, self.layout.clone())?.to_vec())
    }

    /// Overwrite every element, in coordinate order.
    pub fn copy_from_slice<T: Element>(&self, data: &[T]) -> Result<()> {
        self.check_dtype::<T>()?;
        if data.len() != self.numel() {
            return Err(KoreError::ShapeMismatch {
                expected: vec![self.numel() as i64],
                got: vec![data.len() as i64],
            });
        }
        let mut bytes = self.storage.write();
        let mut buf = BufferMut::<T>::new(&mut bytes, self.layout.clone())?;
        let mut it = data.iter();
        buf.fill_with(|_| it.next().copied().unwrap_or_default());
        Ok(())
    }

    /// Set every element to `value`.
    pub fn fill<T: Element>(&self, value: T) -> Result<()> {
        self.check_dtype::<T>()?;
        let mut bytes = self.storage.write();
        BufferMut::<T>::new(&mut bytes, self.layout.clone())?.fill_with(|_| value);
        Ok(())
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("name", &self.name)
            .field("dtype", &self.dtype)
            .field("shape", self.layout.shape())
            .field("quantization", &self.quantization)
            .finish()
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}{}", self.name, self.dtype, self.layout.shape())
    }
}
