//! Multi-dtype Tensor with Arc<Storage> backend.

use crate::api::error::{TensorError, TensorResult};
use crate::api::types::{DType, Device};
use crate::core::shape::Shape;
use half::{bf16, f16};
use rand::distributions::Uniform;
use rand::Rng;
use rand_distr::StandardNormal;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Underlying element storage for tensor data.
#[derive(Clone)]
pub enum Storage {
    F32(Vec<f32>),
    F16(Vec<f16>),
    BF16(Vec<bf16>),
}

impl Storage {
    pub fn dtype(&self) -> DType {
        match self {
            Storage::F32(_) => DType::F32,
            Storage::F16(_) => DType::F16,
            Storage::BF16(_) => DType::BF16,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Storage::F32(v) => v.len(),
            Storage::F16(v) => v.len(),
            Storage::BF16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw little-endian bytes in storage order.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Storage::F32(v) => bytemuck::cast_slice(v),
            Storage::F16(v) => bytemuck::cast_slice(v),
            Storage::BF16(v) => bytemuck::cast_slice(v),
        }
    }

    #[inline]
    fn read(&self, offset: usize) -> f32 {
        match self {
            Storage::F32(v) => v[offset],
            Storage::F16(v) => v[offset].to_f32(),
            Storage::BF16(v) => v[offset].to_f32(),
        }
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({} elements)", self.dtype(), self.len())
    }
}

/// Internal shape type: stack-allocated for ≤4 dims.
pub(crate) type TensorShape = SmallVec<[usize; 4]>;

/// A strided multi-dimensional array. Views share storage through `Arc`.
#[derive(Clone)]
pub struct Tensor {
    pub(crate) data: Arc<Storage>,
    pub(crate) shape_sv: TensorShape,
    pub(crate) strides: TensorShape,
    pub(crate) device: Device,
}

impl Tensor {
    // ==================== Low-level constructors ====================

    /// Wrap storage whose length is already known to match `shape`.
    pub(crate) fn new(storage: Storage, shape: TensorShape) -> Self {
        let strides = Self::compute_strides_sv(&shape);
        Self {
            data: Arc::new(storage),
            shape_sv: shape,
            strides,
            device: Device::Cpu,
        }
    }

    /// Create a view with new shape/strides over existing data.
    pub(crate) fn view(
        data: Arc<Storage>,
        shape: TensorShape,
        strides: TensorShape,
    ) -> TensorResult<Self> {
        if shape.iter().all(|&d| d > 0) && !shape.is_empty() {
            let max_offset: usize = shape
                .iter()
                .zip(strides.iter())
                .map(|(&d, &s)| (d - 1) * s)
                .sum();
            if max_offset >= data.len() {
                return Err(TensorError::IndexOutOfBounds {
                    dim: 0,
                    index: max_offset,
                    size: data.len(),
                });
            }
        }
        Ok(Self {
            data,
            shape_sv: shape,
            strides,
            device: Device::Cpu,
        })
    }

    /// Create a tensor from storage, checking the element count.
    pub fn from_storage(storage: Storage, shape: impl Into<Shape>) -> TensorResult<Self> {
        let shape = shape.into();
        if storage.len() != shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: shape.dims().to_vec(),
                got: vec![storage.len()],
            });
        }
        Ok(Self::new(storage, SmallVec::from_slice(shape.dims())))
    }

    // ==================== High-level constructors (f32) ====================

    /// Create a tensor from an f32 vector with the given shape.
    pub fn from_vec(data: Vec<f32>, shape: impl Into<Shape>) -> TensorResult<Self> {
        Self::from_storage(Storage::F32(data), shape)
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: impl Into<Shape>) -> Self {
        Self::filled(shape, 0.0)
    }

    /// Create a tensor filled with ones.
    pub fn ones(shape: impl Into<Shape>) -> Self {
        Self::filled(shape, 1.0)
    }

    fn filled(shape: impl Into<Shape>, value: f32) -> Self {
        let shape = shape.into();
        Self::new(
            Storage::F32(vec![value; shape.numel()]),
            SmallVec::from_slice(shape.dims()),
        )
    }

    /// Standard normal samples drawn from `rng`.
    pub fn randn_with<R: Rng + ?Sized>(shape: impl Into<Shape>, rng: &mut R) -> Self {
        let shape = shape.into();
        let data: Vec<f32> = (0..shape.numel())
            .map(|_| rng.sample::<f32, _>(StandardNormal))
            .collect();
        Self::new(Storage::F32(data), SmallVec::from_slice(shape.dims()))
    }

    /// Uniform samples in `[low, high)` drawn from `rng`.
    pub fn uniform_with<R: Rng + ?Sized>(
        shape: impl Into<Shape>,
        low: f32,
        high: f32,
        rng: &mut R,
    ) -> TensorResult<Self> {
        if !(low < high) {
            return Err(TensorError::InvalidOperation(format!(
                "uniform range [{}, {}) is empty",
                low, high
            )));
        }
        let shape = shape.into();
        let dist = Uniform::new(low, high);
        let data: Vec<f32> = (0..shape.numel()).map(|_| rng.sample(dist)).collect();
        Ok(Self::new(Storage::F32(data), SmallVec::from_slice(shape.dims())))
    }

    /// Create a lower triangular matrix of ones.
    pub fn tril(size: usize) -> Self {
        let mut data = vec![0.0f32; size * size];
        for i in 0..size {
            for j in 0..=i {
                data[i * size + j] = 1.0;
            }
        }
        Self::new(Storage::F32(data), SmallVec::from_slice(&[size, size]))
    }

    // ==================== Properties ====================

    /// Get the shape as a slice.
    pub fn shape(&self) -> &[usize] {
        &self.shape_sv
    }

    /// Get the number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape_sv.len()
    }

    /// Get the total number of elements.
    pub fn numel(&self) -> usize {
        self.shape_sv.iter().product()
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Check if tensor is contiguous in memory.
    pub fn is_contiguous(&self) -> bool {
        self.strides == Self::compute_strides_sv(&self.shape_sv)
    }

    /// Borrow the f32 data of a contiguous F32 tensor.
    pub fn as_slice_f32(&self) -> TensorResult<&[f32]> {
        match self.data.as_ref() {
            Storage::F32(v) if self.is_contiguous() => Ok(&v[..self.numel()]),
            Storage::F32(_) => Err(TensorError::InvalidOperation(
                "as_slice_f32 on a non-contiguous view; call contiguous() first".into(),
            )),
            other => Err(TensorError::DTypeMismatch {
                expected: DType::F32,
                got: other.dtype(),
            }),
        }
    }

    /// Logical-order f32 values, borrowed when no copy is required.
    pub fn values(&self) -> Cow<'_, [f32]> {
        match self.as_slice_f32() {
            Ok(slice) => Cow::Borrowed(slice),
            Err(_) => Cow::Owned(self.iter().collect()),
        }
    }

    /// Raw storage bytes. Only meaningful in logical order for contiguous tensors.
    pub fn as_raw_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    /// Convert to a Vec<f32> in logical order.
    pub fn to_vec(&self) -> Vec<f32> {
        self.values().into_owned()
    }

    /// Iterate over all elements as f32.
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        TensorIterator::new(self)
    }

    /// Widen to a contiguous F32 tensor. Cheap for tensors that already are.
    pub fn to_f32(&self) -> TensorResult<Tensor> {
        if self.dtype() == DType::F32 {
            return Ok(self.clone());
        }
        Tensor::from_vec(self.iter().collect(), self.shape_sv.to_vec())
    }

    /// Convert element storage to `dtype`, rounding when narrowing.
    pub fn to_dtype(&self, dtype: DType) -> TensorResult<Tensor> {
        if self.dtype() == dtype {
            return Ok(self.clone());
        }
        let storage = match dtype {
            DType::F32 => Storage::F32(self.iter().collect()),
            DType::F16 => Storage::F16(self.iter().map(f16::from_f32).collect()),
            DType::BF16 => Storage::BF16(self.iter().map(bf16::from_f32).collect()),
        };
        Ok(Self::new(storage, self.shape_sv.clone()))
    }

    // ==================== Indexing ====================

    /// Get a single element by indices (as f32).
    pub fn get(&self, indices: &[usize]) -> TensorResult<f32> {
        if indices.len() != self.ndim() {
            return Err(TensorError::InvalidOperation(format!(
                "Expected {} indices, got {}",
                self.ndim(),
                indices.len()
            )));
        }
        let mut offset = 0usize;
        for (i, &idx) in indices.iter().enumerate() {
            if idx >= self.shape_sv[i] {
                return Err(TensorError::IndexOutOfBounds {
                    dim: i,
                    index: idx,
                    size: self.shape_sv[i],
                });
            }
            offset += idx * self.strides[i];
        }
        Ok(self.data.read(offset))
    }

    /// Element-wise comparison within an absolute tolerance.
    pub fn allclose(&self, other: &Tensor, tol: f32) -> bool {
        self.shape() == other.shape()
            && self
                .iter()
                .zip(other.iter())
                .all(|(a, b)| (a - b).abs() <= tol || (a.is_infinite() && a == b))
    }

    // ==================== Internal helpers ====================

    pub(crate) fn compute_strides_sv(shape: &[usize]) -> TensorShape {
        if shape.is_empty() {
            return SmallVec::new();
        }
        let mut strides = smallvec::smallvec![1usize; shape.len()];
        for i in (0..shape.len() - 1).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    pub(crate) fn normalize_dim(&self, dim: i64) -> TensorResult<usize> {
        let ndim = self.ndim() as i64;
        let normalized = if dim < 0 { dim + ndim } else { dim };
        if normalized >= 0 && normalized < ndim {
            Ok(normalized as usize)
        } else {
            Err(TensorError::InvalidDimension {
                dim,
                ndim: self.ndim(),
            })
        }
    }
}

// ==================== Tensor Iterator ====================

struct TensorIterator<'a> {
    tensor: &'a Tensor,
    indices: SmallVec<[usize; 4]>,
    offset: usize,
    done: bool,
}

impl<'a> TensorIterator<'a> {
    fn new(tensor: &'a Tensor) -> Self {
        Self {
            tensor,
            indices: smallvec::smallvec![0; tensor.ndim()],
            offset: 0,
            done: tensor.numel() == 0,
        }
    }

    fn advance(&mut self) {
        let shape = &self.tensor.shape_sv;
        let strides = &self.tensor.strides;
        for i in (0..self.indices.len()).rev() {
            self.indices[i] += 1;
            self.offset += strides[i];
            if self.indices[i] < shape[i] {
                return;
            }
            self.offset -= strides[i] * self.indices[i];
            self.indices[i] = 0;
        }
        self.done = true;
    }
}

impl Iterator for TensorIterator<'_> {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let val = self.tensor.data.read(self.offset);
        self.advance();
        Some(val)
    }
}

// ==================== Display ====================

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor(shape={:?}, dtype={:?}, device={:?})",
            self.shape_sv.as_slice(),
            self.dtype(),
            self.device
        )
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = Shape::new(self.shape_sv.to_vec());
        if self.numel() <= 100 {
            write!(f, "Tensor({}, {:?})", shape, self.to_vec())
        } else {
            let v = self.to_vec();
            let n = v.len();
            write!(
                f,
                "Tensor({}, [{:.4}, {:.4}, ..., {:.4}, {:.4}])",
                shape,
                v[0],
                v[1],
                v[n - 2],
                v[n - 1]
            )
        }
    }
}

// ==================== Tests ====================
