//! Shape operations: reshape, transpose, permute, contiguous, slice, select, broadcast.

use crate::api::error::{TensorError, TensorResult};
use super::tensor::{Storage, Tensor, TensorShape};
use smallvec::SmallVec;

impl Tensor {
    // ==================== Reshape ====================

    /// Reshape the tensor. Zero-copy if contiguous.
    pub fn reshape(&self, shape: &[usize]) -> TensorResult<Tensor> {
        let current_size: usize = self.shape_sv.iter().product();
        let new_size: usize = shape.iter().product();

        if current_size != new_size {
            return Err(TensorError::ShapeMismatch {
                expected: vec![current_size],
                got: vec![new_size],
            });
        }

        let source = self.contiguous()?;
        Self::view(
            source.data,
            SmallVec::from_slice(shape),
            Self::compute_strides_sv(shape),
        )
    }

    // ==================== Transpose ====================

    /// Transpose two dimensions. Zero-copy via stride swapping.
    pub fn transpose(&self, dim0: i64, dim1: i64) -> TensorResult<Tensor> {
        let dim0_idx = self.normalize_dim(dim0)?;
        let dim1_idx = self.normalize_dim(dim1)?;

        let mut new_shape = self.shape_sv.clone();
        let mut new_strides = self.strides.clone();

        new_shape.swap(dim0_idx, dim1_idx);
        new_strides.swap(dim0_idx, dim1_idx);

        Self::view(self.data.clone(), new_shape, new_strides)
    }

    /// Transpose last two dimensions (convenience for matrix operations).
    pub fn t(&self) -> TensorResult<Tensor> {
        if self.ndim() < 2 {
            return Err(TensorError::InvalidOperation(
                "Cannot transpose tensor with less than 2 dimensions".into(),
            ));
        }
        self.transpose(-2, -1)
    }

    // ==================== Permute ====================

    /// Permute dimensions. Zero-copy via stride reordering.
    ///
    /// `dims[k]` names the source dimension that becomes dimension `k`.
    pub fn permute(&self, dims: &[usize]) -> TensorResult<Tensor> {
        if dims.len() != self.shape_sv.len() {
            return Err(TensorError::InvalidOperation(format!(
                "Permutation must have {} dimensions, got {}",
                self.shape_sv.len(),
                dims.len()
            )));
        }

        let mut seen: SmallVec<[bool; 4]> = SmallVec::from_elem(false, dims.len());
        let mut new_shape = SmallVec::with_capacity(dims.len());
        let mut new_strides = SmallVec::with_capacity(dims.len());

        for &d in dims {
            if d >= self.shape_sv.len() || seen[d] {
                return Err(TensorError::InvalidOperation(format!(
                    "{:?} is not a permutation of {} dimensions",
                    dims,
                    self.shape_sv.len()
                )));
            }
            seen[d] = true;
            new_shape.push(self.shape_sv[d]);
            new_strides.push(self.strides[d]);
        }

        Self::view(self.data.clone(), new_shape, new_strides)
    }

    // ==================== Contiguous ====================

    /// Make tensor contiguous (copy if necessary). Keeps the storage dtype.
    pub fn contiguous(&self) -> TensorResult<Tensor> {
        if self.is_contiguous() {
            return Ok(self.clone());
        }

        let offsets = self.logical_offsets();
        let storage = match self.data.as_ref() {
            Storage::F32(v) => Storage::F32(offsets.iter().map(|&o| v[o]).collect()),
            Storage::F16(v) => Storage::F16(offsets.iter().map(|&o| v[o]).collect()),
            Storage::BF16(v) => Storage::BF16(offsets.iter().map(|&o| v[o]).collect()),
        };

        Ok(Tensor::new(storage, self.shape_sv.clone()))
    }

    /// Storage offsets of every element, in logical (row-major) order.
    fn logical_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.numel());
        if self.numel() == 0 {
            return offsets;
        }
        let ndim = self.ndim();
        let mut indices: TensorShape = smallvec::smallvec![0; ndim];
        let mut offset = 0usize;
        loop {
            offsets.push(offset);
            let mut d = ndim;
            loop {
                if d == 0 {
                    return offsets;
                }
                d -= 1;
                indices[d] += 1;
                offset += self.strides[d];
                if indices[d] < self.shape_sv[d] {
                    break;
                }
                offset -= self.strides[d] * indices[d];
                indices[d] = 0;
            }
        }
    }

    // ==================== Unsqueeze / Squeeze ====================

    /// Add a dimension of size 1 at the specified position.
    pub fn unsqueeze(&self, dim: i64) -> TensorResult<Tensor> {
        let ndim = self.ndim() as i64 + 1;
        let normalized = if dim < 0 { dim + ndim } else { dim };
        if normalized < 0 || normalized > self.ndim() as i64 {
            return Err(TensorError::InvalidDimension {
                dim,
                ndim: self.ndim(),
            });
        }
        let idx = normalized as usize;
        let mut new_dims = self.shape_sv.to_vec();
        new_dims.insert(idx, 1);
        self.reshape(&new_dims)
    }

    /// Remove a dimension of size 1.
    pub fn squeeze(&self, dim: i64) -> TensorResult<Tensor> {
        let dim_idx = self.normalize_dim(dim)?;
        if self.shape_sv[dim_idx] != 1 {
            return Err(TensorError::InvalidOperation(format!(
                "Cannot squeeze dimension {} with size {}",
                dim, self.shape_sv[dim_idx]
            )));
        }
        let mut new_dims = self.shape_sv.to_vec();
        new_dims.remove(dim_idx);
        self.reshape(&new_dims)
    }

    // ==================== Select / Slice ====================

    /// Select a single index along a dimension (reduces dimensionality).
    pub fn select(&self, dim: i64, index: usize) -> TensorResult<Tensor> {
        let dim_idx = self.normalize_dim(dim)?;
        let sliced = self.slice(dim, index, index + 1).map_err(|_| {
            TensorError::IndexOutOfBounds {
                dim: dim_idx,
                index,
                size: self.shape_sv[dim_idx],
            }
        })?;
        sliced.squeeze(dim_idx as i64)
    }

    /// Slice `start..end` along a dimension. Zero-copy for the leading dimension
    /// of a contiguous tensor, otherwise copies.
    pub fn slice(&self, dim: i64, start: usize, end: usize) -> TensorResult<Tensor> {
        let dim_idx = self.normalize_dim(dim)?;
        let dim_size = self.shape_sv[dim_idx];

        if start > end || end > dim_size {
            return Err(TensorError::InvalidSliceRange {
                start,
                end,
                size: dim_size,
            });
        }

        let mut new_shape = self.shape_sv.clone();
        new_shape[dim_idx] = end - start;

        // Narrowing a strided view: walk the source with an offset applied.
        let base = start * self.strides[dim_idx];
        let narrowed = Tensor {
            data: self.data.clone(),
            shape_sv: new_shape.clone(),
            strides: self.strides.clone(),
            device: self.device,
        };
        let offsets = narrowed.logical_offsets();
        let storage = match self.data.as_ref() {
            Storage::F32(v) => Storage::F32(offsets.iter().map(|&o| v[base + o]).collect()),
            Storage::F16(v) => Storage::F16(offsets.iter().map(|&o| v[base + o]).collect()),
            Storage::BF16(v) => Storage::BF16(offsets.iter().map(|&o| v[base + o]).collect()),
        };
        Ok(Tensor::new(storage, new_shape))
    }

    // ==================== Broadcast ====================

    /// Zero-copy broadcast view: stretched dimensions get stride 0.
    pub(crate) fn broadcast_to_shape(&self, target: &TensorShape) -> TensorResult<Tensor> {
        if self.shape_sv.as_slice() == target.as_slice() {
            return Ok(self.clone());
        }

        let err = || TensorError::BroadcastError {
            shape1: self.shape_sv.to_vec(),
            shape2: target.to_vec(),
        };
        if target.len() < self.ndim() {
            return Err(err());
        }

        let offset = target.len() - self.ndim();
        let mut strides: TensorShape = smallvec::smallvec![0; target.len()];
        for i in 0..self.ndim() {
            let (src, dst) = (self.shape_sv[i], target[offset + i]);
            strides[offset + i] = if src == dst {
                self.strides[i]
            } else if src == 1 {
                0
            } else {
                return Err(err());
            };
        }

        Ok(Tensor {
            data: self.data.clone(),
            shape_sv: target.clone(),
            strides,
            device: self.device,
        })
    }
}
