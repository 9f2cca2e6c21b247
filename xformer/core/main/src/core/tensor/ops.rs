//! Tensor math operations: matmul, broadcasting arithmetic, softmax, activations, reductions.

use crate::api::error::{TensorError, TensorResult};
use crate::core::shape::Shape;
use super::tensor::{Storage, Tensor, TensorShape};
use rayon::prelude::*;
use smallvec::{smallvec, SmallVec};

/// Rows below this element count are processed sequentially.
const PAR_THRESHOLD: usize = 4096;

#[allow(non_snake_case)]
impl Tensor {
    // ==================== Element-wise binary ops ====================

    /// Element-wise addition with broadcasting.
    pub fn add(&self, other: &Tensor) -> TensorResult<Tensor> {
        self.binary_op(other, |a, b| a + b)
    }

    /// Element-wise multiplication with broadcasting.
    pub fn mul(&self, other: &Tensor) -> TensorResult<Tensor> {
        self.binary_op(other, |a, b| a * b)
    }

    fn binary_op(&self, other: &Tensor, f: impl Fn(f32, f32) -> f32) -> TensorResult<Tensor> {
        if self.shape_sv == other.shape_sv {
            let lhs = self.values();
            let rhs = other.values();
            let out: Vec<f32> = lhs.iter().zip(rhs.iter()).map(|(&a, &b)| f(a, b)).collect();
            return Ok(Tensor::new(Storage::F32(out), self.shape_sv.clone()));
        }

        let out_shape = Shape::new(self.shape_sv.to_vec())
            .broadcast_with(&Shape::new(other.shape_sv.to_vec()))
            .ok_or_else(|| TensorError::BroadcastError {
                shape1: self.shape_sv.to_vec(),
                shape2: other.shape_sv.to_vec(),
            })?;
        let target: TensorShape = SmallVec::from_slice(out_shape.dims());
        let lhs = self.broadcast_to_shape(&target)?;
        let rhs = other.broadcast_to_shape(&target)?;
        let out: Vec<f32> = lhs.iter().zip(rhs.iter()).map(|(a, b)| f(a, b)).collect();
        Ok(Tensor::new(Storage::F32(out), target))
    }

    // ==================== Scalar ops ====================

    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        self.unary_op(|x| x * scalar)
    }

    // ==================== Activations ====================

    pub fn sigmoid(&self) -> Tensor {
        self.unary_op(|x| 1.0 / (1.0 + (-x).exp()))
    }

    pub fn relu(&self) -> Tensor {
        self.unary_op(|x| x.max(0.0))
    }

    /// GELU activation (tanh approximation).
    pub fn gelu(&self) -> Tensor {
        self.unary_op(|x| {
            let sqrt_2_over_pi = (2.0f32 / std::f32::consts::PI).sqrt();
            0.5 * x * (1.0 + (sqrt_2_over_pi * (x + 0.044715 * x.powi(3))).tanh())
        })
    }

    /// SiLU (Swish) activation: x * sigmoid(x).
    pub fn silu(&self) -> Tensor {
        self.unary_op(|x| x / (1.0 + (-x).exp()))
    }

    // ==================== Reductions ====================

    /// Mean along a dimension.
    pub fn mean(&self, dim: i64) -> TensorResult<Tensor> {
        self.reduce(dim, |row| row.iter().sum::<f32>() / row.len() as f32)
    }

    // ==================== Softmax ====================

    /// Softmax along a dimension.
    ///
    /// Entries equal to `-inf` receive zero weight. A row in which every entry
    /// is `-inf` has no admissible position and yields all zeros instead of NaN.
    pub fn softmax(&self, dim: i64) -> TensorResult<Tensor> {
        let dim_idx = self.normalize_dim(dim)?;
        let ndim = self.ndim();

        if dim_idx != ndim - 1 {
            // Move the axis last, normalize, move it back.
            let mut perm: Vec<usize> = (0..ndim).filter(|&d| d != dim_idx).collect();
            perm.push(dim_idx);
            let mut inverse = vec![0usize; ndim];
            for (pos, &d) in perm.iter().enumerate() {
                inverse[d] = pos;
            }
            return self
                .permute(&perm)?
                .softmax(-1)?
                .permute(&inverse)?
                .contiguous();
        }

        let input = self.values();
        let row_len = self.shape_sv[ndim - 1];
        let mut out_data = vec![0.0f32; input.len()];
        if row_len == 0 {
            return Ok(Tensor::new(Storage::F32(out_data), self.shape_sv.clone()));
        }

        let softmax_row = |(out_row, in_row): (&mut [f32], &[f32])| {
            let max_val = in_row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
            if max_val == f32::NEG_INFINITY {
                out_row.fill(0.0);
                return;
            }
            let mut sum_exp = 0.0;
            for (o, &val) in out_row.iter_mut().zip(in_row) {
                *o = (val - max_val).exp();
                sum_exp += *o;
            }
            for o in out_row.iter_mut() {
                *o /= sum_exp;
            }
        };

        if input.len() >= PAR_THRESHOLD {
            out_data
                .par_chunks_mut(row_len)
                .zip(input.par_chunks(row_len))
                .for_each(softmax_row);
        } else {
            out_data
                .chunks_mut(row_len)
                .zip(input.chunks(row_len))
                .for_each(softmax_row);
        }

        Ok(Tensor::new(Storage::F32(out_data), self.shape_sv.clone()))
    }

    // ==================== Layer normalization ====================

    /// LayerNorm over the last dimension (biased variance).
    pub fn layer_norm(&self, weight: &Tensor, bias: &Tensor, eps: f32) -> TensorResult<Tensor> {
        if self.shape_sv.is_empty() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![1],
                got: vec![],
            });
        }
        let last_dim = self.shape_sv[self.shape_sv.len() - 1];

        let input = self.values();
        let gamma = weight.values();
        let beta = bias.values();

        if gamma.len() != last_dim || beta.len() != last_dim {
            return Err(TensorError::ShapeMismatch {
                expected: vec![last_dim],
                got: vec![gamma.len(), beta.len()],
            });
        }

        let mut out_data = Vec::with_capacity(input.len());
        for row in input.chunks(last_dim) {
            let mean = row.iter().sum::<f32>() / last_dim as f32;
            let var = row.iter().map(|&x| (x - mean) * (x - mean)).sum::<f32>() / last_dim as f32;
            let std = (var + eps).sqrt();
            for j in 0..last_dim {
                out_data.push((row[j] - mean) / std * gamma[j] + beta[j]);
            }
        }

        Ok(Tensor::new(Storage::F32(out_data), self.shape_sv.clone()))
    }

    // ==================== Matrix multiplication ====================

    /// Matrix multiplication using faer for 2D, with broadcasting for higher dims.
    pub fn matmul(&self, other: &Tensor) -> TensorResult<Tensor> {
        let ndim = self.shape_sv.len();
        let other_ndim = other.shape_sv.len();

        // Broadcasting: if LHS is >2D and RHS is 2D, collapse batch dims
        if ndim > 2 && other_ndim == 2 {
            let K = self.shape_sv[ndim - 1];
            let M: usize = self.shape_sv[0..ndim - 1].iter().product();
            let K2 = other.shape_sv[0];
            let N = other.shape_sv[1];

            if K != K2 {
                return Err(TensorError::MatmulDimensionMismatch { left: K, right: K2 });
            }

            let lhs_2d = self.reshape(&[M, K])?;
            let out_2d = lhs_2d.matmul(other)?;

            let mut out_shape: SmallVec<[usize; 4]> =
                SmallVec::from_slice(&self.shape_sv[0..ndim - 1]);
            out_shape.push(N);
            return out_2d.reshape(&out_shape);
        }

        // Same-dim batched matmul (e.g. 4D x 4D for attention)
        if ndim == other_ndim && ndim > 2 {
            return self.batched_matmul(other);
        }

        if ndim != 2 || other_ndim != 2 {
            return Err(TensorError::InvalidOperation(format!(
                "matmul requires 2D operands (or >2D x 2D, or same-rank batched), got {:?} x {:?}",
                self.shape(),
                other.shape()
            )));
        }

        let M = self.shape_sv[0];
        let K = self.shape_sv[1];
        let K2 = other.shape_sv[0];
        let N = other.shape_sv[1];

        if K != K2 {
            return Err(TensorError::MatmulDimensionMismatch { left: K, right: K2 });
        }

        let lhs = self.to_f32()?.contiguous()?;
        let rhs = other.to_f32()?.contiguous()?;
        let mut out_data = vec![0.0f32; M * N];
        gemm_row_major(lhs.as_slice_f32()?, rhs.as_slice_f32()?, &mut out_data, M, K, N);

        Ok(Tensor::new(Storage::F32(out_data), smallvec![M, N]))
    }

    /// Batched matrix multiplication: [..., M, K] x [..., K, N] -> [..., M, N].
    pub fn batched_matmul(&self, other: &Tensor) -> TensorResult<Tensor> {
        let ndim = self.shape_sv.len();
        if ndim != other.shape_sv.len() || ndim < 3 {
            return Err(TensorError::InvalidOperation(
                "batched_matmul requires >=3D tensors of same ndim".into(),
            ));
        }

        let batch_dims = ndim - 2;
        if self.shape_sv[0..batch_dims] != other.shape_sv[0..batch_dims] {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape_sv.to_vec(),
                got: other.shape_sv.to_vec(),
            });
        }

        let batch_count: usize = self.shape_sv[0..batch_dims].iter().product();
        let M = self.shape_sv[ndim - 2];
        let K = self.shape_sv[ndim - 1];
        let K2 = other.shape_sv[ndim - 2];
        let N = other.shape_sv[ndim - 1];

        if K != K2 {
            return Err(TensorError::MatmulDimensionMismatch { left: K, right: K2 });
        }

        let mut out_shape: SmallVec<[usize; 4]> =
            SmallVec::from_slice(&self.shape_sv[0..batch_dims]);
        out_shape.push(M);
        out_shape.push(N);

        let mut out_data = vec![0.0f32; batch_count * M * N];
        if out_data.is_empty() || K == 0 {
            return Ok(Tensor::new(Storage::F32(out_data), out_shape));
        }

        let lhs = self.to_f32()?.contiguous()?;
        let rhs = other.to_f32()?.contiguous()?;
        let lhs_data = lhs.as_slice_f32()?;
        let rhs_data = rhs.as_slice_f32()?;

        let work = |((out_chunk, lhs_chunk), rhs_chunk): ((&mut [f32], &[f32]), &[f32])| {
            gemm_row_major(lhs_chunk, rhs_chunk, out_chunk, M, K, N);
        };
        if out_data.len() >= PAR_THRESHOLD {
            out_data
                .par_chunks_mut(M * N)
                .zip(lhs_data.par_chunks(M * K))
                .zip(rhs_data.par_chunks(K * N))
                .for_each(work);
        } else {
            out_data
                .chunks_mut(M * N)
                .zip(lhs_data.chunks(M * K))
                .zip(rhs_data.chunks(K * N))
                .for_each(work);
        }

        Ok(Tensor::new(Storage::F32(out_data), out_shape))
    }

    // ==================== Masked fill ====================

    /// Replace elements where `mask` is nonzero with `value`. The mask broadcasts.
    pub fn masked_fill(&self, mask: &Tensor, value: f32) -> TensorResult<Tensor> {
        let mask = mask.broadcast_to_shape(&self.shape_sv)?;
        let new_data: Vec<f32> = self
            .iter()
            .zip(mask.iter())
            .map(|(v, m)| if m != 0.0 { value } else { v })
            .collect();
        Ok(Tensor::new(Storage::F32(new_data), self.shape_sv.clone()))
    }

    // ==================== Internal helpers ====================

    fn unary_op(&self, f: impl Fn(f32) -> f32) -> Tensor {
        let data: Vec<f32> = self.iter().map(f).collect();
        Tensor::new(Storage::F32(data), self.shape_sv.clone())
    }

    /// Reduce `dim` by applying `f` to each contiguous row along it.
    fn reduce(&self, dim: i64, f: impl Fn(&[f32]) -> f32) -> TensorResult<Tensor> {
        let dim_idx = self.normalize_dim(dim)?;
        let ndim = self.ndim();

        let mut perm: Vec<usize> = (0..ndim).filter(|&d| d != dim_idx).collect();
        perm.push(dim_idx);
        let moved = self.permute(&perm)?.contiguous()?;
        let data = moved.values();

        let dim_size = self.shape_sv[dim_idx];
        let mut new_dims: TensorShape = self.shape_sv.clone();
        new_dims.remove(dim_idx);

        let new_data: Vec<f32> = if dim_size == 0 {
            vec![f(&[]); new_dims.iter().product()]
        } else {
            data.chunks(dim_size).map(&f).collect()
        };
        Ok(Tensor::new(Storage::F32(new_data), new_dims))
    }
}

/// Row-major `out[M,N] = lhs[M,K] * rhs[K,N]`.
///
/// faer is column-major, so this computes C^T = B^T * A^T over the same buffers.
fn gemm_row_major(lhs: &[f32], rhs: &[f32], out: &mut [f32], m: usize, k: usize, n: usize) {
    let a_t: faer::MatRef<'_, f32> = faer::mat::from_column_major_slice(lhs, k, m);
    let b_t: faer::MatRef<'_, f32> = faer::mat::from_column_major_slice(rhs, n, k);
    let mut c_t: faer::MatMut<'_, f32> = faer::mat::from_column_major_slice_mut(out, n, m);
    c_t.copy_from(b_t * a_t);
}
