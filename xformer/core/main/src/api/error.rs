//! Error types for tensor operations

use crate::api::types::DType;
use thiserror::Error;

/// Result type for tensor operations
pub type TensorResult<T> = Result<T, TensorError>;

/// Errors that can occur in tensor operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("Index {index} out of bounds for dimension {dim} with size {size}")]
    IndexOutOfBounds { dim: usize, index: usize, size: usize },

    #[error("Invalid slice range {start}..{end} for dimension of size {size}")]
    InvalidSliceRange { start: usize, end: usize, size: usize },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid dimension {dim} for tensor with {ndim} dimensions")]
    InvalidDimension { dim: i64, ndim: usize },

    #[error("Cannot broadcast shapes {shape1:?} and {shape2:?}")]
    BroadcastError { shape1: Vec<usize>, shape2: Vec<usize> },

    #[error("Matmul dimension mismatch: left inner dim {left}, right inner dim {right}")]
    MatmulDimensionMismatch { left: usize, right: usize },

    #[error("DType mismatch: expected {expected:?}, got {got:?}")]
    DTypeMismatch { expected: DType, got: DType },
}
