//! Error types for neural network operations

use xformer_core::TensorError;
use thiserror::Error;

/// Result type for neural network operations
pub type NnResult<T> = Result<T, NnError>;

/// Errors that can occur while building or running the network.
///
/// Configuration problems surface from constructors; shape and mask contract
/// violations surface from the forward call that hit them.
#[derive(Error, Debug)]
pub enum NnError {
    #[error("Tensor error: {0}")]
    TensorError(#[from] TensorError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Sequence length {actual} exceeds positional encoding capacity {max}")]
    SequenceLengthExceeded { max: usize, actual: usize },

    #[error("Mask shape {got:?} rejected by {stage}: expected {expected}")]
    MaskShape {
        stage: &'static str,
        expected: String,
        got: Vec<usize>,
    },

    #[error("Encoder layer received memory but has no cross-attention")]
    UnexpectedMemory,

    #[error("Token value {value} is not a valid index for a vocabulary of {vocab_size}")]
    InvalidToken { value: f32, vocab_size: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),
}
