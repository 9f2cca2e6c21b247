//! # xformer core
//!
//! Tensor backend for the xformer encoder-decoder.
//!
//! This crate provides a strided, reference-counted `Tensor` with the operations
//! a Transformer forward pass needs, plus the `ExecutionContext` that carries
//! device, parameter precision, mode and the seeded random stream through
//! construction and forward calls.
//!
//! ## Features
//!
//! - Zero-copy views (reshape, transpose, permute)
//! - Numpy-style broadcasting for element-wise ops
//! - faer-backed matmul, rayon-parallel softmax and batched matmul
//! - F16/BF16 parameter storage, F32 arithmetic
//!
//! ## Example
//!
//! ```rust
//! use xformer_core::{ExecutionContext, Tensor};
//!
//! let mut ctx = ExecutionContext::new(7);
//! let a = Tensor::randn_with([2, 3], ctx.rng());
//! let b = Tensor::randn_with([3, 4], ctx.rng());
//! let c = a.matmul(&b).unwrap();
//! assert_eq!(c.shape(), &[2, 4]);
//! ```

pub mod api;
mod core;
mod saf;

pub use saf::*;
