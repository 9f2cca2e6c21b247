//! # xformer nn
//!
//! Encoder-decoder Transformer layers over seq-first tensors.
//!
//! This crate provides:
//! - Sinusoidal and learned positional encodings with scaled token embeddings
//! - Multi-head attention with `[1 | lq, lk, 1 | batch]` masks
//! - Plain and gated feed-forward sublayers
//! - Pre-norm layers, encoder/decoder stacks and the vocabulary generator
//! - `EncoderDecoder`, built from a `TransformerConfig`
//!
//! All tensors are `[seq_len, batch, d_model]`; token tensors are
//! `[seq_len, batch]` holding integral values.
//!
//! ## Example
//!
//! ```rust
//! use xformer_core::ExecutionContext;
//! use xformer_nn::{subsequent_mask, tokens_from_ids, EncoderDecoder, TransformerConfig};
//!
//! let config = TransformerConfig {
//!     model_dim: 8,
//!     heads: 2,
//!     ff_dim: 16,
//!     n_layers: 1,
//!     vocab_size_src: 10,
//!     vocab_size_tgt: 10,
//!     ..TransformerConfig::default()
//! };
//! let mut ctx = ExecutionContext::new(42);
//! let model = EncoderDecoder::from_config(&config, &mut ctx).unwrap();
//!
//! let src = tokens_from_ids(&[1, 2, 3]).unwrap();
//! let tgt = tokens_from_ids(&[4, 5]).unwrap();
//! let tgt_mask = subsequent_mask(2).unwrap();
//! let logits = model.forward(&src, &tgt, None, Some(&tgt_mask), &mut ctx).unwrap();
//! assert_eq!(logits.shape(), &[2, 1, 10]);
//! ```

pub mod api;
mod core;
mod saf;

pub use saf::*;
