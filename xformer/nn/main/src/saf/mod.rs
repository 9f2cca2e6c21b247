//! Facade re-exports for xformer-nn

pub use crate::api::config::TransformerConfig;
pub use crate::api::error::*;
pub use crate::api::traits::*;
pub use crate::api::types::*;
pub use crate::core::attention::MultiHeadAttention;
pub use crate::core::dropout::Dropout;
pub use crate::core::embedding::{Embedding, Embeddings};
pub use crate::core::feed_forward::FeedForward;
pub use crate::core::generator::Generator;
pub use crate::core::init::xavier_uniform;
pub use crate::core::layer_norm::LayerNorm;
pub use crate::core::linear::Linear;
pub use crate::core::mask::{batch_tokens, combine_masks, padding_mask, subsequent_mask, tokens_from_ids};
pub use crate::core::model::EncoderDecoder;
pub use crate::core::positional_encoding::{sinusoidal_table, PositionalEncoding};
pub use crate::core::stack::{Decoder, Encoder};
pub use crate::core::transformer_layer::{LayerKind, TransformerLayer};
