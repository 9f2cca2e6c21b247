//! Token embedding lookup and the scaled, position-encoded front end.

use std::time::Instant;
use crate::api::error::{NnError, NnResult};
use crate::api::traits::Module;
use crate::core::positional_encoding::PositionalEncoding;
use xformer_core::{ExecutionContext, Tensor};

/// Embedding layer that maps token indices to dense vectors
#[derive(Debug, Clone)]
pub struct Embedding {
    /// Embedding weight matrix [num_embeddings, embedding_dim]
    pub weight: Tensor,
    /// Number of embeddings (vocabulary size)
    pub num_embeddings: usize,
    /// Embedding dimension
    pub embedding_dim: usize,
}

impl Embedding {
    /// Standard normal initialization.
    pub fn new(num_embeddings: usize, embedding_dim: usize, ctx: &mut ExecutionContext) -> Self {
        let weight = Tensor::randn_with([num_embeddings, embedding_dim], ctx.rng());

        Self {
            weight,
            num_embeddings,
            embedding_dim,
        }
    }

    /// Create an embedding layer from existing weights
    pub fn from_weights(weight: Tensor) -> NnResult<Self> {
        let shape = weight.shape();
        if shape.len() != 2 {
            return Err(NnError::InvalidConfig(
                "Embedding weight must be 2D".into(),
            ));
        }

        Ok(Self {
            num_embeddings: shape[0],
            embedding_dim: shape[1],
            weight,
        })
    }

    /// Lookup embeddings for input indices.
    ///
    /// Input shape: [...] (integral values stored as f32)
    /// Output shape: [..., embedding_dim]
    pub fn forward(&self, indices: &Tensor) -> NnResult<Tensor> {
        let table = self.weight.to_f32()?.contiguous()?;
        let rows = table.as_slice_f32()?;
        let dim = self.embedding_dim;

        let mut output_data = Vec::with_capacity(indices.numel() * dim);
        for value in indices.iter() {
            if value.fract() != 0.0 || value < 0.0 || value >= self.num_embeddings as f32 {
                return Err(NnError::InvalidToken {
                    value,
                    vocab_size: self.num_embeddings,
                });
            }
            let idx = value as usize;
            output_data.extend_from_slice(&rows[idx * dim..(idx + 1) * dim]);
        }

        let mut output_shape = indices.shape().to_vec();
        output_shape.push(dim);
        Ok(Tensor::from_vec(output_data, output_shape)?)
    }
}

impl Module for Embedding {
    fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.weight]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.weight]
    }
}

/// `lookup(tokens) * sqrt(d_model) + positional[..seq_len]`.
#[derive(Debug, Clone)]
pub struct Embeddings {
    pub lookup: Embedding,
    pub positional: PositionalEncoding,
    d_model: usize,
}

impl Embeddings {
    pub fn new(
        d_model: usize,
        vocab_size: usize,
        max_len: usize,
        learned_positional: bool,
        ctx: &mut ExecutionContext,
    ) -> NnResult<Self> {
        if d_model == 0 || vocab_size == 0 || max_len == 0 {
            return Err(NnError::InvalidConfig(format!(
                "embeddings need non-zero sizes, got d_model={} vocab={} max_len={}",
                d_model, vocab_size, max_len
            )));
        }
        let positional = if learned_positional {
            PositionalEncoding::learned(d_model, max_len)
        } else {
            PositionalEncoding::sinusoidal(d_model, max_len)?
        };
        Ok(Self {
            lookup: Embedding::new(vocab_size, d_model, ctx),
            positional,
            d_model,
        })
    }

    pub fn d_model(&self) -> usize {
        self.d_model
    }

    pub fn vocab_size(&self) -> usize {
        self.lookup.num_embeddings
    }

    pub fn max_len(&self) -> usize {
        self.positional.max_len()
    }

    /// Tokens `[seq_len, batch]` to embeddings `[seq_len, batch, d_model]`.
    pub fn forward(&self, tokens: &Tensor) -> NnResult<Tensor> {
        let _t = if log::log_enabled!(log::Level::Trace) { Some(Instant::now()) } else { None };

        let shape = tokens.shape();
        if shape.len() != 2 || shape[0] == 0 || shape[1] == 0 {
            return Err(NnError::ShapeMismatch(format!(
                "token tensor must be [seq_len >= 1, batch >= 1], got {:?}",
                shape
            )));
        }
        let seq_len = shape[0];
        let pe = self.positional.forward(seq_len)?;

        let result = self
            .lookup
            .forward(tokens)?
            .mul_scalar((self.d_model as f32).sqrt())
            .add(&pe)?;

        if let Some(t) = _t {
            log::trace!("[perf] embeddings::forward {:?}->{:?} {:.3}ms",
                shape, result.shape(), t.elapsed().as_secs_f64() * 1000.0);
        }
        Ok(result)
    }
}

impl Module for Embeddings {
    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = self.lookup.parameters();
        params.extend(self.positional.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = self.lookup.parameters_mut();
        params.extend(self.positional.parameters_mut());
        params
    }
}
