//! Layer normalization over the model dimension.

use crate::api::error::{NnError, NnResult};
use crate::api::traits::Module;
use xformer_core::Tensor;

/// `output = weight * (x - mean) / sqrt(var + eps) + bias` over the last axis.
///
/// Weight starts at ones and bias at zeros, so a fresh layer is a pure
/// standardization.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    pub weight: Tensor,
    pub bias: Tensor,
    eps: f32,
}

impl LayerNorm {
    pub fn new(d_model: usize) -> Self {
        Self::with_eps(d_model, 1e-5)
    }

    pub fn with_eps(d_model: usize, eps: f32) -> Self {
        Self {
            weight: Tensor::ones([d_model]),
            bias: Tensor::zeros([d_model]),
            eps,
        }
    }

    pub fn eps(&self) -> f32 {
        self.eps
    }

    pub fn d_model(&self) -> usize {
        self.weight.numel()
    }

    pub fn forward(&self, x: &Tensor) -> NnResult<Tensor> {
        if x.shape().last() != Some(&self.d_model()) {
            return Err(NnError::ShapeMismatch(format!(
                "layer norm over {} features got input {:?}",
                self.d_model(),
                x.shape()
            )));
        }
        Ok(x.layer_norm(&self.weight, &self.bias, self.eps)?)
    }
}

impl Module for LayerNorm {
    fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.weight, &self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.weight, &mut self.bias]
    }
}
