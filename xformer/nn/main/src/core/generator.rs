//! Projection from the model dimension to vocabulary logits.

use crate::api::error::NnResult;
use crate::api::traits::Module;
use crate::core::linear::Linear;
use xformer_core::{ExecutionContext, Tensor};

/// Per-position linear map to raw, unnormalized logits.
#[derive(Debug)]
pub struct Generator {
    pub projection: Linear,
}

impl Generator {
    pub fn new(vocab_size: usize, d_model: usize, ctx: &mut ExecutionContext) -> NnResult<Self> {
        Ok(Self {
            projection: Linear::new(d_model, vocab_size, ctx)?,
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.projection.out_features
    }

    pub fn forward(&self, x: &Tensor) -> NnResult<Tensor> {
        self.projection.forward(x)
    }
}

impl Module for Generator {
    fn parameters(&self) -> Vec<&Tensor> {
        self.projection.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.projection.parameters_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logits_shape() {
        let mut ctx = ExecutionContext::new(0);
        let generator = Generator::new(10, 8, &mut ctx).unwrap();
        let x = Tensor::randn_with([2, 3, 8], ctx.rng());
        assert_eq!(generator.forward(&x).unwrap().shape(), &[2, 3, 10]);
        assert_eq!(generator.vocab_size(), 10);
    }

    #[test]
    fn test_logits_are_raw() {
        let w = Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0, -1.0, 0.0, 0.0, -1.0], [4, 2]).unwrap();
        let generator = Generator {
            projection: Linear::from_weights(w, None).unwrap(),
        };
        let x = Tensor::from_vec(vec![2.0, 3.0], [1, 1, 2]).unwrap();
        assert_eq!(generator.forward(&x).unwrap().to_vec(), vec![2.0, 3.0, -2.0, -3.0]);
    }
}
