//! Linear layer: y = xW^T + b

use crate::api::error::{NnError, NnResult};
use crate::api::traits::Module;
use crate::core::init::xavier_uniform;
use xformer_core::{ExecutionContext, Tensor};

/// A fully connected linear layer.
///
/// Weights may be stored in any precision; forward widens them to f32.
#[derive(Debug, Clone)]
pub struct Linear {
    /// Weight matrix [out_features, in_features]
    pub weight: Tensor,
    /// Optional bias vector [out_features]
    pub bias: Option<Tensor>,
    pub in_features: usize,
    pub out_features: usize,
}

impl Linear {
    /// Linear layer with bias, Xavier-uniform weights and zero bias.
    pub fn new(in_features: usize, out_features: usize, ctx: &mut ExecutionContext) -> NnResult<Self> {
        Self::with_bias(in_features, out_features, true, ctx)
    }

    pub fn with_bias(
        in_features: usize,
        out_features: usize,
        use_bias: bool,
        ctx: &mut ExecutionContext,
    ) -> NnResult<Self> {
        if in_features == 0 || out_features == 0 {
            return Err(NnError::InvalidConfig(format!(
                "linear layer dimensions must be > 0, got {} -> {}",
                in_features, out_features
            )));
        }
        let weight = xavier_uniform(&[out_features, in_features], ctx)?;
        let bias = if use_bias {
            Some(Tensor::zeros(vec![out_features]))
        } else {
            None
        };

        Ok(Self {
            weight,
            bias,
            in_features,
            out_features,
        })
    }

    /// Create a linear layer from existing weights
    pub fn from_weights(weight: Tensor, bias: Option<Tensor>) -> NnResult<Self> {
        let shape = weight.shape();
        if shape.len() != 2 {
            return Err(NnError::InvalidConfig("Weight must be 2D".into()));
        }
        let out_features = shape[0];
        let in_features = shape[1];

        if let Some(ref b) = bias {
            if b.shape() != [out_features] {
                return Err(NnError::ShapeMismatch(format!(
                    "Bias shape {:?} doesn't match out_features {}",
                    b.shape(),
                    out_features
                )));
            }
        }

        Ok(Self {
            weight,
            bias,
            in_features,
            out_features,
        })
    }

    /// Forward pass.
    ///
    /// Input shape: [..., in_features]
    /// Output shape: [..., out_features]
    pub fn forward(&self, x: &Tensor) -> NnResult<Tensor> {
        if x.shape().last() != Some(&self.in_features) {
            return Err(NnError::ShapeMismatch(format!(
                "linear expects last dimension {}, got input {:?}",
                self.in_features,
                x.shape()
            )));
        }
        let weight_t = self.weight.to_f32()?.t()?;
        let output = x.matmul(&weight_t)?;

        match self.bias {
            Some(ref bias) => Ok(output.add(&bias.to_f32()?)?),
            None => Ok(output),
        }
    }
}

impl Module for Linear {
    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = vec![&self.weight];
        params.extend(self.bias.as_ref());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = vec![&mut self.weight];
        params.extend(self.bias.as_mut());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_forward() {
        let mut ctx = ExecutionContext::new(0);
        let linear = Linear::new(4, 8, &mut ctx).unwrap();
        let x = Tensor::randn_with([2, 3, 4], ctx.rng());
        let y = linear.forward(&x).unwrap();
        assert_eq!(y.shape(), &[2, 3, 8]);
    }

    #[test]
    fn test_linear_no_bias() {
        let mut ctx = ExecutionContext::new(0);
        let linear = Linear::with_bias(4, 8, false, &mut ctx).unwrap();
        assert!(linear.bias.is_none());
        let x = Tensor::randn_with([2, 4], ctx.rng());
        let y = linear.forward(&x).unwrap();
        assert_eq!(y.shape(), &[2, 8]);
    }

    #[test]
    fn test_linear_known_values() {
        let w = Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], [3, 2]).unwrap();
        let b = Tensor::from_vec(vec![0.5, -0.5, 0.0], [3]).unwrap();
        let linear = Linear::from_weights(w, Some(b)).unwrap();
        let x = Tensor::from_vec(vec![2.0, 3.0], [1, 2]).unwrap();
        assert_eq!(linear.forward(&x).unwrap().to_vec(), vec![2.5, 2.5, 5.0]);
    }

    #[test]
    fn test_linear_wrong_input_width() {
        let mut ctx = ExecutionContext::new(0);
        let linear = Linear::new(4, 8, &mut ctx).unwrap();
        let x = Tensor::zeros([2, 5]);
        assert!(matches!(linear.forward(&x), Err(NnError::ShapeMismatch(_))));
    }

    #[test]
    fn test_linear_bias_shape_checked() {
        let w = Tensor::zeros([3, 2]);
        let b = Tensor::zeros([2]);
        assert!(Linear::from_weights(w, Some(b)).is_err());
    }

    #[test]
    fn test_linear_parameter_count() {
        let mut ctx = ExecutionContext::new(0);
        let linear = Linear::new(4, 8, &mut ctx).unwrap();
        assert_eq!(linear.parameter_count(), 4 * 8 + 8);
        let linear_nb = Linear::with_bias(4, 8, false, &mut ctx).unwrap();
        assert_eq!(linear_nb.parameter_count(), 4 * 8);
    }
}
