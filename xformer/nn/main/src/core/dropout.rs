//! Inverted dropout driven by the context's random stream.

use crate::api::error::{NnError, NnResult};
use rand::Rng;
use xformer_core::{ExecutionContext, Tensor};

/// Zeroes each element with probability `p` during training and scales the
/// survivors by `1 / (1 - p)`. Identity in inference mode.
#[derive(Debug, Clone, Copy)]
pub struct Dropout {
    p: f32,
}

impl Dropout {
    pub fn new(p: f32) -> NnResult<Self> {
        if !(0.0..1.0).contains(&p) {
            return Err(NnError::InvalidConfig(format!(
                "dropout probability ({}) must be in [0, 1)",
                p
            )));
        }
        Ok(Self { p })
    }

    pub fn p(&self) -> f32 {
        self.p
    }

    pub fn forward(&self, x: &Tensor, ctx: &mut ExecutionContext) -> NnResult<Tensor> {
        if !ctx.is_training() || self.p == 0.0 {
            return Ok(x.clone());
        }
        let scale = 1.0 / (1.0 - self.p);
        let rng = ctx.rng();
        let data: Vec<f32> = x
            .iter()
            .map(|v| if rng.r#gen::<f32>() < self.p { 0.0 } else { v * scale })
            .collect();
        Ok(Tensor::from_vec(data, x.shape().to_vec())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_out_of_range() {
        assert!(Dropout::new(1.0).is_err());
        assert!(Dropout::new(-0.5).is_err());
        assert!(Dropout::new(f32::NAN).is_err());
    }

    #[test]
    fn test_identity_in_inference() {
        let mut ctx = ExecutionContext::inference(0);
        let d = Dropout::new(0.9).unwrap();
        let x = Tensor::ones([4, 4]);
        assert_eq!(d.forward(&x, &mut ctx).unwrap().to_vec(), x.to_vec());
    }

    #[test]
    fn test_training_scales_survivors() {
        let mut ctx = ExecutionContext::training(5);
        let d = Dropout::new(0.5).unwrap();
        let y = d.forward(&Tensor::ones([64, 64]), &mut ctx).unwrap();
        assert!(y.iter().all(|v| v == 0.0 || (v - 2.0).abs() < 1e-6));
        let zeros = y.iter().filter(|&v| v == 0.0).count();
        assert!(zeros > 1500 && zeros < 2600);
    }

    #[test]
    fn test_training_is_seeded() {
        let d = Dropout::new(0.3).unwrap();
        let x = Tensor::ones([8, 8]);
        let a = d.forward(&x, &mut ExecutionContext::training(9)).unwrap();
        let b = d.forward(&x, &mut ExecutionContext::training(9)).unwrap();
        assert_eq!(a.to_vec(), b.to_vec());
    }
}
