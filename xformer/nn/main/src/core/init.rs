//! Parameter initializers.

use crate::api::error::{NnError, NnResult};
use xformer_core::{ExecutionContext, Tensor};

/// Fan-in and fan-out of a weight laid out `[out, in, receptive...]`.
pub fn fans(shape: &[usize]) -> NnResult<(usize, usize)> {
    if shape.len() < 2 {
        return Err(NnError::InvalidConfig(format!(
            "fan computation needs at least 2 dimensions, got {:?}",
            shape
        )));
    }
    let receptive: usize = shape[2..].iter().product();
    Ok((shape[1] * receptive, shape[0] * receptive))
}

/// Glorot/Xavier uniform: U(-a, a) with a = sqrt(6 / (fan_in + fan_out)).
pub fn xavier_uniform(shape: &[usize], ctx: &mut ExecutionContext) -> NnResult<Tensor> {
    let (fan_in, fan_out) = fans(shape)?;
    if fan_in + fan_out == 0 {
        return Ok(Tensor::zeros(shape.to_vec()));
    }
    let bound = (6.0 / (fan_in + fan_out) as f64).sqrt() as f32;
    Ok(Tensor::uniform_with(shape.to_vec(), -bound, bound, ctx.rng())?)
}
