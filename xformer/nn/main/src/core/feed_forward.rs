//! Position-wise feed-forward sublayer, optionally gated.

use crate::api::error::{NnError, NnResult};
use crate::api::traits::Module;
use crate::api::types::{Activation, FeedForwardBias};
use crate::core::dropout::Dropout;
use crate::core::linear::Linear;
use std::time::Instant;
use xformer_core::{ExecutionContext, Tensor};

/// `layer2(dropout(act(layer1(x)) [* linear_v(x)]))`
///
/// The gate branch is unactivated and exists only when the sublayer was built
/// gated.
#[derive(Debug)]
pub struct FeedForward {
    pub layer1: Linear,
    pub layer2: Linear,
    pub linear_v: Option<Linear>,
    dropout: Dropout,
    pub activation: Activation,
    d_ff: usize,
}

impl FeedForward {
    pub fn new(
        d_model: usize,
        d_ff: usize,
        dropout_prob: f32,
        activation: Activation,
        is_gated: bool,
        ctx: &mut ExecutionContext,
    ) -> NnResult<Self> {
        Self::with_bias(d_model, d_ff, dropout_prob, activation, is_gated, FeedForwardBias::default(), ctx)
    }

    pub fn with_bias(
        d_model: usize,
        d_ff: usize,
        dropout_prob: f32,
        activation: Activation,
        is_gated: bool,
        bias: FeedForwardBias,
        ctx: &mut ExecutionContext,
    ) -> NnResult<Self> {
        if d_ff == 0 {
            return Err(NnError::InvalidConfig("ff_dim must be > 0".into()));
        }
        let layer1 = Linear::with_bias(d_model, d_ff, bias.layer1, ctx)?;
        let layer2 = Linear::with_bias(d_ff, d_model, bias.layer2, ctx)?;
        let linear_v = if is_gated {
            Some(Linear::with_bias(d_model, d_ff, bias.gate, ctx)?)
        } else {
            None
        };
        Ok(Self {
            layer1,
            layer2,
            linear_v,
            dropout: Dropout::new(dropout_prob)?,
            activation,
            d_ff,
        })
    }

    pub fn is_gated(&self) -> bool {
        self.linear_v.is_some()
    }

    pub fn d_ff(&self) -> usize {
        self.d_ff
    }

    fn activate(&self, h: &Tensor) -> Tensor {
        match self.activation {
            Activation::Relu => h.relu(),
            Activation::Gelu => h.gelu(),
            Activation::Silu => h.silu(),
            Activation::Sigmoid => h.sigmoid(),
        }
    }

    pub fn forward(&self, x: &Tensor, ctx: &mut ExecutionContext) -> NnResult<Tensor> {
        let _t = if log::log_enabled!(log::Level::Trace) { Some(Instant::now()) } else { None };

        let g = self.activate(&self.layer1.forward(x)?);
        let h = match self.linear_v {
            Some(ref gate) => g.mul(&gate.forward(x)?)?,
            None => g,
        };
        let h = self.dropout.forward(&h, ctx)?;
        let result = self.layer2.forward(&h)?;

        if let Some(t) = _t {
            log::trace!("[perf] feed_forward::forward {:?} gated={} {:.3}ms",
                x.shape(), self.is_gated(), t.elapsed().as_secs_f64() * 1000.0);
        }
        Ok(result)
    }
}

impl Module for FeedForward {
    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = self.layer1.parameters();
        params.extend(self.layer2.parameters());
        if let Some(ref gate) = self.linear_v {
            params.extend(gate.parameters());
        }
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = self.layer1.parameters_mut();
        params.extend(self.layer2.parameters_mut());
        if let Some(ref mut gate) = self.linear_v {
            params.extend(gate.parameters_mut());
        }
        params
    }
}
