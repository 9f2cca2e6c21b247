//! Encoder and decoder stacks built from a layer factory.

use crate::api::error::{NnError, NnResult};
use crate::api::traits::Module;
use crate::core::layer_norm::LayerNorm;
use crate::core::transformer_layer::TransformerLayer;
use std::time::Instant;
use xformer_core::{ExecutionContext, Tensor};

fn build_layers<F>(
    n_layers: usize,
    d_model: usize,
    mut factory: F,
    ctx: &mut ExecutionContext,
    decoder: bool,
) -> NnResult<Vec<TransformerLayer>>
where
    F: FnMut(usize, &mut ExecutionContext) -> NnResult<TransformerLayer>,
{
    let mut layers = Vec::with_capacity(n_layers);
    for i in 0..n_layers {
        let layer = factory(i, ctx)?;
        if layer.d_model() != d_model {
            return Err(NnError::InvalidConfig(format!(
                "layer {} has width {}, stack expects {}",
                i,
                layer.d_model(),
                d_model
            )));
        }
        if layer.is_decoder() != decoder {
            return Err(NnError::InvalidConfig(format!(
                "layer {} is {} layer, stack expects {} layers",
                i,
                if layer.is_decoder() { "a decoder" } else { "an encoder" },
                if decoder { "decoder" } else { "encoder" }
            )));
        }
        layers.push(layer);
    }
    Ok(layers)
}

/// `N` encoder layers followed by a final normalization.
#[derive(Debug)]
pub struct Encoder {
    pub layers: Vec<TransformerLayer>,
    pub norm: LayerNorm,
}

impl Encoder {
    /// Calls `factory(i, ctx)` once per layer so every layer owns fresh parameters.
    pub fn new<F>(n_layers: usize, d_model: usize, eps: f32, factory: F, ctx: &mut ExecutionContext) -> NnResult<Self>
    where
        F: FnMut(usize, &mut ExecutionContext) -> NnResult<TransformerLayer>,
    {
        Ok(Self {
            layers: build_layers(n_layers, d_model, factory, ctx, false)?,
            norm: LayerNorm::with_eps(d_model, eps),
        })
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn forward(&self, x: &Tensor, mask: Option<&Tensor>, ctx: &mut ExecutionContext) -> NnResult<Tensor> {
        let _t = if log::log_enabled!(log::Level::Debug) { Some(Instant::now()) } else { None };
        let mut x = x.clone();
        for layer in &self.layers {
            x = layer.forward(&x, mask, ctx)?;
        }
        let result = self.norm.forward(&x)?;
        if let Some(t) = _t {
            log::debug!("[perf] encoder::forward layers={} {:?} {:.3}ms",
                self.layers.len(), result.shape(), t.elapsed().as_secs_f64() * 1000.0);
        }
        Ok(result)
    }
}

impl Module for Encoder {
    fn parameters(&self) -> Vec<&Tensor> {
        let mut params: Vec<&Tensor> = self.layers.iter().flat_map(|l| l.parameters()).collect();
        params.extend(self.norm.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params: Vec<&mut Tensor> = self.layers.iter_mut().flat_map(|l| l.parameters_mut()).collect();
        params.extend(self.norm.parameters_mut());
        params
    }
}

/// `N` decoder layers attending to the encoder memory, then a final normalization.
#[derive(Debug)]
pub struct Decoder {
    pub layers: Vec<TransformerLayer>,
    pub norm: LayerNorm,
}

impl Decoder {
    pub fn new<F>(n_layers: usize, d_model: usize, eps: f32, factory: F, ctx: &mut ExecutionContext) -> NnResult<Self>
    where
        F: FnMut(usize, &mut ExecutionContext) -> NnResult<TransformerLayer>,
    {
        Ok(Self {
            layers: build_layers(n_layers, d_model, factory, ctx, true)?,
            norm: LayerNorm::with_eps(d_model, eps),
        })
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn forward(
        &self,
        x: &Tensor,
        memory: &Tensor,
        src_mask: Option<&Tensor>,
        tgt_mask: Option<&Tensor>,
        ctx: &mut ExecutionContext,
    ) -> NnResult<Tensor> {
        let _t = if log::log_enabled!(log::Level::Debug) { Some(Instant::now()) } else { None };
        let mut x = x.clone();
        for layer in &self.layers {
            x = layer.forward_with_memory(&x, tgt_mask, Some(memory), src_mask, ctx)?;
        }
        let result = self.norm.forward(&x)?;
        if let Some(t) = _t {
            log::debug!("[perf] decoder::forward layers={} {:?} {:.3}ms",
                self.layers.len(), result.shape(), t.elapsed().as_secs_f64() * 1000.0);
        }
        Ok(result)
    }
}

impl Module for Decoder {
    fn parameters(&self) -> Vec<&Tensor> {
        let mut params: Vec<&Tensor> = self.layers.iter().flat_map(|l| l.parameters()).collect();
        params.extend(self.norm.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params: Vec<&mut Tensor> = self.layers.iter_mut().flat_map(|l| l.parameters_mut()).collect();
        params.extend(self.norm.parameters_mut());
        params
    }
}
