//! Pre-norm Transformer layer: self-attention, optional cross-attention, FFN.

use crate::api::error::{NnError, NnResult};
use crate::api::traits::Module;
use crate::core::attention::MultiHeadAttention;
use crate::core::dropout::Dropout;
use crate::core::feed_forward::FeedForward;
use crate::core::layer_norm::LayerNorm;
use std::time::Instant;
use xformer_core::{ExecutionContext, Tensor};

/// Which sublayers a layer owns.
#[derive(Debug)]
pub enum LayerKind {
    /// Self-attention and feed-forward only.
    Encoder,
    /// Adds attention over the encoder memory between the two.
    Decoder {
        src_attn: MultiHeadAttention,
        norm_src_attn: LayerNorm,
    },
}

/// A single layer with pre-norm residual sublayers.
///
/// Structure: x -> norm -> self_attn -> + -> [norm -> src_attn(memory) -> +] -> norm -> ffn -> +
///
/// Each residual adds the dropped-out sublayer output to the value that went
/// into that sublayer's norm.
#[derive(Debug)]
pub struct TransformerLayer {
    d_model: usize,
    pub self_attn: MultiHeadAttention,
    pub kind: LayerKind,
    pub feed_forward: FeedForward,
    dropout: Dropout,
    pub norm_self_attn: LayerNorm,
    pub norm_ff: LayerNorm,
    save_ff_input: bool,
}

impl TransformerLayer {
    pub fn encoder(
        d_model: usize,
        self_attn: MultiHeadAttention,
        feed_forward: FeedForward,
        dropout_prob: f32,
        eps: f32,
    ) -> NnResult<Self> {
        Self::build(d_model, self_attn, LayerKind::Encoder, feed_forward, dropout_prob, eps)
    }

    pub fn decoder(
        d_model: usize,
        self_attn: MultiHeadAttention,
        src_attn: MultiHeadAttention,
        feed_forward: FeedForward,
        dropout_prob: f32,
        eps: f32,
    ) -> NnResult<Self> {
        if src_attn.d_model() != d_model {
            return Err(NnError::InvalidConfig(format!(
                "source attention width {} differs from layer width {}",
                src_attn.d_model(),
                d_model
            )));
        }
        let kind = LayerKind::Decoder {
            src_attn,
            norm_src_attn: LayerNorm::with_eps(d_model, eps),
        };
        Self::build(d_model, self_attn, kind, feed_forward, dropout_prob, eps)
    }

    fn build(
        d_model: usize,
        self_attn: MultiHeadAttention,
        kind: LayerKind,
        feed_forward: FeedForward,
        dropout_prob: f32,
        eps: f32,
    ) -> NnResult<Self> {
        if self_attn.d_model() != d_model || feed_forward.layer1.in_features != d_model {
            return Err(NnError::InvalidConfig(format!(
                "sublayer widths (attention {}, feed-forward {}) differ from layer width {}",
                self_attn.d_model(),
                feed_forward.layer1.in_features,
                d_model
            )));
        }
        Ok(Self {
            d_model,
            self_attn,
            kind,
            feed_forward,
            dropout: Dropout::new(dropout_prob)?,
            norm_self_attn: LayerNorm::with_eps(d_model, eps),
            norm_ff: LayerNorm::with_eps(d_model, eps),
            save_ff_input: false,
        })
    }

    pub fn d_model(&self) -> usize {
        self.d_model
    }

    pub fn is_decoder(&self) -> bool {
        matches!(self.kind, LayerKind::Decoder { .. })
    }

    /// Push each normalized feed-forward input into the context.
    pub fn set_save_ff_input(&mut self, enabled: bool) {
        self.save_ff_input = enabled;
    }

    /// Self-attention and feed-forward stages only.
    pub fn forward(&self, x: &Tensor, mask: Option<&Tensor>, ctx: &mut ExecutionContext) -> NnResult<Tensor> {
        self.forward_with_memory(x, mask, None, None, ctx)
    }

    /// Full pass. Cross-attention runs only for decoder layers given `memory`.
    pub fn forward_with_memory(
        &self,
        x: &Tensor,
        mask: Option<&Tensor>,
        memory: Option<&Tensor>,
        src_mask: Option<&Tensor>,
        ctx: &mut ExecutionContext,
    ) -> NnResult<Tensor> {
        let _t = if log::log_enabled!(log::Level::Debug) { Some(Instant::now()) } else { None };

        let z = self.norm_self_attn.forward(x)?;
        let attn = self.self_attn.forward(&z, &z, &z, mask, ctx)?;
        let mut x = x.add(&self.dropout.forward(&attn, ctx)?)?;

        match (&self.kind, memory) {
            (LayerKind::Decoder { src_attn, norm_src_attn }, Some(memory)) => {
                let z = norm_src_attn.forward(&x)?;
                let attn = src_attn.forward(&z, memory, memory, src_mask, ctx)?;
                x = x.add(&self.dropout.forward(&attn, ctx)?)?;
            }
            (LayerKind::Encoder, Some(_)) => return Err(NnError::UnexpectedMemory),
            (_, None) => {}
        }

        let z = self.norm_ff.forward(&x)?;
        if self.save_ff_input {
            ctx.record_ff_input(z.clone());
        }
        let ff = self.feed_forward.forward(&z, ctx)?;
        let result = x.add(&self.dropout.forward(&ff, ctx)?)?;

        if let Some(t) = _t {
            log::debug!("[perf] transformer_layer::forward decoder={} {:?} {:.3}ms",
                self.is_decoder(), result.shape(), t.elapsed().as_secs_f64() * 1000.0);
        }
        Ok(result)
    }
}

impl Module for TransformerLayer {
    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = self.self_attn.parameters();
        params.extend(self.norm_self_attn.parameters());
        if let LayerKind::Decoder { src_attn, norm_src_attn } = &self.kind {
            params.extend(src_attn.parameters());
            params.extend(norm_src_attn.parameters());
        }
        params.extend(self.feed_forward.parameters());
        params.extend(self.norm_ff.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = self.self_attn.parameters_mut();
        params.extend(self.norm_self_attn.parameters_mut());
        if let LayerKind::Decoder { src_attn, norm_src_attn } = &mut self.kind {
            params.extend(src_attn.parameters_mut());
            params.extend(norm_src_attn.parameters_mut());
        }
        params.extend(self.feed_forward.parameters_mut());
        params.extend(self.norm_ff.parameters_mut());
        params
    }
}
