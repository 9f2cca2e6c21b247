//! Encoder-decoder composition and config-driven construction.

use crate::api::config::TransformerConfig;
use crate::api::error::{NnError, NnResult};
use crate::api::traits::Module;
use crate::core::attention::MultiHeadAttention;
use crate::core::embedding::Embeddings;
use crate::core::feed_forward::FeedForward;
use crate::core::generator::Generator;
use crate::core::init::xavier_uniform;
use crate::core::stack::{Decoder, Encoder};
use crate::core::transformer_layer::TransformerLayer;
use std::time::Instant;
use xformer_core::{ExecutionContext, Tensor};

/// `generator(decoder(tgt_embed(tgt), encoder(src_embed(src), src_mask), src_mask, tgt_mask))`
#[derive(Debug)]
pub struct EncoderDecoder {
    pub encoder: Encoder,
    pub decoder: Decoder,
    pub src_embed: Embeddings,
    pub tgt_embed: Embeddings,
    pub generator: Generator,
}

impl EncoderDecoder {
    /// Assemble a model and reinitialize it.
    ///
    /// Every parameter with more than one dimension (projection weights,
    /// embedding tables and a learned positional table) is redrawn from
    /// Xavier-uniform using the context's stream. Biases and norm parameters
    /// keep their zero/one starts. Parameters are then stored in the context's
    /// dtype.
    pub fn new(
        encoder: Encoder,
        decoder: Decoder,
        src_embed: Embeddings,
        tgt_embed: Embeddings,
        generator: Generator,
        ctx: &mut ExecutionContext,
    ) -> NnResult<Self> {
        let d_model = src_embed.d_model();
        let widths = [
            tgt_embed.d_model(),
            encoder.norm.d_model(),
            decoder.norm.d_model(),
            generator.projection.in_features,
        ];
        if widths.iter().any(|&w| w != d_model) {
            return Err(NnError::InvalidConfig(format!(
                "component widths {:?} differ from source embedding width {}",
                widths, d_model
            )));
        }

        let mut model = Self {
            encoder,
            decoder,
            src_embed,
            tgt_embed,
            generator,
        };
        model.reset_parameters(ctx)?;
        model.cast_parameters(ctx)?;

        log::info!(
            "EncoderDecoder: d_model={} encoder_layers={} decoder_layers={} params={} dtype={}",
            d_model,
            model.encoder.len(),
            model.decoder.len(),
            model.parameter_count(),
            ctx.dtype()
        );
        Ok(model)
    }

    /// Build every component from `config`, drawing parameters from `ctx`.
    pub fn from_config(config: &TransformerConfig, ctx: &mut ExecutionContext) -> NnResult<Self> {
        config.validate()?;
        let d = config.model_dim;
        let p = config.dropout_prob;
        let eps = config.layer_norm_eps;

        let feed_forward = |ctx: &mut ExecutionContext| {
            FeedForward::with_bias(
                d,
                config.ff_dim,
                p,
                config.ff_activation,
                config.ff_is_gated,
                config.ff_bias(),
                ctx,
            )
        };

        let encoder = Encoder::new(
            config.n_layers,
            d,
            eps,
            |_, ctx: &mut ExecutionContext| {
                let self_attn = MultiHeadAttention::new(config.heads, d, p, config.attn_bias, ctx)?
                    .named("encoder.self_attn");
                TransformerLayer::encoder(d, self_attn, feed_forward(ctx)?, p, eps)
            },
            ctx,
        )?;
        let decoder = Decoder::new(
            config.n_layers,
            d,
            eps,
            |_, ctx: &mut ExecutionContext| {
                let self_attn = MultiHeadAttention::new(config.heads, d, p, config.attn_bias, ctx)?
                    .named("decoder.self_attn");
                let src_attn = MultiHeadAttention::new(config.heads, d, p, config.attn_bias, ctx)?
                    .named("decoder.src_attn");
                TransformerLayer::decoder(d, self_attn, src_attn, feed_forward(ctx)?, p, eps)
            },
            ctx,
        )?;

        let learned = config.use_learned_positional_encoding;
        let src_embed = Embeddings::new(d, config.vocab_size_src, config.max_seq_len, learned, ctx)?;
        let tgt_embed = Embeddings::new(d, config.vocab_size_tgt, config.max_seq_len, learned, ctx)?;
        let generator = Generator::new(config.vocab_size_tgt, d, ctx)?;

        Self::new(encoder, decoder, src_embed, tgt_embed, generator, ctx)
    }

    fn reset_parameters(&mut self, ctx: &mut ExecutionContext) -> NnResult<()> {
        for param in self.parameters_mut() {
            if param.ndim() > 1 {
                *param = xavier_uniform(param.shape(), ctx)?;
            }
        }
        Ok(())
    }

    fn cast_parameters(&mut self, ctx: &ExecutionContext) -> NnResult<()> {
        let dtype = ctx.dtype();
        for param in self.parameters_mut() {
            *param = param.to_dtype(dtype)?;
        }
        Ok(())
    }

    pub fn d_model(&self) -> usize {
        self.src_embed.d_model()
    }

    pub fn src_vocab_size(&self) -> usize {
        self.src_embed.vocab_size()
    }

    pub fn tgt_vocab_size(&self) -> usize {
        self.generator.vocab_size()
    }

    /// Toggle feed-forward input capture on every encoder and decoder layer.
    pub fn set_save_ff_input(&mut self, enabled: bool) {
        for layer in self.encoder.layers.iter_mut().chain(self.decoder.layers.iter_mut()) {
            layer.set_save_ff_input(enabled);
        }
    }

    /// Source tokens `[src_len, B]` to memory `[src_len, B, d]`.
    pub fn encode(&self, src: &Tensor, src_mask: Option<&Tensor>, ctx: &mut ExecutionContext) -> NnResult<Tensor> {
        let x = self.src_embed.forward(src)?;
        self.encoder.forward(&x, src_mask, ctx)
    }

    /// Target tokens `[tgt_len, B]` attending to `memory`, before the generator.
    pub fn decode(
        &self,
        memory: &Tensor,
        src_mask: Option<&Tensor>,
        tgt: &Tensor,
        tgt_mask: Option<&Tensor>,
        ctx: &mut ExecutionContext,
    ) -> NnResult<Tensor> {
        let x = self.tgt_embed.forward(tgt)?;
        self.decoder.forward(&x, memory, src_mask, tgt_mask, ctx)
    }

    /// Logits `[tgt_len, B, vocab_size_tgt]`.
    ///
    /// Runs on the context's thread pool when one is configured.
    pub fn forward(
        &self,
        src: &Tensor,
        tgt: &Tensor,
        src_mask: Option<&Tensor>,
        tgt_mask: Option<&Tensor>,
        ctx: &mut ExecutionContext,
    ) -> NnResult<Tensor> {
        let _t = if log::log_enabled!(log::Level::Debug) { Some(Instant::now()) } else { None };

        let logits = ctx.run(|ctx| {
            let memory = self.encode(src, src_mask, ctx)?;
            let out = self.decode(&memory, src_mask, tgt, tgt_mask, ctx)?;
            self.generator.forward(&out)
        })?;

        if let Some(t) = _t {
            log::debug!("[perf] encoder_decoder::forward src={:?} tgt={:?} -> {:?} {:.3}ms",
                src.shape(), tgt.shape(), logits.shape(), t.elapsed().as_secs_f64() * 1000.0);
        }
        Ok(logits)
    }
}

impl Module for EncoderDecoder {
    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = self.encoder.parameters();
        params.extend(self.decoder.parameters());
        params.extend(self.src_embed.parameters());
        params.extend(self.tgt_embed.parameters());
        params.extend(self.generator.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = self.encoder.parameters_mut();
        params.extend(self.decoder.parameters_mut());
        params.extend(self.src_embed.parameters_mut());
        params.extend(self.tgt_embed.parameters_mut());
        params.extend(self.generator.parameters_mut());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mask::{subsequent_mask, tokens_from_ids};
    use xformer_core::DType;

    fn tiny() -> TransformerConfig {
        TransformerConfig {
            model_dim: 8,
            heads: 2,
            ff_dim: 16,
            n_layers: 1,
            vocab_size_src: 10,
            vocab_size_tgt: 10,
            max_seq_len: 16,
            ..TransformerConfig::default()
        }
    }

    #[test]
    fn test_logits_shape() {
        let mut ctx = ExecutionContext::new(0);
        let model = EncoderDecoder::from_config(&tiny(), &mut ctx).unwrap();
        let src = tokens_from_ids(&[1, 2, 3]).unwrap();
        let tgt = tokens_from_ids(&[4, 5]).unwrap();
        let mask = subsequent_mask(2).unwrap();
        let logits = model.forward(&src, &tgt, None, Some(&mask), &mut ctx).unwrap();
        assert_eq!(logits.shape(), &[2, 1, 10]);
    }

    #[test]
    fn test_xavier_applied_to_matrices_only() {
        let mut ctx = ExecutionContext::new(1);
        let model = EncoderDecoder::from_config(&tiny(), &mut ctx).unwrap();
        for p in model.parameters() {
            if p.ndim() == 1 {
                assert!(p.iter().all(|v| v == 0.0 || v == 1.0));
            } else {
                assert!(p.iter().any(|v| v != 0.0));
            }
        }
    }

    #[test]
    fn test_learned_positional_table_reinitialized() {
        let mut ctx = ExecutionContext::new(2);
        let config = TransformerConfig { use_learned_positional_encoding: true, ..tiny() };
        let model = EncoderDecoder::from_config(&config, &mut ctx).unwrap();
        assert!(model.src_embed.positional.forward(4).unwrap().iter().any(|v| v != 0.0));
    }

    #[test]
    fn test_parameters_cast_to_context_dtype() {
        let mut ctx = ExecutionContext::new(3).with_dtype(DType::BF16);
        let model = EncoderDecoder::from_config(&tiny(), &mut ctx).unwrap();
        assert!(model.parameters().iter().all(|p| p.dtype() == DType::BF16));
    }

    #[test]
    fn test_width_mismatch_rejected() {
        let mut ctx = ExecutionContext::new(4);
        let model = EncoderDecoder::from_config(&tiny(), &mut ctx).unwrap();
        let wide = Embeddings::new(12, 10, 16, false, &mut ctx).unwrap();
        let err = EncoderDecoder::new(
            model.encoder,
            model.decoder,
            model.src_embed,
            wide,
            model.generator,
            &mut ctx,
        );
        assert!(matches!(err, Err(NnError::InvalidConfig(_))));
    }

    #[test]
    fn test_parameter_count_tiny() {
        let mut ctx = ExecutionContext::new(5);
        let model = EncoderDecoder::from_config(&tiny(), &mut ctx).unwrap();
        let attn = 4 * 64 + 4 * 8;
        let ff = (8 * 16 + 16) + (16 * 8 + 8);
        let norm = 16;
        let encoder = attn + ff + 2 * norm + norm;
        let decoder = 2 * attn + ff + 3 * norm + norm;
        let embeds = 2 * 10 * 8;
        let generator = 8 * 10 + 10;
        assert_eq!(model.parameter_count(), encoder + decoder + embeds + generator);
    }
}
