//! Pre-norm layer and stack behaviour.

use xformer_core::{ExecutionContext, Mode, Tensor};
use xformer_nn::*;

fn encoder_layer(ctx: &mut ExecutionContext, gated: bool) -> TransformerLayer {
    let attn = MultiHeadAttention::new(2, 8, 0.0, true, ctx).unwrap();
    let ff = FeedForward::new(8, 16, 0.0, Activation::Gelu, gated, ctx).unwrap();
    TransformerLayer::encoder(8, attn, ff, 0.0, 1e-5).unwrap()
}

fn decoder_layer(ctx: &mut ExecutionContext) -> TransformerLayer {
    let attn = MultiHeadAttention::new(2, 8, 0.0, true, ctx).unwrap();
    let src = MultiHeadAttention::new(2, 8, 0.0, true, ctx).unwrap();
    let ff = FeedForward::new(8, 16, 0.0, Activation::Relu, false, ctx).unwrap();
    TransformerLayer::decoder(8, attn, src, ff, 0.0, 1e-5).unwrap()
}

fn silence(linear: &mut Linear) {
    linear.weight = Tensor::zeros(linear.weight.shape().to_vec());
    if let Some(bias) = linear.bias.as_mut() {
        *bias = Tensor::zeros(bias.shape().to_vec());
    }
}

#[test]
fn test_silenced_sublayers_reduce_to_identity() {
    let mut ctx = ExecutionContext::new(10);
    for gated in [false, true] {
        let mut layer = encoder_layer(&mut ctx, gated);
        silence(&mut layer.self_attn.output);
        silence(&mut layer.feed_forward.layer2);

        let x = Tensor::randn_with([4, 2, 8], ctx.rng());
        let y = layer.forward(&x, None, &mut ctx).unwrap();
        assert_eq!(y.to_vec(), x.to_vec());
    }
}

#[test]
fn test_silenced_decoder_layer_is_identity() {
    let mut ctx = ExecutionContext::new(11);
    let mut layer = decoder_layer(&mut ctx);
    silence(&mut layer.self_attn.output);
    silence(&mut layer.feed_forward.layer2);
    if let LayerKind::Decoder { src_attn, .. } = &mut layer.kind {
        silence(&mut src_attn.output);
    }

    let x = Tensor::randn_with([3, 1, 8], ctx.rng());
    let memory = Tensor::randn_with([5, 1, 8], ctx.rng());
    let mask = subsequent_mask(3).unwrap();
    let y = layer
        .forward_with_memory(&x, Some(&mask), Some(&memory), None, &mut ctx)
        .unwrap();
    assert_eq!(y.to_vec(), x.to_vec());
}

#[test]
fn test_residual_uses_unnormalized_input() {
    let mut ctx = ExecutionContext::new(12);
    let mut layer = encoder_layer(&mut ctx, false);
    silence(&mut layer.self_attn.output);
    silence(&mut layer.feed_forward.layer2);
    // a bias on the final projection shifts every position by the same vector
    let shift = Tensor::from_vec((0..8).map(|i| i as f32).collect(), [8]).unwrap();
    layer.feed_forward.layer2.bias = Some(shift.clone());

    let x = Tensor::randn_with([2, 1, 8], ctx.rng()).mul_scalar(50.0);
    let y = layer.forward(&x, None, &mut ctx).unwrap();
    assert!(y.allclose(&x.add(&shift).unwrap(), 1e-4));
}

#[test]
fn test_cross_attention_depends_on_memory() {
    let mut ctx = ExecutionContext::new(13);
    let layer = decoder_layer(&mut ctx);
    let x = Tensor::randn_with([2, 1, 8], ctx.rng());
    let m1 = Tensor::randn_with([3, 1, 8], ctx.rng());
    let m2 = Tensor::randn_with([3, 1, 8], ctx.rng());
    let a = layer.forward_with_memory(&x, None, Some(&m1), None, &mut ctx).unwrap();
    let b = layer.forward_with_memory(&x, None, Some(&m2), None, &mut ctx).unwrap();
    assert!(!a.allclose(&b, 1e-6));
}

#[test]
fn test_encoder_layer_refuses_memory() {
    let mut ctx = ExecutionContext::new(15);
    let layer = encoder_layer(&mut ctx, false);
    let x = Tensor::randn_with([2, 1, 8], ctx.rng());
    let memory = Tensor::randn_with([3, 1, 8], ctx.rng());
    assert!(matches!(
        layer.forward_with_memory(&x, None, Some(&memory), None, &mut ctx),
        Err(NnError::UnexpectedMemory)
    ));
    assert!(layer.forward(&x, None, &mut ctx).is_ok());
}

#[test]
fn test_source_mask_checked_against_memory_length() {
    let mut ctx = ExecutionContext::new(14);
    let layer = decoder_layer(&mut ctx);
    let x = Tensor::randn_with([2, 1, 8], ctx.rng());
    let memory = Tensor::randn_with([3, 1, 8], ctx.rng());
    let wrong = Tensor::ones([1, 2, 1]);
    assert!(matches!(
        layer.forward_with_memory(&x, None, Some(&memory), Some(&wrong), &mut ctx),
        Err(NnError::MaskShape { .. })
    ));
}

#[test]
fn test_ff_inputs_recorded_in_layer_order() {
    let mut ctx = ExecutionContext::new(15);
    let mut encoder = Encoder::new(3, 8, 1e-5, |_, ctx: &mut ExecutionContext| {
        Ok(encoder_layer(ctx, false))
    }, &mut ctx)
    .unwrap();
    for layer in &mut encoder.layers {
        layer.set_save_ff_input(true);
    }
    let x = Tensor::randn_with([4, 2, 8], ctx.rng());
    encoder.forward(&x, None, &mut ctx).unwrap();

    let saved = ctx.take_ff_inputs();
    assert_eq!(saved.len(), 3);
    for z in &saved {
        assert_eq!(z.shape(), &[4, 2, 8]);
        // each capture is a normalized row set
        let mean = z.mean(-1).unwrap();
        assert!(mean.iter().all(|m| m.abs() < 1e-4));
    }
    assert!(ctx.take_ff_inputs().is_empty());
}

#[test]
fn test_training_dropout_is_seeded() {
    let build = || {
        let mut ctx = ExecutionContext::new(16);
        let attn = MultiHeadAttention::new(2, 8, 0.5, true, &mut ctx).unwrap();
        let ff = FeedForward::new(8, 16, 0.5, Activation::Relu, false, &mut ctx).unwrap();
        (TransformerLayer::encoder(8, attn, ff, 0.5, 1e-5).unwrap(), ctx)
    };
    let (layer, mut ctx) = build();
    let x = Tensor::randn_with([3, 1, 8], ctx.rng());

    let inference = layer.forward(&x, None, &mut ctx).unwrap();
    ctx.set_mode(Mode::Training);
    ctx.reseed(99);
    let a = layer.forward(&x, None, &mut ctx).unwrap();
    ctx.reseed(99);
    let b = layer.forward(&x, None, &mut ctx).unwrap();

    assert_eq!(a.to_vec(), b.to_vec());
    assert!(!a.allclose(&inference, 1e-6));
}
