//! Attention contract checks: head split, output shape, masking and key-axis softmax.

use xformer_core::{ExecutionContext, Tensor};
use xformer_nn::*;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn attention(heads: usize, d_model: usize, ctx: &mut ExecutionContext) -> MultiHeadAttention {
    MultiHeadAttention::new(heads, d_model, 0.0, true, ctx).unwrap()
}

#[test]
fn test_head_dim_divides_exactly() {
    let mut ctx = ExecutionContext::new(0);
    for d_model in [4usize, 8, 12, 24, 64] {
        for heads in 1..=d_model {
            if d_model % heads == 0 {
                let attn = attention(heads, d_model, &mut ctx);
                assert_eq!(attn.head_dim() * heads, d_model);
            } else {
                assert!(MultiHeadAttention::new(heads, d_model, 0.0, true, &mut ctx).is_err());
            }
        }
    }
}

#[test]
fn test_output_shape_independent_of_key_length() {
    init_logger();
    let mut ctx = ExecutionContext::new(1);
    let attn = attention(4, 16, &mut ctx);
    let query = Tensor::randn_with([5, 3, 16], ctx.rng());
    for key_len in [1usize, 2, 5, 9] {
        let memory = Tensor::randn_with([key_len, 3, 16], ctx.rng());
        let mask = Tensor::ones([1, key_len, 3]);
        let out = attn.forward(&query, &memory, &memory, Some(&mask), &mut ctx).unwrap();
        assert_eq!(out.shape(), &[5, 3, 16]);
    }
}

#[test]
fn test_single_unmasked_key_gets_all_weight() {
    let mut ctx = ExecutionContext::new(2);
    let attn = attention(2, 8, &mut ctx);
    let (lq, lk) = (3usize, 4usize);
    let query = Tensor::randn_with([lq, 1, 8], ctx.rng());
    let key = Tensor::randn_with([lk, 1, 8], ctx.rng());

    // query i may only see key (i + 1) % lk
    let mut data = vec![0.0f32; lq * lk];
    for i in 0..lq {
        data[i * lk + (i + 1) % lk] = 1.0;
    }
    let mask = Tensor::from_vec(data, [lq, lk, 1]).unwrap();
    let w = attn.attention_weights(&query, &key, Some(&mask)).unwrap();
    assert_eq!(w.shape(), &[lq, lk, 1, 2]);

    for i in 0..lq {
        for j in 0..lk {
            for h in 0..2 {
                let expected = if j == (i + 1) % lk { 1.0 } else { 0.0 };
                assert_eq!(w.get(&[i, j, 0, h]).unwrap(), expected);
            }
        }
    }
}

#[test]
fn test_weights_normalize_over_keys() {
    let mut ctx = ExecutionContext::new(3);
    let attn = attention(4, 16, &mut ctx);
    let (lq, lk, batch) = (3usize, 6usize, 2usize);
    let query = Tensor::randn_with([lq, batch, 16], ctx.rng());
    let key = Tensor::randn_with([lk, batch, 16], ctx.rng());
    let mask = padding_mask(&batch_tokens(&[vec![1, 2, 3, 4, 0, 0], vec![5, 6, 7, 8, 9, 1]]).unwrap(), 0).unwrap();

    let w = attn.attention_weights(&query, &key, Some(&mask)).unwrap();
    for i in 0..lq {
        for b in 0..batch {
            for h in 0..4 {
                let total: f32 = (0..lk).map(|j| w.get(&[i, j, b, h]).unwrap()).sum();
                assert!((total - 1.0).abs() < 1e-5, "row ({i}, {b}, {h}) sums to {total}");
            }
            // padded keys of batch 0 receive nothing
            if b == 0 {
                for h in 0..4 {
                    assert_eq!(w.get(&[i, 4, b, h]).unwrap(), 0.0);
                    assert_eq!(w.get(&[i, 5, b, h]).unwrap(), 0.0);
                }
            }
        }
    }
}

#[test]
fn test_fully_masked_query_row_produces_finite_output() {
    let mut ctx = ExecutionContext::new(4);
    let attn = attention(2, 8, &mut ctx);
    let x = Tensor::randn_with([2, 1, 8], ctx.rng());
    let mask = Tensor::zeros([2, 2, 1]);
    let w = attn.attention_weights(&x, &x, Some(&mask)).unwrap();
    assert!(w.iter().all(|v| v == 0.0));

    // with no admissible key the context is zero, leaving only the output bias
    let out = attn.forward(&x, &x, &x, Some(&mask), &mut ctx).unwrap();
    assert!(out.iter().all(|v| v.is_finite()));
    let bias = attn.output.bias.as_ref().unwrap().to_vec();
    for (i, v) in out.iter().enumerate() {
        assert_eq!(v, bias[i % 8]);
    }
}

#[test]
fn test_mask_contract_violations_name_the_stage() {
    let mut ctx = ExecutionContext::new(5);
    let attn = attention(2, 8, &mut ctx).named("probe");
    let query = Tensor::randn_with([3, 2, 8], ctx.rng());
    let key = Tensor::randn_with([4, 2, 8], ctx.rng());

    let ok = [vec![1usize, 4, 1], vec![3, 4, 1], vec![1, 4, 2], vec![3, 4, 2]];
    for shape in ok {
        let mask = Tensor::ones(shape);
        assert!(attn.forward(&query, &key, &key, Some(&mask), &mut ctx).is_ok());
    }

    let bad = [vec![2usize, 4, 1], vec![1, 3, 1], vec![1, 4, 3], vec![1, 4], vec![1, 1, 4, 1]];
    for shape in bad {
        let mask = Tensor::ones(shape.clone());
        match attn.forward(&query, &key, &key, Some(&mask), &mut ctx) {
            Err(NnError::MaskShape { stage, got, .. }) => {
                assert_eq!(stage, "probe");
                assert_eq!(got, shape);
            }
            Err(e) => panic!("unexpected error for {shape:?}: {e}"),
            Ok(_) => panic!("mask {shape:?} should be rejected"),
        }
    }
}

#[test]
fn test_causal_output_ignores_future_positions() {
    let mut ctx = ExecutionContext::new(6);
    let attn = attention(2, 8, &mut ctx);
    let len = 5;
    let x = Tensor::randn_with([len, 1, 8], ctx.rng());
    let mask = subsequent_mask(len).unwrap();
    let base = attn.forward(&x, &x, &x, Some(&mask), &mut ctx).unwrap();

    for j in 1..len {
        // perturb position j only
        let mut data = x.to_vec();
        for v in &mut data[j * 8..(j + 1) * 8] {
            *v += 3.0;
        }
        let perturbed = Tensor::from_vec(data, [len, 1, 8]).unwrap();
        let out = attn.forward(&perturbed, &perturbed, &perturbed, Some(&mask), &mut ctx).unwrap();
        for i in 0..j {
            let a = base.select(0, i).unwrap();
            let b = out.select(0, i).unwrap();
            assert!(a.allclose(&b, 1e-6), "position {i} changed when {j} was perturbed");
        }
        assert!(!base.select(0, j).unwrap().allclose(&out.select(0, j).unwrap(), 1e-6));
    }
}

#[test]
fn test_mismatched_batches_rejected() {
    let mut ctx = ExecutionContext::new(7);
    let attn = attention(2, 8, &mut ctx);
    let query = Tensor::randn_with([2, 1, 8], ctx.rng());
    let key = Tensor::randn_with([2, 3, 8], ctx.rng());
    assert!(matches!(
        attn.forward(&query, &key, &key, None, &mut ctx),
        Err(NnError::ShapeMismatch(_))
    ));
}
