//! Mask and token-tensor helpers. Masks use 1 = attend, 0 = exclude.

use crate::api::error::{NnError, NnResult};
use xformer_core::Tensor;

/// Causal mask `[len, len, 1]`: query `i` sees keys `0..=i`.
pub fn subsequent_mask(len: usize) -> NnResult<Tensor> {
    Ok(Tensor::tril(len).unsqueeze(-1)?)
}

/// Key padding mask `[1, seq_len, batch]` for tokens `[seq_len, batch]`.
pub fn padding_mask(tokens: &Tensor, pad: usize) -> NnResult<Tensor> {
    let shape = tokens.shape();
    if shape.len() != 2 {
        return Err(NnError::ShapeMismatch(format!(
            "padding mask needs tokens [seq_len, batch], got {:?}",
            shape
        )));
    }
    let pad = pad as f32;
    let data: Vec<f32> = tokens
        .iter()
        .map(|t| if t == pad { 0.0 } else { 1.0 })
        .collect();
    Ok(Tensor::from_vec(data, [1, shape[0], shape[1]])?)
}

/// Elementwise AND of two broadcast-compatible masks.
pub fn combine_masks(a: &Tensor, b: &Tensor) -> NnResult<Tensor> {
    let product = a.mul(b)?;
    let data: Vec<f32> = product
        .iter()
        .map(|v| if v != 0.0 { 1.0 } else { 0.0 })
        .collect();
    Ok(Tensor::from_vec(data, product.shape().to_vec())?)
}

/// A single sequence as a batch of one, `[len, 1]`.
pub fn tokens_from_ids(ids: &[usize]) -> NnResult<Tensor> {
    batch_tokens(&[ids])
}

/// Equal-length sequences stacked along the batch axis, `[len, batch]`.
pub fn batch_tokens<S: AsRef<[usize]>>(sequences: &[S]) -> NnResult<Tensor> {
    let len = match sequences.first() {
        Some(first) => first.as_ref().len(),
        None => return Err(NnError::ShapeMismatch("no sequences to batch".into())),
    };
    if len == 0 {
        return Err(NnError::ShapeMismatch("sequences must not be empty".into()));
    }
    if let Some(bad) = sequences.iter().find(|s| s.as_ref().len() != len) {
        return Err(NnError::ShapeMismatch(format!(
            "sequence of length {} does not match batch length {}",
            bad.as_ref().len(),
            len
        )));
    }
    let batch = sequences.len();
    let mut data = vec![0.0f32; len * batch];
    for (b, seq) in sequences.iter().enumerate() {
        for (pos, &id) in seq.as_ref().iter().enumerate() {
            data[pos * batch + b] = id as f32;
        }
    }
    Ok(Tensor::from_vec(data, [len, batch])?)
}
