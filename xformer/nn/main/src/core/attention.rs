//! Scaled dot-product multi-head attention over seq-first tensors.
//!
//! Queries, keys and values are `[len, batch, d_model]`. Internally each is
//! projected and split into `[batch, heads, len, head_dim]` so the score
//! computation is a single batched matmul; the normalization axis is always
//! the key axis.

use crate::api::error::{NnError, NnResult};
use crate::api::traits::Module;
use crate::core::dropout::Dropout;
use crate::core::linear::Linear;
use std::time::Instant;
use xformer_core::{ExecutionContext, Tensor};

#[derive(Debug)]
pub struct MultiHeadAttention {
    pub query: Linear,
    pub key: Linear,
    pub value: Linear,
    pub output: Linear,
    dropout: Dropout,
    heads: usize,
    d_model: usize,
    head_dim: usize,
    scale: f32,
    name: &'static str,
}

impl MultiHeadAttention {
    /// `bias` applies to the query and key projections. The value and
    /// output projections always carry a bias.
    pub fn new(
        heads: usize,
        d_model: usize,
        dropout_prob: f32,
        bias: bool,
        ctx: &mut ExecutionContext,
    ) -> NnResult<Self> {
        if heads == 0 || d_model == 0 {
            return Err(NnError::InvalidConfig(format!(
                "attention needs heads > 0 and d_model > 0, got heads={} d_model={}",
                heads, d_model
            )));
        }
        if d_model % heads != 0 {
            return Err(NnError::InvalidConfig(format!(
                "d_model ({}) must be divisible by heads ({})",
                d_model, heads
            )));
        }
        let head_dim = d_model / heads;

        Ok(Self {
            query: Linear::with_bias(d_model, heads * head_dim, bias, ctx)?,
            key: Linear::with_bias(d_model, heads * head_dim, bias, ctx)?,
            value: Linear::new(d_model, heads * head_dim, ctx)?,
            output: Linear::new(d_model, d_model, ctx)?,
            dropout: Dropout::new(dropout_prob)?,
            heads,
            d_model,
            head_dim,
            scale: 1.0 / (head_dim as f32).sqrt(),
            name: "attention",
        })
    }

    /// Label used in mask errors and perf logs.
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn heads(&self) -> usize {
        self.heads
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    pub fn d_model(&self) -> usize {
        self.d_model
    }

    /// Attend `query` `[lq, B, d]` over `key`/`value` `[lk, B, d]`.
    ///
    /// `mask`, when given, is `[1 | lq, lk, 1 | B]` with 0 marking excluded
    /// keys. Output is `[lq, B, d]`.
    pub fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
        ctx: &mut ExecutionContext,
    ) -> NnResult<Tensor> {
        let _t = if log::log_enabled!(log::Level::Debug) { Some(Instant::now()) } else { None };

        self.check_inputs(query, key, Some(value))?;
        let (lq, batch) = (query.shape()[0], query.shape()[1]);

        let attn = self.probabilities(query, key, mask)?;
        let attn = self.dropout.forward(&attn, ctx)?;

        let v = self.split_heads(&self.value, value)?;
        // [B, H, lq, dk] -> [lq, B, H, dk] -> [lq, B, d]
        let context = attn
            .matmul(&v)?
            .permute(&[2, 0, 1, 3])?
            .reshape(&[lq, batch, self.heads * self.head_dim])?;

        let result = self.output.forward(&context)?;
        if let Some(t) = _t {
            log::debug!("[perf] {}::forward q={:?} k={:?} {:.3}ms",
                self.name, query.shape(), key.shape(), t.elapsed().as_secs_f64() * 1000.0);
        }
        Ok(result)
    }

    /// Post-softmax attention weights `[lq, lk, B, H]`, without dropout.
    pub fn attention_weights(
        &self,
        query: &Tensor,
        key: &Tensor,
        mask: Option<&Tensor>,
    ) -> NnResult<Tensor> {
        self.check_inputs(query, key, None)?;
        let attn = self.probabilities(query, key, mask)?;
        Ok(attn.permute(&[2, 3, 0, 1])?.contiguous()?)
    }

    /// Softmax over keys of the scaled, masked scores, `[B, H, lq, lk]`.
    fn probabilities(&self, query: &Tensor, key: &Tensor, mask: Option<&Tensor>) -> NnResult<Tensor> {
        let q = self.split_heads(&self.query, query)?;
        let k = self.split_heads(&self.key, key)?;

        let scores = q.matmul(&k.transpose(2, 3)?)?.mul_scalar(self.scale);
        let scores = match mask {
            Some(mask) => self.apply_mask(&scores, mask)?,
            None => scores,
        };
        Ok(scores.softmax(-1)?)
    }

    /// `[len, B, d]` through `proj`, split to `[B, H, len, dk]`.
    fn split_heads(&self, proj: &Linear, x: &Tensor) -> NnResult<Tensor> {
        let (len, batch) = (x.shape()[0], x.shape()[1]);
        Ok(proj
            .forward(x)?
            .reshape(&[len, batch, self.heads, self.head_dim])?
            .permute(&[1, 2, 0, 3])?
            .contiguous()?)
    }

    fn check_inputs(&self, query: &Tensor, key: &Tensor, value: Option<&Tensor>) -> NnResult<()> {
        let expect_3d = |role: &str, t: &Tensor| -> NnResult<()> {
            let s = t.shape();
            if s.len() != 3 || s[2] != self.d_model || s[0] == 0 || s[1] == 0 {
                return Err(NnError::ShapeMismatch(format!(
                    "{} {} must be [len >= 1, batch >= 1, {}], got {:?}",
                    self.name, role, self.d_model, s
                )));
            }
            Ok(())
        };
        expect_3d("query", query)?;
        expect_3d("key", key)?;
        if query.shape()[1] != key.shape()[1] {
            return Err(NnError::ShapeMismatch(format!(
                "{} query batch {} differs from key batch {}",
                self.name,
                query.shape()[1],
                key.shape()[1]
            )));
        }
        if let Some(value) = value {
            expect_3d("value", value)?;
            if value.shape()[..2] != key.shape()[..2] {
                return Err(NnError::ShapeMismatch(format!(
                    "{} value {:?} must match key length and batch {:?}",
                    self.name,
                    value.shape(),
                    key.shape()
                )));
            }
        }
        Ok(())
    }

    /// Sets scores to `-inf` wherever the broadcast mask is zero.
    fn apply_mask(&self, scores: &Tensor, mask: &Tensor) -> NnResult<Tensor> {
        let (batch, lq, lk) = match *scores.shape() {
            [b, _, q, k] => (b, q, k),
            _ => {
                return Err(NnError::ShapeMismatch(format!(
                    "{} scores must be 4D, got {:?}",
                    self.name,
                    scores.shape()
                )))
            }
        };
        let ms = mask.shape();
        let valid = ms.len() == 3
            && (ms[0] == 1 || ms[0] == lq)
            && ms[1] == lk
            && (ms[2] == 1 || ms[2] == batch);
        if !valid {
            return Err(NnError::MaskShape {
                stage: self.name,
                expected: format!("[1 or {}, {}, 1 or {}]", lq, lk, batch),
                got: ms.to_vec(),
            });
        }
        let (m0, m2) = (ms[0], ms[2]);
        let excluded: Vec<f32> = mask.iter().map(|m| if m == 0.0 { 1.0 } else { 0.0 }).collect();
        // [1|lq, lk, 1|B] -> [1|B, 1, 1|lq, lk], broadcast over heads
        let excluded = Tensor::from_vec(excluded, ms.to_vec())?
            .permute(&[2, 0, 1])?
            .contiguous()?
            .reshape(&[m2, 1, m0, lk])?;
        Ok(scores.masked_fill(&excluded, f32::NEG_INFINITY)?)
    }
}

impl Module for MultiHeadAttention {
    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = self.query.parameters();
        params.extend(self.key.parameters());
        params.extend(self.value.parameters());
        params.extend(self.output.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = self.query.parameters_mut();
        params.extend(self.key.parameters_mut());
        params.extend(self.value.parameters_mut());
        params.extend(self.output.parameters_mut());
        params
    }
}
