use crate::api::error::{NnError, NnResult};
use crate::api::types::{Activation, FeedForwardBias};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Hyperparameters of an encoder-decoder Transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformerConfig {
    pub model_dim: usize,
    pub heads: usize,
    pub ff_dim: usize,
    pub n_layers: usize,
    pub vocab_size_src: usize,
    pub vocab_size_tgt: usize,
    #[serde(default = "default_dropout_prob")]
    pub dropout_prob: f32,
    #[serde(default = "default_max_seq_len")]
    pub max_seq_len: usize,
    #[serde(default)]
    pub ff_activation: Activation,
    #[serde(default)]
    pub ff_is_gated: bool,
    #[serde(default)]
    pub use_learned_positional_encoding: bool,
    /// Bias on the query and key projections. Value and output always carry one.
    #[serde(default = "default_true")]
    pub attn_bias: bool,
    #[serde(default = "default_true")]
    pub ff_bias1: bool,
    #[serde(default = "default_true")]
    pub ff_bias2: bool,
    #[serde(default = "default_true")]
    pub ff_bias_gate: bool,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f32,
}

fn default_dropout_prob() -> f32 { 0.1 }
fn default_max_seq_len() -> usize { 5000 }
fn default_true() -> bool { true }
fn default_layer_norm_eps() -> f32 { 1e-5 }

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            model_dim: 512,
            heads: 8,
            ff_dim: 2048,
            n_layers: 6,
            vocab_size_src: 32000,
            vocab_size_tgt: 32000,
            dropout_prob: default_dropout_prob(),
            max_seq_len: default_max_seq_len(),
            ff_activation: Activation::Relu,
            ff_is_gated: false,
            use_learned_positional_encoding: false,
            attn_bias: true,
            ff_bias1: true,
            ff_bias2: true,
            ff_bias_gate: true,
            layer_norm_eps: default_layer_norm_eps(),
        }
    }
}

impl TransformerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> NnResult<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: TransformerConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> NnResult<Self> {
        let config: TransformerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Head width; exact because `validate` rejects indivisible dimensions.
    pub fn head_dim(&self) -> usize {
        self.model_dim / self.heads
    }

    pub fn ff_bias(&self) -> FeedForwardBias {
        FeedForwardBias {
            layer1: self.ff_bias1,
            layer2: self.ff_bias2,
            gate: self.ff_bias_gate,
        }
    }

    pub fn validate(&self) -> NnResult<()> {
        if self.model_dim == 0 {
            return Err(NnError::InvalidConfig("model_dim must be > 0".into()));
        }
        if self.heads == 0 {
            return Err(NnError::InvalidConfig("heads must be > 0".into()));
        }
        if self.model_dim % self.heads != 0 {
            return Err(NnError::InvalidConfig(format!(
                "model_dim ({}) must be divisible by heads ({})",
                self.model_dim, self.heads
            )));
        }
        if self.ff_dim == 0 {
            return Err(NnError::InvalidConfig("ff_dim must be > 0".into()));
        }
        if self.vocab_size_src == 0 || self.vocab_size_tgt == 0 {
            return Err(NnError::InvalidConfig("vocabulary sizes must be > 0".into()));
        }
        if self.max_seq_len == 0 {
            return Err(NnError::InvalidConfig("max_seq_len must be > 0".into()));
        }
        if !(0.0..1.0).contains(&self.dropout_prob) {
            return Err(NnError::InvalidConfig(format!(
                "dropout_prob ({}) must be in [0, 1)",
                self.dropout_prob
            )));
        }
        if !self.use_learned_positional_encoding && self.model_dim % 2 != 0 {
            return Err(NnError::InvalidConfig(format!(
                "sinusoidal positional encoding requires an even model_dim, got {}",
                self.model_dim
            )));
        }
        if !(self.layer_norm_eps > 0.0) {
            return Err(NnError::InvalidConfig("layer_norm_eps must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> TransformerConfig {
        TransformerConfig {
            model_dim: 8,
            heads: 2,
            ff_dim: 16,
            n_layers: 1,
            vocab_size_src: 10,
            vocab_size_tgt: 10,
            ..TransformerConfig::default()
        }
    }

    #[test]
    fn test_default_is_valid() {
        let config = TransformerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.head_dim(), 64);
    }

    #[test]
    fn test_heads_must_divide_model_dim() {
        let config = TransformerConfig { heads: 3, ..small() };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("divisible"));
    }

    #[test]
    fn test_dropout_range() {
        assert!(TransformerConfig { dropout_prob: 1.0, ..small() }.validate().is_err());
        assert!(TransformerConfig { dropout_prob: -0.1, ..small() }.validate().is_err());
        assert!(TransformerConfig { dropout_prob: 0.0, ..small() }.validate().is_ok());
    }

    #[test]
    fn test_odd_model_dim_needs_learned_encoding() {
        let odd = TransformerConfig { model_dim: 9, heads: 3, ..small() };
        assert!(odd.validate().is_err());
        let learned = TransformerConfig { use_learned_positional_encoding: true, ..odd };
        assert!(learned.validate().is_ok());
    }

    #[test]
    fn test_zero_layers_allowed() {
        assert!(TransformerConfig { n_layers: 0, ..small() }.validate().is_ok());
    }

    #[test]
    fn test_json_defaults() {
        let json = r#"{
            "model_dim": 8, "heads": 2, "ff_dim": 16, "n_layers": 1,
            "vocab_size_src": 10, "vocab_size_tgt": 12, "ff_activation": "gelu"
        }"#;
        let config = TransformerConfig::from_json_str(json).unwrap();
        assert_eq!(config.ff_activation, Activation::Gelu);
        assert_eq!(config.max_seq_len, 5000);
        assert!((config.dropout_prob - 0.1).abs() < 1e-6);
        assert!(config.attn_bias && config.ff_bias_gate);
    }

    #[test]
    fn test_json_invalid_activation() {
        let json = r#"{
            "model_dim": 8, "heads": 2, "ff_dim": 16, "n_layers": 1,
            "vocab_size_src": 10, "vocab_size_tgt": 10, "ff_activation": "softplus"
        }"#;
        assert!(matches!(TransformerConfig::from_json_str(json), Err(NnError::Json(_))));
    }
}
