//! Types for neural network layers

use serde::{Deserialize, Serialize};

/// Activation applied to the first feed-forward projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Relu,
    /// tanh approximation
    Gelu,
    Silu,
    Sigmoid,
}

/// Bias switches for the three feed-forward projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedForwardBias {
    pub layer1: bool,
    pub layer2: bool,
    pub gate: bool,
}

impl Default for FeedForwardBias {
    fn default() -> Self {
        Self {
            layer1: true,
            layer2: true,
            gate: true,
        }
    }
}
