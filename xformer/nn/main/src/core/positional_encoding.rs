//! Fixed sinusoidal and learned positional encodings.

use crate::api::error::{NnError, NnResult};
use crate::api::traits::Module;
use xformer_core::Tensor;

/// Sinusoidal table of shape `[max_len, 1, d_model]`.
///
/// Channel `2i` of position `p` holds `sin(p / 10000^(2i/d_model))`, channel
/// `2i + 1` the cosine of the same angle.
pub fn sinusoidal_table(d_model: usize, max_len: usize) -> NnResult<Tensor> {
    if d_model == 0 || d_model % 2 != 0 {
        return Err(NnError::InvalidConfig(format!(
            "sinusoidal positional encoding requires an even, non-zero d_model, got {}",
            d_model
        )));
    }
    let mut data = vec![0.0f32; max_len * d_model];
    for pos in 0..max_len {
        let row = &mut data[pos * d_model..(pos + 1) * d_model];
        for i in (0..d_model).step_by(2) {
            let inv_freq = (-(10000.0f64).ln() * i as f64 / d_model as f64).exp();
            let angle = pos as f64 * inv_freq;
            row[i] = angle.sin() as f32;
            row[i + 1] = angle.cos() as f32;
        }
    }
    Ok(Tensor::from_vec(data, [max_len, 1, d_model])?)
}

/// Per-position vectors added to scaled token embeddings.
#[derive(Debug, Clone)]
pub enum PositionalEncoding {
    /// Precomputed and never trained.
    Sinusoidal { table: Tensor },
    /// Trainable, starts at zero.
    Learned { weight: Tensor },
}

impl PositionalEncoding {
    pub fn sinusoidal(d_model: usize, max_len: usize) -> NnResult<Self> {
        Ok(Self::Sinusoidal {
            table: sinusoidal_table(d_model, max_len)?,
        })
    }

    pub fn learned(d_model: usize, max_len: usize) -> Self {
        Self::Learned {
            weight: Tensor::zeros([max_len, 1, d_model]),
        }
    }

    pub fn is_learned(&self) -> bool {
        matches!(self, Self::Learned { .. })
    }

    fn table(&self) -> &Tensor {
        match self {
            Self::Sinusoidal { table } => table,
            Self::Learned { weight } => weight,
        }
    }

    pub fn max_len(&self) -> usize {
        self.table().shape()[0]
    }

    pub fn d_model(&self) -> usize {
        self.table().shape()[2]
    }

    /// The first `seq_len` rows, shaped `[seq_len, 1, d_model]`.
    pub fn forward(&self, seq_len: usize) -> NnResult<Tensor> {
        let max = self.max_len();
        if seq_len > max {
            return Err(NnError::SequenceLengthExceeded {
                max,
                actual: seq_len,
            });
        }
        Ok(self.table().to_f32()?.slice(0, 0, seq_len)?)
    }
}

impl Module for PositionalEncoding {
    fn parameters(&self) -> Vec<&Tensor> {
        match self {
            Self::Sinusoidal { .. } => Vec::new(),
            Self::Learned { weight } => vec![weight],
        }
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        match self {
            Self::Sinusoidal { .. } => Vec::new(),
            Self::Learned { weight } => vec![weight],
        }
    }
}
