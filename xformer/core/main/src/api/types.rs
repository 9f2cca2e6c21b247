//! Core types for tensor operations

/// Where tensor storage lives and kernels run.
///
/// Only host memory is supported. Every tensor and every
/// [`crate::ExecutionContext`] reports `Cpu`, and the variant exists so
/// callers can match on placement without a breaking change when another
/// backend appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Cpu,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
        }
    }
}

/// Data type for tensor elements.
///
/// Arithmetic always runs in F32; the half-precision types are storage formats
/// that are widened with [`crate::Tensor::to_f32`] before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DType {
    #[default]
    F32,
    F16,
    BF16,
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F16 => write!(f, "f16"),
            DType::BF16 => write!(f, "bf16"),
        }
    }
}

/// Whether stochastic layers (dropout) are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Inference,
    Training,
}
