//! Explicit execution context threaded through construction and forward calls.

use crate::api::error::TensorResult;
use crate::api::types::{DType, Device, Mode};
use crate::core::runtime::RuntimeConfig;
use crate::core::tensor::Tensor;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

/// Device, parameter precision, mode and the seeded random stream.
///
/// Parameter initialization and dropout draw from the same stream, so a model
/// built from a fresh context with a given seed is reproducible bit for bit.
pub struct ExecutionContext {
    device: Device,
    dtype: DType,
    mode: Mode,
    seed: u64,
    rng: StdRng,
    pool: Option<Arc<rayon::ThreadPool>>,
    ff_inputs: Vec<Tensor>,
}

impl ExecutionContext {
    /// Inference-mode, F32 context on the CPU.
    pub fn new(seed: u64) -> Self {
        Self {
            device: Device::Cpu,
            dtype: DType::F32,
            mode: Mode::Inference,
            seed,
            rng: StdRng::seed_from_u64(seed),
            pool: None,
            ff_inputs: Vec::new(),
        }
    }

    pub fn inference(seed: u64) -> Self {
        Self::new(seed)
    }

    pub fn training(seed: u64) -> Self {
        Self::new(seed).with_mode(Mode::Training)
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Storage precision for parameters created under this context.
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    /// Run forward passes on a dedicated pool built from `config`.
    pub fn with_runtime(mut self, config: &RuntimeConfig) -> TensorResult<Self> {
        self.pool = Some(Arc::new(config.build_pool()?));
        Ok(self)
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn is_training(&self) -> bool {
        self.mode == Mode::Training
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Restart the random stream from `seed`.
    pub fn reseed(&mut self, seed: u64) {
        self.seed = seed;
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Execute `f` inside this context's thread pool, if one was configured.
    pub fn run<R, F>(&mut self, f: F) -> R
    where
        R: Send,
        F: FnOnce(&mut Self) -> R + Send,
    {
        match self.pool.clone() {
            Some(pool) => pool.install(|| f(self)),
            None => f(self),
        }
    }

    /// Store a feed-forward input captured by an instrumented layer.
    pub fn record_ff_input(&mut self, input: Tensor) {
        self.ff_inputs.push(input);
    }

    /// Drain captured feed-forward inputs, in layer execution order.
    pub fn take_ff_inputs(&mut self) -> Vec<Tensor> {
        std::mem::take(&mut self.ff_inputs)
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(0)
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("device", &self.device)
            .field("dtype", &self.dtype)
            .field("mode", &self.mode)
            .field("seed", &self.seed)
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_defaults() {
        let ctx = ExecutionContext::new(1);
        assert_eq!(ctx.device(), Device::Cpu);
        assert_eq!(ctx.dtype(), DType::F32);
        assert!(!ctx.is_training());
        assert!(ExecutionContext::training(1).is_training());
    }

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = ExecutionContext::new(42);
        let mut b = ExecutionContext::new(42);
        let xa: Vec<u32> = (0..8).map(|_| a.rng().r#gen()).collect();
        let xb: Vec<u32> = (0..8).map(|_| b.rng().r#gen()).collect();
        assert_eq!(xa, xb);
    }

    #[test]
    fn test_reseed_restarts_stream() {
        let mut ctx = ExecutionContext::new(5);
        let first: u64 = ctx.rng().r#gen();
        ctx.reseed(5);
        assert_eq!(ctx.rng().r#gen::<u64>(), first);
    }

    #[test]
    fn test_ff_input_capture_drains() {
        let mut ctx = ExecutionContext::new(0);
        ctx.record_ff_input(Tensor::zeros(vec![2]));
        assert_eq!(ctx.take_ff_inputs().len(), 1);
        assert!(ctx.take_ff_inputs().is_empty());
    }

    #[test]
    fn test_run_inside_pool() {
        let mut ctx = ExecutionContext::new(0)
            .with_runtime(&RuntimeConfig::with_threads(2))
            .unwrap();
        let threads = ctx.run(|_| rayon::current_num_threads());
        assert_eq!(threads, 2);
    }
}
