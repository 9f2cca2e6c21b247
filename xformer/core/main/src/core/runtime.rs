use crate::api::error::{TensorError, TensorResult};

/// Runtime configuration for parallelism and thread management.
///
/// Applied through [`crate::ExecutionContext::with_runtime`], which owns the
/// resulting thread pool; nothing here touches process-wide state.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Number of threads for rayon parallelism.
    /// 0 means auto-detect (use all available cores).
    pub num_threads: usize,
}

impl RuntimeConfig {
    pub fn with_threads(num_threads: usize) -> Self {
        Self { num_threads }
    }

    /// Build a dedicated rayon pool for this configuration.
    pub fn build_pool(&self) -> TensorResult<rayon::ThreadPool> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .thread_name(|i| format!("xformer-worker-{}", i))
            .build()
            .map_err(|e| {
                TensorError::InvalidOperation(format!("Failed to build rayon thread pool: {}", e))
            })?;
        log::info!("[runtime] rayon pool with {} threads", pool.current_num_threads());
        Ok(pool)
    }
}
