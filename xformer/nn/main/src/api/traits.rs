//! Neural network traits

use xformer_core::Tensor;

/// Access to a layer's learnable parameters.
pub trait Module {
    fn parameters(&self) -> Vec<&Tensor>;

    fn parameters_mut(&mut self) -> Vec<&mut Tensor>;

    /// Total number of learnable scalars.
    fn parameter_count(&self) -> usize {
        self.parameters().iter().map(|p| p.numel()).sum()
    }
}
