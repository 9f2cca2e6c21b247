//! Facade re-exports for xformer-core

pub use crate::api::types::*;
pub use crate::api::error::*;
pub use crate::core::tensor::{Tensor, Storage};
pub use crate::core::shape::Shape;
pub use crate::core::context::ExecutionContext;
pub use crate::core::runtime::RuntimeConfig;
