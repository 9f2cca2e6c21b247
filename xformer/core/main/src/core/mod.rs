pub mod context;
pub mod runtime;
pub mod shape;
pub mod tensor;
