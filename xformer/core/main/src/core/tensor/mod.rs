mod ops;
mod tensor;
mod views;

pub use tensor::{Storage, Tensor};
