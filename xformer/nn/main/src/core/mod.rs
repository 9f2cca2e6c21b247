pub mod attention;
pub mod dropout;
pub mod embedding;
pub mod feed_forward;
pub mod generator;
pub mod init;
pub mod layer_norm;
pub mod linear;
pub mod mask;
pub mod model;
pub mod positional_encoding;
pub mod stack;
pub mod transformer_layer;
