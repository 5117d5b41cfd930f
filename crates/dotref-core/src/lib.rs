//! # dotref-core
//!
//! Minimal tensor engine and module trait for dotref.
//! CPU-only, f32-only, no autograd: just what the reference-resolution
//! network needs at inference time.

pub mod error;
pub mod module;
pub mod ops;
pub mod shape;
pub mod tensor;

pub use error::CoreError;
pub use module::Module;
pub use shape::Shape;
pub use tensor::Tensor;

pub type Result<T> = std::result::Result<T, CoreError>;
