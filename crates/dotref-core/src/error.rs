use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Tensor of shape {shape:?} holds {numel} elements, got {len}")]
    DataLength {
        shape: Vec<usize>,
        numel: usize,
        len: usize,
    },

    #[error("Expected a {expected}-D tensor, got {got} dimensions")]
    Rank { expected: usize, got: usize },

    #[error("Index {index} out of bounds for axis {axis} with size {size}")]
    IndexOutOfBounds {
        index: usize,
        axis: usize,
        size: usize,
    },

    #[error("Cannot reduce over an empty set of {0}")]
    Empty(&'static str),
}
