use thiserror::Error;

use dotref_core::CoreError;

use crate::loader::LoadError;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Invalid model config: {0}")]
    Config(String),

    #[error("Context has {got} features, expected {expected}")]
    ContextSize { expected: usize, got: usize },

    #[error("Token id {id} out of range for vocabulary of {vocab_size}")]
    TokenOutOfRange { id: usize, vocab_size: usize },

    #[error("Declared {declared} markables but {supplied} referent spans were supplied")]
    MarkableCountMismatch { declared: usize, supplied: usize },

    #[error("Position {index} out of range for an utterance of {len} positions")]
    PositionOutOfRange { index: usize, len: usize },

    #[error("{0} is required in this configuration but was not supplied")]
    MissingAuxiliaryInput(&'static str),

    #[error("Invalid mention bounds: min {min} > max {max}")]
    MentionBounds { min: usize, max: usize },

    #[error("Cannot run an empty {0}")]
    EmptyInput(&'static str),
}

pub type Result<T> = std::result::Result<T, ModelError>;
