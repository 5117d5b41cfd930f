use thiserror::Error;

use dotref_core::CoreError;
use dotref_nn::ModelError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("{0} called before feed_context")]
    NotInitialized(&'static str),

    #[error("Utterance contains {count} selection tokens, expected at most one")]
    MultipleSelectionTokens { count: usize },

    #[error("{0} is required in this configuration but was not supplied")]
    MissingAuxiliaryInput(&'static str),

    #[error("Markable detection requested but no detector is attached")]
    MissingMarkableDetector,

    #[error("Token id {0} is not in the vocabulary")]
    UnknownToken(usize),

    #[error("Invalid context: {0}")]
    InvalidContext(String),

    #[error("Invalid agent config: {0}")]
    Config(String),

    #[error("Not supported: {0}")]
    Unsupported(&'static str),
}

pub type Result<T> = std::result::Result<T, AgentError>;
