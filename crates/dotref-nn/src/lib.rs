//! # dotref-nn
//!
//! The recurrent reference-resolution network behind the dotref agent.
//!
//! A single GRU reads partner utterances and writes the agent's own
//! (Reader and Writer share weights), entity attention grounds the hidden
//! state in the scene, and dedicated heads resolve referring expressions,
//! predict the final selection and plan the mentions of the next utterance.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dotref_nn::{ModelConfig, ReferenceModel, WriteRequest};
//! use rand::SeedableRng;
//!
//! let model = ReferenceModel::new(ModelConfig::tiny(32, 7), &[0, 1, 2, 3]).unwrap();
//! let ctx_h = model.encode_context(&vec![0.1; 7 * 4]).unwrap();
//! let read = model.read(&[1, 8, 9, 5], &model.initial_hidden()).unwrap();
//! let req = WriteRequest {
//!     start_token: 1,
//!     stop_tokens: &[5],
//!     max_words: 20,
//!     temperature: 0.25,
//!     force_words: None,
//!     lang_bias: None,
//! };
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//! let out = model.write(&ctx_h, &read.last_h, &req, &mut rng).unwrap();
//! ```

pub mod attention;
pub mod batch;
pub mod config;
pub mod ctx_encoder;
pub mod error;
pub mod gru;
pub mod layers;
pub mod loader;
pub mod mention;
pub mod model;
pub mod sampler;

pub use attention::{AttentionHeads, BeliefBias, BeliefTarget, ScoreHead};
pub use batch::{BatchOutput, DialogueBatch, SentenceBatch, SentenceOutput};
pub use config::{load_config, ModelConfig, TurnStructure};
pub use ctx_encoder::ContextEncoder;
pub use error::{ModelError, Result};
pub use gru::{GruCell, PackedOutput};
pub use layers::{Embedding, Linear, Mlp};
pub use loader::{load_weights, save_weights, LoadError};
pub use mention::{MentionMode, MentionPlan, MentionPlanner};
pub use model::{ReadOutput, ReferenceModel, SpanIndices, TurnRecurrence, WriteOutput, WriteRequest};
