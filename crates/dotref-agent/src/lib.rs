//! # dotref-agent
//!
//! A dialogue agent that talks about a shared scene of dots and resolves
//! what its partner refers to.
//!
//! One [`RnnAgent`] serves one dialogue at a time:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dotref_agent::{get_domain, model_for, AgentConfig, Context, ContextOptions, ReadOptions, RnnAgent, WordDict, WriteOptions};
//! use dotref_nn::ModelConfig;
//!
//! let vocab = WordDict::from_words(["the", "large", "dot"]);
//! let model = model_for(&vocab, ModelConfig::onecommon(vocab.len())).unwrap();
//! let mut agent = RnnAgent::new(
//!     "alice",
//!     Arc::new(model),
//!     Arc::new(vocab),
//!     get_domain("one_common").unwrap(),
//!     AgentConfig::default(),
//! )
//! .unwrap();
//!
//! agent.feed_context(Context::new(vec![0.0; 28]), ContextOptions::default()).unwrap();
//! agent.read(&["the", "large", "dot"], &ReadOptions::default()).unwrap();
//! let reply = agent.write(&WriteOptions::default()).unwrap();
//! let choice = agent.choose().unwrap();
//! ```

pub mod agent;
pub mod belief;
pub mod config;
pub mod domain;
pub mod error;
pub mod history;
pub mod markable;
pub mod state;
pub mod vocab;

pub use agent::{model_for, Choice, Context, ContextOptions, ReadOptions, RnnAgent, WriteOptions};
pub use belief::{BeliefAccumulators, BeliefConstructor, BeliefKind, BeliefSource, BELIEF_WIDTH};
pub use config::{load_config, AgentConfig};
pub use domain::{get_domain, CustomDomain, Domain, OneCommonDomain};
pub use error::{AgentError, Result};
pub use history::{DialogueHistory, Role, TurnRecord};
pub use markable::{normalize_marker, LexiconDetector, Markable, MarkableDetector, RefSpan};
pub use state::DialogueState;
pub use vocab::WordDict;
