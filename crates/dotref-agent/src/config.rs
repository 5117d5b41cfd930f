//! Agent behaviour configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::vocab::{EOS, SELECTION};

fn default_temperature() -> f32 {
    0.25
}
fn default_max_words() -> usize {
    100
}
fn default_stop_tokens() -> Vec<String> {
    vec![EOS.to_string(), SELECTION.to_string()]
}
fn default_max_num_mentions() -> usize {
    12
}
fn default_domain() -> String {
    "one_common".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Sampling temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Online training. Not available; constructing an agent with it fails.
    #[serde(default)]
    pub train: bool,
    /// Seed of the agent's sampling RNG.
    #[serde(default)]
    pub seed: u64,
    /// Default cap on generated tokens per utterance.
    #[serde(default = "default_max_words")]
    pub max_words: usize,
    /// Tokens that end generation.
    #[serde(default = "default_stop_tokens")]
    pub stop_tokens: Vec<String>,
    /// Upper bound on the mentions planned for an utterance.
    #[serde(default = "default_max_num_mentions")]
    pub max_num_mentions: usize,
    #[serde(default = "default_domain")]
    pub domain: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            train: false,
            seed: 0,
            max_words: default_max_words(),
            stop_tokens: default_stop_tokens(),
            max_num_mentions: default_max_num_mentions(),
            domain: default_domain(),
        }
    }
}

impl AgentConfig {
    /// Tiny preset for unit tests.
    pub fn tiny() -> Self {
        Self {
            max_words: 12,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.temperature > 0.0) {
            return Err(AgentError::Config(format!(
                "temperature must be > 0, got {}",
                self.temperature
            )));
        }
        if self.stop_tokens.is_empty() {
            return Err(AgentError::Config("at least one stop token is required".into()));
        }
        Ok(())
    }
}

/// Load an `AgentConfig` from a JSON file.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AgentError::Config(format!("{}: {e}", path.display())))?;
    let config: AgentConfig =
        serde_json::from_str(&text).map_err(|e| AgentError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
