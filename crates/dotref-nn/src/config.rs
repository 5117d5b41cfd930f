//! Reference model configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// How the recurrent state is carried from one utterance to the next.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStructure {
    /// The word-level hidden state flows straight into the next utterance.
    Flat,
    /// A sentence-level GRU consumes each utterance's final word-level state
    /// and its output seeds the next utterance.
    Hierarchical,
}

/// Top-level model configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelConfig {
    pub vocab_size: usize,
    /// Entities per scene, as reported by the domain.
    pub num_ent: usize,
    /// Features per entity, as reported by the domain.
    pub dim_ent: usize,
    #[serde(default = "default_nembed_word")]
    pub nembed_word: usize,
    #[serde(default = "default_nembed_ctx")]
    pub nembed_ctx: usize,
    #[serde(default = "default_nhid_lang")]
    pub nhid_lang: usize,
    #[serde(default = "default_nhid_attn")]
    pub nhid_attn: usize,
    #[serde(default = "default_nhid_sel")]
    pub nhid_sel: usize,
    /// Hidden size of the relational context encoder.
    #[serde(default = "default_nhid_rel")]
    pub nhid_rel: usize,
    /// One scorer for language attention, selection and reference instead
    /// of a shared trunk with three heads.
    #[serde(default)]
    pub share_attn: bool,
    /// Pool the whole utterance with attention for selection instead of
    /// gathering the hidden state at the selection token.
    #[serde(default)]
    pub selection_attention: bool,
    /// Shift each utterance's initial hidden state by the entities it mentions.
    #[serde(default)]
    pub feed_context_attend: bool,
    #[serde(default = "default_turn_structure")]
    pub turn_structure: TurnStructure,
    /// Largest number of referring expressions the mention planner predicts.
    #[serde(default = "default_max_mentions")]
    pub max_mentions: usize,
    /// Columns of the per-entity belief matrices fed to the scorers.
    #[serde(default = "default_belief_dim")]
    pub belief_dim: usize,
    #[serde(default = "default_init_range")]
    pub init_range: f32,
    /// Seed for parameter initialisation.
    #[serde(default)]
    pub init_seed: u64,
}

fn default_nembed_word() -> usize { 128 }
fn default_nembed_ctx() -> usize { 128 }
fn default_nhid_lang() -> usize { 128 }
fn default_nhid_attn() -> usize { 64 }
fn default_nhid_sel() -> usize { 64 }
fn default_nhid_rel() -> usize { 64 }
fn default_turn_structure() -> TurnStructure { TurnStructure::Hierarchical }
fn default_max_mentions() -> usize { 12 }
fn default_belief_dim() -> usize { 6 }
fn default_init_range() -> f32 { 0.1 }

impl ModelConfig {
    /// OneCommon preset: seven dots with (x, y, size, colour) each.
    pub fn onecommon(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            num_ent: 7,
            dim_ent: 4,
            nembed_word: default_nembed_word(),
            nembed_ctx: default_nembed_ctx(),
            nhid_lang: default_nhid_lang(),
            nhid_attn: default_nhid_attn(),
            nhid_sel: default_nhid_sel(),
            nhid_rel: default_nhid_rel(),
            share_attn: false,
            selection_attention: false,
            feed_context_attend: false,
            turn_structure: default_turn_structure(),
            max_mentions: default_max_mentions(),
            belief_dim: default_belief_dim(),
            init_range: default_init_range(),
            init_seed: 0,
        }
    }

    /// A tiny config for unit tests.
    pub fn tiny(vocab_size: usize, num_ent: usize) -> Self {
        Self {
            vocab_size,
            num_ent,
            dim_ent: 4,
            nembed_word: 16,
            nembed_ctx: 16,
            nhid_lang: 16,
            nhid_attn: 8,
            nhid_sel: 8,
            nhid_rel: 8,
            max_mentions: 4,
            ..Self::onecommon(vocab_size)
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let dims = [
            ("vocab_size", self.vocab_size),
            ("num_ent", self.num_ent),
            ("dim_ent", self.dim_ent),
            ("nembed_word", self.nembed_word),
            ("nembed_ctx", self.nembed_ctx),
            ("nhid_lang", self.nhid_lang),
            ("nhid_attn", self.nhid_attn),
            ("nhid_sel", self.nhid_sel),
            ("nhid_rel", self.nhid_rel),
            ("max_mentions", self.max_mentions),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(ModelError::Config(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }
}

/// Load a `ModelConfig` from a JSON file.
pub fn load_config(path: &Path) -> Result<ModelConfig, ModelError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ModelError::Config(format!("{}: {e}", path.display())))?;
    let config: ModelConfig =
        serde_json::from_str(&text).map_err(|e| ModelError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_config_defaults() {
        let json = r#"{
            "vocab_size": 500,
            "num_ent": 7,
            "dim_ent": 4,
            "share_attn": true,
            "turn_structure": "flat"
        }"#;
        let cfg: ModelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.nhid_lang, 128);
        assert_eq!(cfg.max_mentions, 12);
        assert!(cfg.share_attn);
        assert!(!cfg.selection_attention);
        assert_eq!(cfg.turn_structure, TurnStructure::Flat);
    }

    #[test]
    fn test_validate_rejects_zero_dims() {
        let mut cfg = ModelConfig::tiny(10, 3);
        assert!(cfg.validate().is_ok());
        cfg.nhid_lang = 0;
        assert!(matches!(cfg.validate(), Err(ModelError::Config(_))));
    }

    #[test]
    fn test_tiny_preset() {
        let cfg = ModelConfig::tiny(32, 3);
        assert_eq!(cfg.num_ent, 3);
        assert_eq!(cfg.turn_structure, TurnStructure::Hierarchical);
    }
}
