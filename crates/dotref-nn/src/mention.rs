//! Mention planning: before an utterance is produced, predict how many
//! referring expressions it will contain and which entities each one names.

use rand::Rng;

use dotref_core::module::{prefixed, prefixed_mut};
use dotref_core::ops::{argmax, sigmoid};
use dotref_core::{Module, Tensor};

use crate::attention::{add_bias, AttentionHeads, ScoreHead};
use crate::config::ModelConfig;
use crate::error::{ModelError, Result};
use crate::layers::Mlp;

/// How the number of mentions is decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MentionMode {
    /// Argmax of the count distribution.
    Free,
    /// The caller knows the exact number (oracle / training conditions).
    Forced(usize),
    /// Argmax restricted to `min..=max`.
    Bounded { min: usize, max: usize },
}

impl MentionMode {
    /// The mode implied by the agent-level knobs.
    pub fn from_request(force: Option<usize>, min: usize, max: usize) -> Self {
        match force {
            Some(n) => MentionMode::Forced(n),
            None if min == 0 && max == usize::MAX => MentionMode::Free,
            None => MentionMode::Bounded { min, max },
        }
    }
}

/// Prediction for one upcoming utterance.
#[derive(Clone, Debug, PartialEq)]
pub struct MentionPlan {
    pub num_markables: usize,
    /// Logits over `0..=max_mentions` mentions.
    pub count_logits: Vec<f32>,
    /// `(num_markables, num_ent)` entity logits, one row per planned mention.
    pub dot_logits: Tensor,
}

impl MentionPlan {
    /// Per-entity probability of being mentioned at least once, taken as
    /// the maximum sigmoid over planned mentions (zeros when none are planned).
    pub fn entity_probabilities(&self) -> Vec<f32> {
        let Ok((rows, cols)) = self.dot_logits.dims2() else {
            return Vec::new();
        };
        let data = self.dot_logits.as_slice();
        (0..cols)
            .map(|e| (0..rows).map(|m| sigmoid(data[m * cols + e])).fold(0.0, f32::max))
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct MentionPlanner {
    count_head: Mlp,
    /// Learned per-slot offsets added to the query, `(max_mentions, nhid_lang)`.
    slot_embed: Tensor,
    max_mentions: usize,
}

impl MentionPlanner {
    pub fn new<R: Rng + ?Sized>(config: &ModelConfig, rng: &mut R) -> Self {
        Self {
            count_head: Mlp::new(
                &[config.nhid_lang, config.nhid_attn, config.max_mentions + 1],
                false,
                config.init_range,
                rng,
            ),
            slot_embed: Tensor::rand_uniform(&[config.max_mentions, config.nhid_lang], config.init_range, rng),
            max_mentions: config.max_mentions,
        }
    }

    pub fn max_mentions(&self) -> usize {
        self.max_mentions
    }

    pub fn predict(
        &self,
        query: &[f32],
        ctx_h: &Tensor,
        heads: &AttentionHeads,
        bias: Option<&[f32]>,
        mode: MentionMode,
    ) -> Result<MentionPlan> {
        let count_logits = self.count_head.forward_row(query);
        let num_markables = match mode {
            MentionMode::Forced(n) => n,
            MentionMode::Free => argmax(&count_logits).unwrap_or(0),
            MentionMode::Bounded { min, max } => {
                if min > max {
                    return Err(ModelError::MentionBounds { min, max });
                }
                let lo = min.min(self.max_mentions);
                let hi = max.min(self.max_mentions);
                lo + argmax(&count_logits[lo..=hi]).unwrap_or(0)
            }
        };

        let (num_ent, _) = ctx_h.dims2()?;
        let mut rows = Vec::with_capacity(num_markables);
        for m in 0..num_markables {
            let slot = self.slot_embed.row(m.min(self.max_mentions - 1))?;
            let q: Vec<f32> = query.iter().zip(slot).map(|(a, b)| a + b).collect();
            let mut logits = heads.score(ScoreHead::Ref, &q, ctx_h)?;
            add_bias(&mut logits, bias);
            rows.push(logits);
        }

        Ok(MentionPlan {
            num_markables,
            count_logits,
            dot_logits: Tensor::stack_rows(&rows, num_ent)?,
        })
    }
}

impl Module for MentionPlanner {
    /// Count logits for each query row.
    fn forward(&self, input: &Tensor) -> dotref_core::Result<Tensor> {
        self.count_head.forward(input)
    }

    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut p = prefixed("count_head", self.count_head.named_parameters());
        p.push(("slot_embed.weight".into(), &self.slot_embed));
        p
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut p = prefixed_mut("count_head", self.count_head.named_parameters_mut());
        p.push(("slot_embed.weight".into(), &mut self.slot_embed));
        p
    }
}
