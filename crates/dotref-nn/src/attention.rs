//! Entity attention: scoring a hidden vector against every entity embedding.
//!
//! Two layouts, fixed at construction:
//! - **Shared**: one MLP `[h; e] → 1` used for language attention,
//!   selection and reference alike.
//! - **Split**: a common trunk `[h; e] → nhid_sel` followed by three
//!   distinct final projections, one per use.

use rand::Rng;

use dotref_core::module::{prefixed, prefixed_mut};
use dotref_core::ops::{softmax, weighted_row_sum};
use dotref_core::{Module, Tensor};

use crate::config::ModelConfig;
use crate::error::{ModelError, Result};
use crate::layers::{Linear, Mlp};

/// Which use a score is computed for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScoreHead {
    Lang,
    Sel,
    Ref,
}

#[derive(Clone, Debug)]
pub enum AttentionHeads {
    Shared {
        attn: Mlp,
    },
    Split {
        trunk: Mlp,
        lang: Mlp,
        sel: Mlp,
        refer: Mlp,
    },
}

impl AttentionHeads {
    pub fn new<R: Rng + ?Sized>(config: &ModelConfig, rng: &mut R) -> Self {
        let input = config.nhid_lang + config.nembed_ctx;
        let r = config.init_range;
        if config.share_attn {
            AttentionHeads::Shared {
                attn: Mlp::new(&[input, config.nhid_attn, config.nhid_attn, 1], false, r, rng),
            }
        } else {
            AttentionHeads::Split {
                trunk: Mlp::new(&[input, config.nhid_sel], true, r, rng),
                lang: Mlp::new(&[config.nhid_sel, config.nhid_attn, 1], false, r, rng),
                sel: Mlp::new(&[config.nhid_sel, config.nhid_sel, 1], false, r, rng),
                refer: Mlp::new(&[config.nhid_sel, config.nhid_sel, 1], false, r, rng),
            }
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, AttentionHeads::Shared { .. })
    }

    /// One unnormalised logit per entity for `query` against `ctx_h` rows.
    pub fn score(&self, head: ScoreHead, query: &[f32], ctx_h: &Tensor) -> Result<Vec<f32>> {
        let (num_ent, _) = ctx_h.dims2()?;
        let mut logits = Vec::with_capacity(num_ent);
        let mut joint = Vec::with_capacity(query.len() + ctx_h.dims()[1]);
        for e in 0..num_ent {
            joint.clear();
            joint.extend_from_slice(query);
            joint.extend_from_slice(ctx_h.row(e)?);
            let out = match self {
                AttentionHeads::Shared { attn } => attn.forward_row(&joint),
                AttentionHeads::Split { trunk, lang, sel, refer } => {
                    let t = trunk.forward_row(&joint);
                    match head {
                        ScoreHead::Lang => lang.forward_row(&t),
                        ScoreHead::Sel => sel.forward_row(&t),
                        ScoreHead::Ref => refer.forward_row(&t),
                    }
                }
            };
            logits.push(out[0]);
        }
        Ok(logits)
    }

    /// Language attention: softmax over entities, then a weighted sum of
    /// their embeddings. `bias` is added to the logits first.
    pub fn pool(&self, query: &[f32], ctx_h: &Tensor, bias: Option<&[f32]>) -> Result<(Vec<f32>, Vec<f32>)> {
        let mut logits = self.score(ScoreHead::Lang, query, ctx_h)?;
        add_bias(&mut logits, bias);
        let probs = softmax(&logits);
        let (_, dim) = ctx_h.dims2()?;
        let pooled = weighted_row_sum(&probs, ctx_h.as_slice(), dim);
        Ok((probs, pooled))
    }
}

pub(crate) fn add_bias(logits: &mut [f32], bias: Option<&[f32]>) {
    if let Some(b) = bias {
        logits.iter_mut().zip(b).for_each(|(l, v)| *l += v);
    }
}

impl Module for AttentionHeads {
    /// Scores each `[h; e]` row of the input with the language head.
    fn forward(&self, input: &Tensor) -> dotref_core::Result<Tensor> {
        match self {
            AttentionHeads::Shared { attn } => attn.forward(input),
            AttentionHeads::Split { trunk, lang, .. } => lang.forward(&trunk.forward(input)?),
        }
    }

    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        match self {
            AttentionHeads::Shared { attn } => prefixed("attn", attn.named_parameters()),
            AttentionHeads::Split { trunk, lang, sel, refer } => {
                let mut p = prefixed("attn", trunk.named_parameters());
                p.extend(prefixed("lang_attn", lang.named_parameters()));
                p.extend(prefixed("sel_attn", sel.named_parameters()));
                p.extend(prefixed("ref_attn", refer.named_parameters()));
                p
            }
        }
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        match self {
            AttentionHeads::Shared { attn } => prefixed_mut("attn", attn.named_parameters_mut()),
            AttentionHeads::Split { trunk, lang, sel, refer } => {
                let mut p = prefixed_mut("attn", trunk.named_parameters_mut());
                p.extend(prefixed_mut("lang_attn", lang.named_parameters_mut()));
                p.extend(prefixed_mut("sel_attn", sel.named_parameters_mut()));
                p.extend(prefixed_mut("ref_attn", refer.named_parameters_mut()));
                p
            }
        }
    }
}

/// Belief kinds the network accepts conditioning for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BeliefTarget {
    Generation,
    Ref,
    PartnerRef,
    Mention,
    Selection,
}

/// Per-entity logit offsets from a `(num_ent, belief_dim)` belief matrix.
#[derive(Clone, Debug)]
pub struct BeliefBias {
    generation: Linear,
    refer: Linear,
    partner_ref: Linear,
    mention: Linear,
    selection: Linear,
    belief_dim: usize,
}

impl BeliefBias {
    pub fn new<R: Rng + ?Sized>(belief_dim: usize, init_range: f32, rng: &mut R) -> Self {
        Self {
            generation: Linear::new(belief_dim, 1, init_range, rng),
            refer: Linear::new(belief_dim, 1, init_range, rng),
            partner_ref: Linear::new(belief_dim, 1, init_range, rng),
            mention: Linear::new(belief_dim, 1, init_range, rng),
            selection: Linear::new(belief_dim, 1, init_range, rng),
            belief_dim,
        }
    }

    fn head(&self, target: BeliefTarget) -> &Linear {
        match target {
            BeliefTarget::Generation => &self.generation,
            BeliefTarget::Ref => &self.refer,
            BeliefTarget::PartnerRef => &self.partner_ref,
            BeliefTarget::Mention => &self.mention,
            BeliefTarget::Selection => &self.selection,
        }
    }

    /// `None` in, `None` out: absent beliefs leave the logits untouched.
    pub fn bias(&self, target: BeliefTarget, beliefs: Option<&Tensor>) -> Result<Option<Vec<f32>>> {
        let Some(beliefs) = beliefs else {
            return Ok(None);
        };
        let (num_ent, cols) = beliefs.dims2()?;
        if cols != self.belief_dim {
            return Err(ModelError::Core(dotref_core::CoreError::ShapeMismatch {
                expected: vec![num_ent, self.belief_dim],
                got: vec![num_ent, cols],
            }));
        }
        let head = self.head(target);
        let bias = (0..num_ent)
            .map(|e| beliefs.row(e).map(|row| head.forward_row(row)[0]))
            .collect::<dotref_core::Result<Vec<f32>>>()?;
        Ok(Some(bias))
    }
}

impl Module for BeliefBias {
    fn forward(&self, input: &Tensor) -> dotref_core::Result<Tensor> {
        self.generation.forward(input)
    }

    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut p = prefixed("generation", self.generation.named_parameters());
        p.extend(prefixed("ref", self.refer.named_parameters()));
        p.extend(prefixed("partner_ref", self.partner_ref.named_parameters()));
        p.extend(prefixed("mention", self.mention.named_parameters()));
        p.extend(prefixed("selection", self.selection.named_parameters()));
        p
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut p = prefixed_mut("generation", self.generation.named_parameters_mut());
        p.extend(prefixed_mut("ref", self.refer.named_parameters_mut()));
        p.extend(prefixed_mut("partner_ref", self.partner_ref.named_parameters_mut()));
        p.extend(prefixed_mut("mention", self.mention.named_parameters_mut()));
        p.extend(prefixed_mut("selection", self.selection.named_parameters_mut()));
        p
    }
}
