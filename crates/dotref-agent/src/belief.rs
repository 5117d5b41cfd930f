//! Belief construction: conditioning tensors derived from earlier predictions.
//!
//! A belief tensor has one row per entity and one column per
//! [`BeliefSource`]; columns the constructor does not enable for the
//! requested kind stay zero.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use dotref_core::{CoreError, Tensor};
use dotref_nn::BeliefTarget;

/// What the beliefs are built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeliefKind {
    Ref,
    PartnerRef,
    Mention,
    Generation,
    Selection,
}

impl BeliefKind {
    pub fn target(self) -> BeliefTarget {
        match self {
            BeliefKind::Ref => BeliefTarget::Ref,
            BeliefKind::PartnerRef => BeliefTarget::PartnerRef,
            BeliefKind::Mention => BeliefTarget::Mention,
            BeliefKind::Generation => BeliefTarget::Generation,
            BeliefKind::Selection => BeliefTarget::Selection,
        }
    }
}

/// One column of a belief tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeliefSource {
    /// Entities referred to in the agent's most recent utterance with markables.
    SelfLast,
    /// Same for the partner.
    PartnerLast,
    /// Entities the agent has referred to so far.
    SelfCumulative,
    PartnerCumulative,
    /// Entities predicted as selected in earlier selection utterances.
    PreviouslySelected,
    /// Entities the latest mention plan expects to be mentioned.
    PlannedMentions,
}

impl BeliefSource {
    pub const ALL: [BeliefSource; 6] = [
        BeliefSource::SelfLast,
        BeliefSource::PartnerLast,
        BeliefSource::SelfCumulative,
        BeliefSource::PartnerCumulative,
        BeliefSource::PreviouslySelected,
        BeliefSource::PlannedMentions,
    ];

    pub fn column(self) -> usize {
        self as usize
    }
}

/// Width of every belief tensor.
pub const BELIEF_WIDTH: usize = BeliefSource::ALL.len();

/// Which sources feed each belief kind.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BeliefConstructor {
    sources: HashMap<BeliefKind, Vec<BeliefSource>>,
}

impl BeliefConstructor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every kind uses the same sources.
    pub fn uniform(sources: &[BeliefSource]) -> Self {
        let kinds = [
            BeliefKind::Ref,
            BeliefKind::PartnerRef,
            BeliefKind::Mention,
            BeliefKind::Generation,
            BeliefKind::Selection,
        ];
        Self {
            sources: kinds.into_iter().map(|k| (k, sources.to_vec())).collect(),
        }
    }

    pub fn with(mut self, kind: BeliefKind, sources: &[BeliefSource]) -> Self {
        self.sources.insert(kind, sources.to_vec());
        self
    }

    pub fn sources(&self, kind: BeliefKind) -> &[BeliefSource] {
        self.sources.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Everything predicted so far in a dialogue, as probabilities.
///
/// `ref_outs`, `partner_ref_outs` and `sel_outs` hold one entry per turn;
/// `mention_outs` is primed at context time and so holds one more.
#[derive(Clone, Debug, Default)]
pub struct BeliefAccumulators {
    pub(crate) ref_outs: Vec<Option<Tensor>>,
    pub(crate) partner_ref_outs: Vec<Option<Tensor>>,
    pub(crate) mention_outs: Vec<Vec<f32>>,
    pub(crate) sel_outs: Vec<Option<Vec<f32>>>,
}

impl BeliefAccumulators {
    /// `(num_markables, num_ent)` probabilities per turn, `None` without markables.
    pub fn ref_outs(&self) -> &[Option<Tensor>] {
        &self.ref_outs
    }

    pub fn partner_ref_outs(&self) -> &[Option<Tensor>] {
        &self.partner_ref_outs
    }

    /// Per-entity mention probabilities, primed entry first.
    pub fn mention_outs(&self) -> &[Vec<f32>] {
        &self.mention_outs
    }

    /// Selection distribution for turns containing the selection token.
    pub fn sel_outs(&self) -> &[Option<Vec<f32>>] {
        &self.sel_outs
    }

    fn column(&self, source: BeliefSource, num_ent: usize) -> Vec<f32> {
        match source {
            BeliefSource::SelfLast => last_referents(&self.ref_outs, num_ent),
            BeliefSource::PartnerLast => last_referents(&self.partner_ref_outs, num_ent),
            BeliefSource::SelfCumulative => cumulative_referents(&self.ref_outs, num_ent),
            BeliefSource::PartnerCumulative => cumulative_referents(&self.partner_ref_outs, num_ent),
            BeliefSource::PreviouslySelected => {
                let mut acc = vec![0.0; num_ent];
                for probs in self.sel_outs.iter().flatten() {
                    elementwise_max(&mut acc, probs);
                }
                acc
            }
            BeliefSource::PlannedMentions => self
                .mention_outs
                .last()
                .cloned()
                .unwrap_or_else(|| vec![0.0; num_ent]),
        }
    }

    /// `(num_ent, BELIEF_WIDTH)` tensor with the given sources filled in.
    pub fn build(&self, sources: &[BeliefSource], num_ent: usize) -> Result<Tensor, CoreError> {
        let mut data = vec![0.0f32; num_ent * BELIEF_WIDTH];
        for &source in sources {
            let col = self.column(source, num_ent);
            for (e, v) in col.iter().take(num_ent).enumerate() {
                data[e * BELIEF_WIDTH + source.column()] = *v;
            }
        }
        Tensor::from_vec(data, &[num_ent, BELIEF_WIDTH])
    }
}

/// Per-entity maximum over the markables of one turn.
pub(crate) fn entity_max(probs: &Tensor, num_ent: usize) -> Vec<f32> {
    let mut acc = vec![0.0f32; num_ent];
    for row in probs.as_slice().chunks(num_ent.max(1)) {
        elementwise_max(&mut acc, row);
    }
    acc
}

fn elementwise_max(acc: &mut [f32], values: &[f32]) {
    acc.iter_mut().zip(values).for_each(|(a, v)| *a = a.max(*v));
}

fn last_referents(outs: &[Option<Tensor>], num_ent: usize) -> Vec<f32> {
    outs.iter()
        .rev()
        .flatten()
        .next()
        .map_or_else(|| vec![0.0; num_ent], |t| entity_max(t, num_ent))
}

fn cumulative_referents(outs: &[Option<Tensor>], num_ent: usize) -> Vec<f32> {
    let mut acc = vec![0.0; num_ent];
    for t in outs.iter().flatten() {
        elementwise_max(&mut acc, &entity_max(t, num_ent));
    }
    acc
}
