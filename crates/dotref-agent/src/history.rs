//! Per-turn records kept by the agent.

use dotref_core::Tensor;
use dotref_nn::MentionPlan;

use crate::markable::{Markable, RefSpan};

/// Who produced an utterance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Written by this agent.
    You,
    /// Read from the partner.
    Them,
}

#[derive(Clone, Debug)]
pub struct TurnRecord {
    pub role: Role,
    /// Token ids, role marker first.
    pub tokens: Vec<usize>,
    /// Log-probabilities of generated tokens; empty for read turns.
    pub logprobs: Vec<f32>,
    /// `(tokens.len(), nhid_lang)` reader trajectory.
    pub reader_hs: Tensor,
    /// Writer trajectory; the reader trajectory again for read turns.
    pub writer_hs: Tensor,
    pub ref_spans: Option<Vec<RefSpan>>,
    pub partner_ref_spans: Option<Vec<RefSpan>>,
    /// `(num_markables, num_ent)` logits for the agent's own markables.
    pub ref_out: Option<Tensor>,
    pub partner_ref_out: Option<Tensor>,
    pub markables: Vec<Markable>,
    pub partner_markables: Vec<Markable>,
    /// The plan made before this utterance.
    pub mention_plan: MentionPlan,
    /// Predicted probability, before this utterance, that it would be the selection.
    pub is_selection_prob: f32,
    /// Selection logits, when the utterance contains the selection token.
    pub sel_out: Option<Vec<f32>>,
}

/// Everything recorded since the last `feed_context`.
///
/// `turns` grows by one per read or write. The mention-plan and
/// is-selection sequences are primed at context time and stay one longer.
#[derive(Clone, Debug, Default)]
pub struct DialogueHistory {
    pub turns: Vec<TurnRecord>,
    pub next_mention_outs: Vec<MentionPlan>,
    pub is_selection_outs: Vec<f32>,
}

impl DialogueHistory {
    pub(crate) fn primed(plan: MentionPlan, is_selection: f32) -> Self {
        Self {
            turns: Vec::new(),
            next_mention_outs: vec![plan],
            is_selection_outs: vec![is_selection],
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn ref_outs(&self) -> impl Iterator<Item = Option<&Tensor>> {
        self.turns.iter().map(|t| t.ref_out.as_ref())
    }

    pub fn partner_ref_outs(&self) -> impl Iterator<Item = Option<&Tensor>> {
        self.turns.iter().map(|t| t.partner_ref_out.as_ref())
    }

    /// Selection logits of every turn that made one.
    pub fn sel_outs(&self) -> impl Iterator<Item = &Vec<f32>> {
        self.turns.iter().filter_map(|t| t.sel_out.as_ref())
    }

    /// All reader trajectories stacked in turn order.
    pub fn reader_trajectory(&self, hidden: usize) -> Result<Tensor, dotref_core::CoreError> {
        let parts: Vec<&Tensor> = self.turns.iter().map(|t| &t.reader_hs).collect();
        Tensor::concat_rows(&parts, hidden)
    }

    pub(crate) fn push(&mut self, record: TurnRecord, next_plan: MentionPlan, is_selection: f32) {
        self.turns.push(record);
        self.next_mention_outs.push(next_plan);
        self.is_selection_outs.push(is_selection);
    }
}
