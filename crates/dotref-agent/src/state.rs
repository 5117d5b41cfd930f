//! Dialogue state: the value threaded through every turn.
//!
//! A state is never modified in place. Each transition consumes the
//! current state and returns its successor, so a failed turn leaves the
//! caller's previous state intact.

use dotref_core::Tensor;

use crate::belief::{BeliefAccumulators, BeliefConstructor, BeliefKind};
use crate::error::Result;

#[derive(Clone, Debug)]
pub struct DialogueState {
    turn: usize,
    ctx_h: Tensor,
    num_ent: usize,
    recurrent_hidden: Vec<f32>,
    accumulators: BeliefAccumulators,
    belief_constructor: Option<BeliefConstructor>,
}

impl DialogueState {
    /// Turn 0, nothing accumulated yet.
    pub fn new(ctx_h: Tensor, initial_hidden: Vec<f32>, belief_constructor: Option<BeliefConstructor>) -> Self {
        let num_ent = ctx_h.dims().first().copied().unwrap_or(0);
        Self {
            turn: 0,
            ctx_h,
            num_ent,
            recurrent_hidden: initial_hidden,
            accumulators: BeliefAccumulators::default(),
            belief_constructor,
        }
    }

    pub fn turn(&self) -> usize {
        self.turn
    }

    /// `(num_ent, nembed_ctx)` entity embeddings, fixed for the dialogue.
    pub fn ctx_h(&self) -> &Tensor {
        &self.ctx_h
    }

    pub fn num_ent(&self) -> usize {
        self.num_ent
    }

    pub fn recurrent_hidden(&self) -> &[f32] {
        &self.recurrent_hidden
    }

    pub fn accumulators(&self) -> &BeliefAccumulators {
        &self.accumulators
    }

    pub fn belief_constructor(&self) -> Option<&BeliefConstructor> {
        self.belief_constructor.as_ref()
    }

    /// Conditioning tensor for `kind`, or `None` when no sources are configured.
    pub fn make_beliefs(&self, kind: BeliefKind) -> Result<Option<Tensor>> {
        let Some(constructor) = &self.belief_constructor else {
            return Ok(None);
        };
        let sources = constructor.sources(kind);
        if sources.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.accumulators.build(sources, self.num_ent)?))
    }

    /// Record the mention plan made before any turn.
    pub fn with_primed_mentions(mut self, planned: Vec<f32>) -> Self {
        debug_assert!(self.accumulators.mention_outs.is_empty());
        self.accumulators.mention_outs.push(planned);
        self
    }

    /// Store this turn's referent probabilities and the carried hidden state.
    pub fn record_references(
        mut self,
        recurrent_hidden: Vec<f32>,
        ref_out: Option<Tensor>,
        partner_ref_out: Option<Tensor>,
    ) -> Self {
        self.recurrent_hidden = recurrent_hidden;
        self.accumulators.ref_outs.push(ref_out);
        self.accumulators.partner_ref_outs.push(partner_ref_out);
        self
    }

    /// Store the plan for the next utterance and this turn's selection, and advance the turn.
    pub fn complete_turn(mut self, planned: Vec<f32>, sel_out: Option<Vec<f32>>) -> Self {
        self.accumulators.mention_outs.push(planned);
        self.accumulators.sel_outs.push(sel_out);
        self.turn += 1;
        debug_assert_eq!(self.accumulators.ref_outs.len(), self.turn);
        debug_assert_eq!(self.accumulators.sel_outs.len(), self.turn);
        debug_assert_eq!(self.accumulators.mention_outs.len(), self.turn + 1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belief::{BeliefSource, BELIEF_WIDTH};

    fn state(constructor: Option<BeliefConstructor>) -> DialogueState {
        DialogueState::new(Tensor::zeros(&[3, 4]), vec![0.0; 2], constructor).with_primed_mentions(vec![0.0; 3])
    }

    fn one_ref() -> Option<Tensor> {
        Some(Tensor::from_vec(vec![0.1, 0.9, 0.2], &[1, 3]).unwrap())
    }

    #[test]
    fn test_turn_advances_once_per_transition_pair() {
        let s = state(None);
        assert_eq!(s.turn(), 0);
        let s = s.record_references(vec![1.0, 1.0], None, one_ref()).complete_turn(vec![0.0; 3], None);
        assert_eq!(s.turn(), 1);
        assert_eq!(s.recurrent_hidden(), &[1.0, 1.0]);
        assert_eq!(s.accumulators().ref_outs().len(), 1);
        assert!(s.accumulators().ref_outs()[0].is_none());
        assert_eq!(s.accumulators().mention_outs().len(), 2);
    }

    #[test]
    fn test_make_beliefs_is_pure() {
        let c = BeliefConstructor::uniform(&[BeliefSource::PartnerCumulative]);
        let s = state(Some(c))
            .record_references(vec![0.0; 2], None, one_ref())
            .complete_turn(vec![0.0; 3], None);

        let a = s.make_beliefs(BeliefKind::Selection).unwrap().unwrap();
        let b = s.make_beliefs(BeliefKind::Selection).unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.dims(), &[3, BELIEF_WIDTH]);
        assert_eq!(a.row(1).unwrap()[BeliefSource::PartnerCumulative.column()], 0.9);
        assert_eq!(s.accumulators().partner_ref_outs().len(), 1);
        assert_eq!(s.turn(), 1);
    }

    #[test]
    fn test_no_constructor_means_no_beliefs() {
        let s = state(None);
        assert!(s.make_beliefs(BeliefKind::Ref).unwrap().is_none());
        let s = state(Some(BeliefConstructor::new()));
        assert!(s.make_beliefs(BeliefKind::Generation).unwrap().is_none());
    }
}
