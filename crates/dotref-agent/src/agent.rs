//! RnnAgent: one side of a grounded dialogue.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │ feed_context(ctx)                                              │
//! │   encode entities → ctx_h, prime mention plan + is-selection   │
//! │                                                                │
//! │ read(words) / write()                                          │
//! │   1. Reader (or Writer + Reader replay) from the carried state │
//! │   2. resolve partner / own markables against ctx_h             │
//! │   3. carry the hidden state across the utterance boundary      │
//! │   4. plan mentions for the next utterance                      │
//! │   5. selection logits if the utterance holds <selection>       │
//! │   6. turn += 1, append one entry to every history sequence     │
//! │                                                                │
//! │ choose()                                                       │
//! │   greedy selection over the whole reader trajectory            │
//! └────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use dotref_core::ops::{argmax, sigmoid, softmax};
use dotref_core::{CoreError, Tensor};
use dotref_nn::{MentionMode, MentionPlan, ModelConfig, ModelError, ReferenceModel, SpanIndices, WriteRequest};

use crate::belief::{BeliefConstructor, BeliefKind, BELIEF_WIDTH};
use crate::config::AgentConfig;
use crate::domain::{get_domain, Domain};
use crate::error::{AgentError, Result};
use crate::history::{DialogueHistory, Role, TurnRecord};
use crate::markable::{normalize_marker, Markable, MarkableDetector, RefSpan};
use crate::state::DialogueState;
use crate::vocab::{WordDict, THEM, YOU};

// ═══════════════════════════════════════════════════════════════════════════
// Call inputs / outputs
// ═══════════════════════════════════════════════════════════════════════════

/// The scene shown to the agent.
#[derive(Clone, Debug, PartialEq)]
pub struct Context {
    /// `num_ent * dim_ent` features, entity-major.
    pub features: Vec<f32>,
    /// External ids reported by `choose`, one per entity.
    pub real_ids: Option<Vec<String>>,
}

impl Context {
    pub fn new(features: Vec<f32>) -> Self {
        Self {
            features,
            real_ids: None,
        }
    }

    pub fn with_real_ids(mut self, ids: Vec<String>) -> Self {
        self.real_ids = Some(ids);
        self
    }

    /// Parse textual feature fields, as found in scenario files.
    pub fn parse<S: AsRef<str>>(fields: &[S]) -> Result<Self> {
        let features = fields
            .iter()
            .map(|f| {
                f.as_ref()
                    .trim()
                    .parse::<f32>()
                    .map_err(|e| AgentError::InvalidContext(format!("{:?}: {e}", f.as_ref())))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(features))
    }
}

#[derive(Clone, Debug)]
pub struct ContextOptions {
    pub belief_constructor: Option<BeliefConstructor>,
    /// Exact mention count for the first utterance.
    pub num_markables_to_force: Option<usize>,
    pub min_num_mentions: usize,
    pub max_num_mentions: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            belief_constructor: None,
            num_markables_to_force: None,
            min_num_mentions: 0,
            max_num_mentions: 12,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReadOptions {
    /// Marker prepended when the utterance does not start with one.
    pub start_token: String,
    pub dots_mentioned: Option<Vec<bool>>,
    pub dots_mentioned_per_ref: Option<Vec<Vec<bool>>>,
    pub partner_ref_spans: Option<Vec<RefSpan>>,
    /// Defaults to the number of supplied spans.
    pub partner_num_markables: Option<usize>,
    pub next_num_markables_to_force: Option<usize>,
    pub min_num_mentions: usize,
    pub max_num_mentions: usize,
    /// Oracle referents, one row per partner markable.
    pub partner_ref_tgt: Option<Vec<Vec<bool>>>,
    pub detect_markables: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            start_token: THEM.to_string(),
            dots_mentioned: None,
            dots_mentioned_per_ref: None,
            partner_ref_spans: None,
            partner_num_markables: None,
            next_num_markables_to_force: None,
            min_num_mentions: 0,
            max_num_mentions: 12,
            partner_ref_tgt: None,
            detect_markables: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WriteOptions {
    /// Overrides `AgentConfig::max_words`.
    pub max_words: Option<usize>,
    /// Emit exactly these words instead of sampling.
    pub force_words: Option<Vec<String>>,
    pub start_token: String,
    pub dots_mentioned: Option<Vec<bool>>,
    pub dots_mentioned_per_ref: Option<Vec<Vec<bool>>>,
    pub ref_spans: Option<Vec<RefSpan>>,
    pub num_markables: Option<usize>,
    pub temperature_override: Option<f32>,
    /// Oracle referents, one row per own markable.
    pub ref_tgt: Option<Vec<Vec<bool>>>,
    pub detect_markables: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            max_words: None,
            force_words: None,
            start_token: YOU.to_string(),
            dots_mentioned: None,
            dots_mentioned_per_ref: None,
            ref_spans: None,
            num_markables: None,
            temperature_override: None,
            ref_tgt: None,
            detect_markables: false,
        }
    }
}

/// Final answer of a dialogue.
#[derive(Clone, Debug, PartialEq)]
pub struct Choice {
    pub index: usize,
    /// `real_ids[index]` when the context carried ids.
    pub id: Option<String>,
    pub prob: f32,
}

/// Build a model whose writer never emits the dictionary's special tokens.
pub fn model_for(vocab: &WordDict, config: ModelConfig) -> Result<ReferenceModel> {
    Ok(ReferenceModel::new(config, &vocab.special_token_ids())?)
}

// ═══════════════════════════════════════════════════════════════════════════
// RnnAgent
// ═══════════════════════════════════════════════════════════════════════════

struct Session {
    state: DialogueState,
    history: DialogueHistory,
    real_ids: Option<Vec<String>>,
}

pub struct RnnAgent {
    pub name: String,
    model: Arc<ReferenceModel>,
    vocab: Arc<WordDict>,
    domain: Box<dyn Domain>,
    config: AgentConfig,
    detector: Option<Box<dyn MarkableDetector>>,
    stop_ids: Vec<usize>,
    rng: StdRng,
    session: Option<Session>,
}

impl RnnAgent {
    /// Inference-only: an agent configured for training is rejected.
    pub fn new(
        name: impl Into<String>,
        model: Arc<ReferenceModel>,
        vocab: Arc<WordDict>,
        domain: Box<dyn Domain>,
        config: AgentConfig,
    ) -> Result<Self> {
        config.validate()?;
        if config.train {
            return Err(AgentError::Unsupported("online training"));
        }
        if domain.num_ent() != model.num_ent() || domain.dim_ent() != model.config.dim_ent {
            return Err(AgentError::Config(format!(
                "domain {} has {}x{} entity features, model expects {}x{}",
                domain.name(),
                domain.num_ent(),
                domain.dim_ent(),
                model.num_ent(),
                model.config.dim_ent
            )));
        }
        if vocab.len() != model.vocab_size() {
            return Err(AgentError::Config(format!(
                "vocabulary has {} words, model expects {}",
                vocab.len(),
                model.vocab_size()
            )));
        }
        if model.config.belief_dim != BELIEF_WIDTH {
            return Err(AgentError::Config(format!(
                "model belief_dim {} does not match belief width {BELIEF_WIDTH}",
                model.config.belief_dim
            )));
        }
        let stop_ids = config
            .stop_tokens
            .iter()
            .map(|w| {
                if vocab.contains(w) {
                    Ok(vocab.get_idx(w))
                } else {
                    Err(AgentError::Config(format!("stop token {w:?} is not in the vocabulary")))
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: name.into(),
            rng: StdRng::seed_from_u64(config.seed),
            model,
            vocab,
            domain,
            config,
            detector: None,
            stop_ids,
            session: None,
        })
    }

    /// Like [`RnnAgent::new`], with the domain looked up from `config.domain`.
    pub fn from_config(
        name: impl Into<String>,
        model: Arc<ReferenceModel>,
        vocab: Arc<WordDict>,
        config: AgentConfig,
    ) -> Result<Self> {
        let domain = get_domain(&config.domain)?;
        Self::new(name, model, vocab, domain, config)
    }

    pub fn with_markable_detector(mut self, detector: Box<dyn MarkableDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn model(&self) -> &ReferenceModel {
        &self.model
    }

    pub fn vocab(&self) -> &WordDict {
        &self.vocab
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// Completed turns in the current dialogue (0 before `feed_context`).
    pub fn turn(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.state.turn())
    }

    pub fn state(&self) -> Option<&DialogueState> {
        self.session.as_ref().map(|s| &s.state)
    }

    pub fn history(&self) -> Option<&DialogueHistory> {
        self.session.as_ref().map(|s| &s.history)
    }

    /// Belief tensor of the given kind for the current state.
    pub fn make_beliefs(&self, kind: BeliefKind) -> Result<Option<Tensor>> {
        self.session
            .as_ref()
            .ok_or(AgentError::NotInitialized("make_beliefs"))?
            .state
            .make_beliefs(kind)
    }

    /// Start a new dialogue, discarding all previous state.
    pub fn feed_context(&mut self, context: Context, options: ContextOptions) -> Result<()> {
        let expected = self.domain.input_length();
        if context.features.len() != expected {
            return Err(AgentError::InvalidContext(format!(
                "{} features, domain {} needs {expected}",
                context.features.len(),
                self.domain.name()
            )));
        }
        if let Some(ids) = &context.real_ids {
            if ids.len() != self.domain.num_ent() {
                return Err(AgentError::InvalidContext(format!(
                    "{} real ids for {} entities",
                    ids.len(),
                    self.domain.num_ent()
                )));
            }
        }

        let ctx_h = self.model.encode_context(&context.features)?;
        let state = DialogueState::new(ctx_h, self.model.initial_hidden(), options.belief_constructor);
        let mode = MentionMode::from_request(
            options.num_markables_to_force,
            options.min_num_mentions,
            options.max_num_mentions,
        );
        let plan = self.plan_mentions(&state, state.recurrent_hidden(), mode)?;
        let is_selection = self.model.is_selection_prediction(state.recurrent_hidden());
        let state = state.with_primed_mentions(plan.entity_probabilities());

        info!(agent = %self.name, num_ent = state.num_ent(), planned = plan.num_markables, "context fed");
        self.session = Some(Session {
            state,
            history: DialogueHistory::primed(plan, is_selection),
            real_ids: context.real_ids,
        });
        Ok(())
    }

    /// Consume a partner utterance.
    pub fn read<S: AsRef<str>>(&mut self, words: &[S], options: &ReadOptions) -> Result<()> {
        let (state, prev_plan, prev_is_selection) = self.snapshot("read")?;
        let tokens = self.with_marker(words, &options.start_token);
        let role = if tokens[0] == self.vocab.you_idx() { Role::You } else { Role::Them };
        let sel_idx = self.find_selection(&tokens[1..])?.map(|i| i + 1);

        let dots = union_dots(options.dots_mentioned.as_deref(), options.dots_mentioned_per_ref.as_deref());
        self.check_attend(dots.as_deref())?;
        let h0 = self.model.utterance_init(state.recurrent_hidden(), state.ctx_h(), dots.as_deref())?;
        let read = self.model.read(&tokens, &h0)?;

        let (partner_markables, partner_spans, declared) = if options.detect_markables {
            let (markables, spans) = self.detect(&tokens)?;
            (markables, Some(spans), None)
        } else {
            (Vec::new(), options.partner_ref_spans.clone(), options.partner_num_markables)
        };
        let partner_ref_out = self.resolve(&state, &read.hs, partner_spans.as_deref(), declared, BeliefKind::PartnerRef)?;
        let partner_belief = belief_value(partner_ref_out.as_ref(), options.partner_ref_tgt.as_deref(), state.num_ent())?;

        let hidden = self.model.advance_turn(state.recurrent_hidden(), &read.last_h);
        let next = state.record_references(hidden, None, partner_belief);

        let query = read.hs.last_row().map_or_else(|| next.recurrent_hidden().to_vec(), <[f32]>::to_vec);
        let mode = MentionMode::from_request(
            options.next_num_markables_to_force,
            options.min_num_mentions,
            options.max_num_mentions,
        );
        let plan = self.plan_mentions(&next, &query, mode)?;
        let sel_out = sel_idx.map(|i| self.select(&next, &read.hs, i)).transpose()?;
        let next = next.complete_turn(plan.entity_probabilities(), sel_out.as_deref().map(softmax));
        let is_selection = self.model.is_selection_prediction(next.recurrent_hidden());

        debug!(
            agent = %self.name,
            turn = next.turn(),
            role = ?role,
            tokens = tokens.len(),
            markables = partner_spans.as_ref().map_or(0, Vec::len),
            selection = sel_out.is_some(),
            "read"
        );
        let record = TurnRecord {
            role,
            tokens,
            logprobs: Vec::new(),
            reader_hs: read.hs.clone(),
            writer_hs: read.hs,
            ref_spans: None,
            partner_ref_spans: partner_spans,
            ref_out: None,
            partner_ref_out,
            markables: Vec::new(),
            partner_markables,
            mention_plan: prev_plan,
            is_selection_prob: prev_is_selection,
            sel_out,
        };
        self.commit(next, record, plan, is_selection);
        Ok(())
    }

    /// Produce the agent's next utterance, without its role marker.
    pub fn write(&mut self, options: &WriteOptions) -> Result<Vec<String>> {
        let (state, prev_plan, prev_is_selection) = self.snapshot("write")?;
        let start = self.vocab.get_idx(&options.start_token);

        let dots = union_dots(options.dots_mentioned.as_deref(), options.dots_mentioned_per_ref.as_deref());
        self.check_attend(dots.as_deref())?;
        let h0 = self.model.utterance_init(state.recurrent_hidden(), state.ctx_h(), dots.as_deref())?;

        let generation_beliefs = state.make_beliefs(BeliefKind::Generation)?;
        let lang_bias = self.model.generation_bias(generation_beliefs.as_ref())?;
        let forced = options.force_words.as_ref().map(|w| self.vocab.w2i(w.as_slice()));
        let request = WriteRequest {
            start_token: start,
            stop_tokens: &self.stop_ids,
            max_words: options.max_words.unwrap_or(self.config.max_words),
            temperature: options.temperature_override.unwrap_or(self.config.temperature),
            force_words: forced.as_deref(),
            lang_bias: lang_bias.as_deref(),
        };
        let out = self.model.write(state.ctx_h(), &h0, &request, &mut self.rng)?;

        let mut tokens = Vec::with_capacity(out.tokens.len() + 1);
        tokens.push(start);
        tokens.extend_from_slice(&out.tokens);
        let sel_idx = self.find_selection(&out.tokens)?.map(|i| i + 1);

        let (markables, ref_spans, declared) = if options.detect_markables {
            let (markables, spans) = self.detect(&tokens)?;
            (markables, Some(spans), None)
        } else {
            (Vec::new(), options.ref_spans.clone(), options.num_markables)
        };
        let ref_out = self.resolve(&state, &out.reader_hs, ref_spans.as_deref(), declared, BeliefKind::Ref)?;
        let ref_belief = belief_value(ref_out.as_ref(), options.ref_tgt.as_deref(), state.num_ent())?;

        let hidden = self.model.advance_turn(state.recurrent_hidden(), &out.last_h);
        let next = state.record_references(hidden, ref_belief, None);

        // After the agent's own turn the partner speaks next, so no mentions are planned.
        let query = out.writer_hs.last_row().map_or_else(|| next.recurrent_hidden().to_vec(), <[f32]>::to_vec);
        let plan = self.plan_mentions(&next, &query, MentionMode::Forced(0))?;
        let sel_out = sel_idx.map(|i| self.select(&next, &out.reader_hs, i)).transpose()?;
        let next = next.complete_turn(plan.entity_probabilities(), sel_out.as_deref().map(softmax));
        let is_selection = self.model.is_selection_prediction(next.recurrent_hidden());

        let words = self.vocab.i2w(&out.tokens)?;
        debug!(
            agent = %self.name,
            turn = next.turn(),
            tokens = tokens.len(),
            markables = ref_spans.as_ref().map_or(0, Vec::len),
            selection = sel_out.is_some(),
            "write"
        );
        let record = TurnRecord {
            role: if start == self.vocab.you_idx() { Role::You } else { Role::Them },
            tokens,
            logprobs: out.logprobs,
            reader_hs: out.reader_hs,
            writer_hs: out.writer_hs,
            ref_spans,
            partner_ref_spans: None,
            ref_out,
            partner_ref_out: None,
            markables,
            partner_markables: Vec::new(),
            mention_plan: prev_plan,
            is_selection_prob: prev_is_selection,
            sel_out,
        };
        self.commit(next, record, plan, is_selection);
        Ok(words)
    }

    /// Pick an entity from everything read and written so far.
    ///
    /// Greedy: the argmax of the selection distribution at the last
    /// position of the concatenated reader trajectories. Before any turn
    /// the carried (initial) hidden state is the only position.
    pub fn choose(&self) -> Result<Choice> {
        let session = self.session.as_ref().ok_or(AgentError::NotInitialized("choose"))?;
        let hidden = self.model.hidden_size();
        let hs = if session.history.is_empty() {
            Tensor::from_f32(session.state.recurrent_hidden(), &[1, hidden])?
        } else {
            session.history.reader_trajectory(hidden)?
        };
        let (len, _) = hs.dims2()?;
        let logits = self.model.selection(session.state.ctx_h(), &hs, len - 1, None)?;
        let probs = softmax(&logits);
        let index = argmax(&probs).ok_or(ModelError::EmptyInput("selection"))?;
        let id = match &session.real_ids {
            Some(ids) => Some(
                ids.get(index)
                    .cloned()
                    .ok_or_else(|| AgentError::InvalidContext(format!("no real id for entity {index}")))?,
            ),
            None => None,
        };

        info!(agent = %self.name, index, id = ?id, prob = probs[index], "choice");
        Ok(Choice {
            index,
            id,
            prob: probs[index],
        })
    }

    /// Training hook. Agents are inference-only, so this only logs.
    pub fn update(&mut self, agree: bool, reward: f32, choice: Option<&Choice>) {
        debug!(agent = %self.name, agree, reward, choice = ?choice.map(|c| c.index), "update ignored outside training");
    }

    // ─── Internal methods ────────────────────────────────────────────

    fn snapshot(&self, op: &'static str) -> Result<(DialogueState, MentionPlan, f32)> {
        let session = self.session.as_ref().ok_or(AgentError::NotInitialized(op))?;
        let plan = session
            .history
            .next_mention_outs
            .last()
            .cloned()
            .ok_or(AgentError::NotInitialized(op))?;
        let is_selection = session
            .history
            .is_selection_outs
            .last()
            .copied()
            .ok_or(AgentError::NotInitialized(op))?;
        Ok((session.state.clone(), plan, is_selection))
    }

    fn commit(&mut self, state: DialogueState, record: TurnRecord, plan: MentionPlan, is_selection: f32) {
        if let Some(session) = self.session.as_mut() {
            session.state = state;
            session.history.push(record, plan, is_selection);
        }
    }

    /// Encode `words`, prepending `start_token` unless they already open with a role marker.
    fn with_marker<S: AsRef<str>>(&self, words: &[S], start_token: &str) -> Vec<usize> {
        let mut tokens = Vec::with_capacity(words.len() + 1);
        let has_marker = words
            .first()
            .is_some_and(|w| self.vocab.is_role_marker(self.vocab.get_idx(w.as_ref())));
        if !has_marker {
            tokens.push(self.vocab.get_idx(start_token));
        }
        tokens.extend(self.vocab.w2i(words));
        tokens
    }

    /// Position of the single selection token, if any.
    fn find_selection(&self, tokens: &[usize]) -> Result<Option<usize>> {
        let sel = self.vocab.selection_idx();
        let positions: Vec<usize> = tokens
            .iter()
            .enumerate()
            .filter(|&(_, &t)| t == sel)
            .map(|(i, _)| i)
            .collect();
        match positions.as_slice() {
            [] => Ok(None),
            [i] => Ok(Some(*i)),
            many => Err(AgentError::MultipleSelectionTokens { count: many.len() }),
        }
    }

    fn check_attend(&self, dots: Option<&[bool]>) -> Result<()> {
        if self.model.config.feed_context_attend && dots.is_none() {
            return Err(AgentError::MissingAuxiliaryInput("dots_mentioned"));
        }
        Ok(())
    }

    fn detect(&self, tokens: &[usize]) -> Result<(Vec<Markable>, Vec<RefSpan>)> {
        let detector = self.detector.as_ref().ok_or(AgentError::MissingMarkableDetector)?;
        let words = self.vocab.i2w(tokens)?;
        let words = normalize_marker(words.as_slice());
        Ok(detector.detect_markables(&words).into_iter().unzip())
    }

    fn resolve(
        &self,
        state: &DialogueState,
        hs: &Tensor,
        spans: Option<&[RefSpan]>,
        declared: Option<usize>,
        kind: BeliefKind,
    ) -> Result<Option<Tensor>> {
        let Some(spans) = spans else {
            return match declared {
                Some(n) if n > 0 => Err(ModelError::MarkableCountMismatch { declared: n, supplied: 0 }.into()),
                _ => Ok(None),
            };
        };
        let indices: Vec<SpanIndices> = spans.iter().map(RefSpan::indices).collect();
        let beliefs = state.make_beliefs(kind)?;
        Ok(self.model.reference_resolution(
            state.ctx_h(),
            hs,
            &indices,
            declared.unwrap_or(indices.len()),
            kind.target(),
            beliefs.as_ref(),
        )?)
    }

    fn plan_mentions(&self, state: &DialogueState, query: &[f32], mode: MentionMode) -> Result<MentionPlan> {
        let mode = match mode {
            MentionMode::Bounded { min, max } => MentionMode::Bounded {
                min: min.min(self.config.max_num_mentions),
                max: max.min(self.config.max_num_mentions),
            },
            other => other,
        };
        let beliefs = state.make_beliefs(BeliefKind::Mention)?;
        Ok(self.model.next_mention(state.ctx_h(), query, beliefs.as_ref(), mode)?)
    }

    fn select(&self, state: &DialogueState, hs: &Tensor, sel_idx: usize) -> Result<Vec<f32>> {
        let beliefs = state.make_beliefs(BeliefKind::Selection)?;
        Ok(self.model.selection(state.ctx_h(), hs, sel_idx, beliefs.as_ref())?)
    }
}

fn union_dots(dots: Option<&[bool]>, per_ref: Option<&[Vec<bool>]>) -> Option<Vec<bool>> {
    if let Some(d) = dots {
        return Some(d.to_vec());
    }
    let per_ref = per_ref?;
    let width = per_ref.iter().map(Vec::len).max()?;
    Some(
        (0..width)
            .map(|e| per_ref.iter().any(|r| r.get(e).copied().unwrap_or(false)))
            .collect(),
    )
}

/// What a turn contributes to the belief accumulators: oracle targets when
/// given, otherwise the predicted probabilities.
fn belief_value(logits: Option<&Tensor>, oracle: Option<&[Vec<bool>]>, num_ent: usize) -> Result<Option<Tensor>> {
    let Some(rows) = oracle else {
        return Ok(logits
            .map(|l| {
                let probs = l.as_slice().iter().map(|&v| sigmoid(v)).collect();
                Tensor::from_vec(probs, l.dims())
            })
            .transpose()?);
    };
    if let Some(l) = logits {
        let (m, _) = l.dims2()?;
        if m != rows.len() {
            return Err(ModelError::MarkableCountMismatch {
                declared: m,
                supplied: rows.len(),
            }
            .into());
        }
    }
    if rows.is_empty() {
        return Ok(None);
    }
    let mut data = Vec::with_capacity(rows.len() * num_ent);
    for row in rows {
        if row.len() != num_ent {
            return Err(CoreError::ShapeMismatch {
                expected: vec![num_ent],
                got: vec![row.len()],
            }
            .into());
        }
        data.extend(row.iter().map(|&b| if b { 1.0 } else { 0.0 }));
    }
    Ok(Some(Tensor::from_vec(data, &[rows.len(), num_ent])?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belief::BeliefSource;
    use crate::domain::CustomDomain;
    use crate::markable::LexiconDetector;
    use crate::vocab::SELECTION;

    fn setup(f: impl FnOnce(&mut ModelConfig)) -> RnnAgent {
        let vocab = WordDict::from_words(["the", "dot", "large", "small", "left", "right", "yes", "no"]);
        let mut cfg = ModelConfig::tiny(vocab.len(), 3);
        f(&mut cfg);
        let model = model_for(&vocab, cfg).unwrap();
        let domain = CustomDomain {
            name: "three".into(),
            num_ent: 3,
            dim_ent: 4,
        };
        RnnAgent::new("alice", Arc::new(model), Arc::new(vocab), Box::new(domain), AgentConfig::tiny()).unwrap()
    }

    fn context() -> Context {
        Context::new((0..12).map(|i| (i as f32 * 0.37).sin()).collect())
    }

    fn fed(f: impl FnOnce(&mut ModelConfig)) -> RnnAgent {
        let mut agent = setup(f);
        agent.feed_context(context(), ContextOptions::default()).unwrap();
        agent
    }

    #[test]
    fn test_training_mode_is_rejected() {
        let vocab = WordDict::from_words(["dot"]);
        let model = model_for(&vocab, ModelConfig::tiny(vocab.len(), 3)).unwrap();
        let domain = CustomDomain { name: "three".into(), num_ent: 3, dim_ent: 4 };
        let config = AgentConfig { train: true, ..AgentConfig::tiny() };
        let err = RnnAgent::new("bob", Arc::new(model), Arc::new(vocab), Box::new(domain), config).err();
        assert!(matches!(err, Some(AgentError::Unsupported(_))));
    }

    #[test]
    fn test_from_config_resolves_named_domain() {
        let vocab = Arc::new(WordDict::from_words(["dot"]));
        let model = Arc::new(model_for(&vocab, ModelConfig::tiny(vocab.len(), 7)).unwrap());
        let agent = RnnAgent::from_config("alice", model.clone(), vocab.clone(), AgentConfig::tiny()).unwrap();
        assert_eq!(agent.domain.name(), "one_common");

        let config = AgentConfig { domain: "two_common".into(), ..AgentConfig::tiny() };
        let err = RnnAgent::from_config("bob", model, vocab, config).err();
        assert!(matches!(err, Some(AgentError::Config(_))));
    }

    #[test]
    fn test_calls_before_feed_context_fail() {
        let mut agent = setup(|_| {});
        assert!(matches!(
            agent.read(&["the", "dot"], &ReadOptions::default()),
            Err(AgentError::NotInitialized("read"))
        ));
        assert!(matches!(agent.write(&WriteOptions::default()), Err(AgentError::NotInitialized("write"))));
        assert!(matches!(agent.choose(), Err(AgentError::NotInitialized("choose"))));
        assert_eq!(agent.turn(), 0);
    }

    #[test]
    fn test_bad_context_length() {
        let mut agent = setup(|_| {});
        let err = agent.feed_context(Context::new(vec![0.0; 5]), ContextOptions::default());
        assert!(matches!(err, Err(AgentError::InvalidContext(_))));
        assert!(!agent.is_initialized());
    }

    #[test]
    fn test_read_prepends_partner_marker() {
        let mut agent = fed(|_| {});
        agent.read(&["the", "large", "dot"], &ReadOptions::default()).unwrap();
        agent.read(&["YOU:", "yes"], &ReadOptions::default()).unwrap();
        let h = agent.history().unwrap();
        assert_eq!(h.turns[0].tokens[0], agent.vocab().them_idx());
        assert_eq!(h.turns[0].tokens.len(), 4);
        assert_eq!(h.turns[0].role, Role::Them);
        assert_eq!(h.turns[1].tokens.len(), 2);
        assert_eq!(h.turns[1].role, Role::You);
    }

    #[test]
    fn test_multiple_selection_tokens_leave_state_untouched() {
        let mut agent = fed(|_| {});
        agent.read(&["the", "dot"], &ReadOptions::default()).unwrap();
        let err = agent.read(&[SELECTION, "dot", SELECTION], &ReadOptions::default());
        assert!(matches!(err, Err(AgentError::MultipleSelectionTokens { count: 2 })));
        assert_eq!(agent.turn(), 1);
        assert_eq!(agent.history().unwrap().len(), 1);
        assert_eq!(agent.history().unwrap().next_mention_outs.len(), 2);
    }

    #[test]
    fn test_selection_only_when_token_present() {
        let mut agent = fed(|_| {});
        agent.read(&["the", "dot"], &ReadOptions::default()).unwrap();
        agent.read(&["yes", SELECTION], &ReadOptions::default()).unwrap();
        let h = agent.history().unwrap();
        assert!(h.turns[0].sel_out.is_none());
        assert_eq!(h.turns[1].sel_out.as_ref().map(Vec::len), Some(3));
        assert_eq!(h.sel_outs().count(), 1);
    }

    #[test]
    fn test_markable_detection_requires_detector() {
        let mut agent = fed(|_| {});
        let opts = ReadOptions {
            detect_markables: true,
            ..ReadOptions::default()
        };
        assert!(matches!(agent.read(&["the", "dot"], &opts), Err(AgentError::MissingMarkableDetector)));

        let mut agent = setup(|_| {}).with_markable_detector(Box::new(LexiconDetector::new(["dot"])));
        agent.feed_context(context(), ContextOptions::default()).unwrap();
        agent.read(&["THEM:", "the", "large", "dot"], &opts).unwrap();
        let turn = &agent.history().unwrap().turns[0];
        assert_eq!(turn.partner_markables.len(), 1);
        assert_eq!(turn.partner_ref_spans.as_deref(), Some(&[RefSpan::new(3, 3, 3)][..]));
        assert_eq!(turn.partner_ref_out.as_ref().unwrap().dims(), &[1, 3]);
        assert!(turn.ref_out.is_none());
        assert!(turn.markables.is_empty());
    }

    #[test]
    fn test_write_detects_own_markables() {
        let mut agent = setup(|_| {}).with_markable_detector(Box::new(LexiconDetector::new(["dot"])));
        agent.feed_context(context(), ContextOptions::default()).unwrap();
        let opts = WriteOptions {
            force_words: Some(vec!["the".into(), "dot".into(), "<eos>".into()]),
            detect_markables: true,
            ..WriteOptions::default()
        };
        agent.write(&opts).unwrap();
        let turn = &agent.history().unwrap().turns[0];
        assert_eq!(turn.markables.len(), 1);
        let spans = turn.ref_spans.as_deref().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start, 2);
        assert_eq!(turn.ref_out.as_ref().unwrap().dims(), &[1, 3]);
        assert!(turn.partner_ref_out.is_none());
        assert!(turn.partner_markables.is_empty());
    }

    #[test]
    fn test_write_detection_requires_detector() {
        let mut agent = fed(|_| {});
        let opts = WriteOptions {
            force_words: Some(vec!["the".into(), "dot".into()]),
            detect_markables: true,
            ..WriteOptions::default()
        };
        assert!(matches!(agent.write(&opts), Err(AgentError::MissingMarkableDetector)));
        assert_eq!(agent.turn(), 0);
    }

    #[test]
    fn test_forced_words_survive_inner_stop_token() {
        let mut agent = fed(|_| {});
        let forced: Vec<String> = vec!["yes".into(), "<eos>".into(), "dot".into()];
        let opts = WriteOptions {
            force_words: Some(forced.clone()),
            ..WriteOptions::default()
        };
        assert_eq!(agent.write(&opts).unwrap(), forced);
        assert_eq!(agent.history().unwrap().turns[0].tokens.len(), 4);
    }

    #[test]
    fn test_write_role_follows_start_token() {
        let mut agent = fed(|_| {});
        let opts = WriteOptions {
            force_words: Some(vec!["yes".into()]),
            ..WriteOptions::default()
        };
        agent.write(&opts).unwrap();
        agent
            .write(&WriteOptions {
                start_token: "THEM:".into(),
                ..opts
            })
            .unwrap();
        let turns = &agent.history().unwrap().turns;
        assert_eq!(turns[0].role, Role::You);
        assert_eq!(turns[1].role, Role::Them);
        assert_eq!(turns[1].tokens[0], agent.vocab().them_idx());
    }

    #[test]
    fn test_mention_bounds_are_capped_by_config() {
        let vocab = WordDict::from_words(["the", "dot", "yes"]);
        let model = model_for(&vocab, ModelConfig::tiny(vocab.len(), 3)).unwrap();
        let domain = CustomDomain { name: "three".into(), num_ent: 3, dim_ent: 4 };
        let config = AgentConfig { max_num_mentions: 2, ..AgentConfig::tiny() };
        let mut agent = RnnAgent::new("alice", Arc::new(model), Arc::new(vocab), Box::new(domain), config).unwrap();
        let opts = ContextOptions {
            min_num_mentions: 20,
            max_num_mentions: 30,
            ..ContextOptions::default()
        };
        agent.feed_context(context(), opts).unwrap();
        agent
            .write(&WriteOptions {
                force_words: Some(vec!["yes".into()]),
                ..WriteOptions::default()
            })
            .unwrap();
        assert_eq!(agent.history().unwrap().turns[0].mention_plan.num_markables, 2);
    }

    #[test]
    fn test_declared_count_must_match_spans() {
        let mut agent = fed(|_| {});
        let opts = ReadOptions {
            partner_ref_spans: Some(vec![RefSpan::new(1, 2, 2)]),
            partner_num_markables: Some(2),
            ..ReadOptions::default()
        };
        let err = agent.read(&["the", "dot"], &opts);
        assert!(matches!(
            err,
            Err(AgentError::Model(ModelError::MarkableCountMismatch { declared: 2, supplied: 1 }))
        ));
        assert_eq!(agent.turn(), 0);
    }

    #[test]
    fn test_context_attended_reading_needs_mentions() {
        let mut agent = fed(|cfg| cfg.feed_context_attend = true);
        assert!(matches!(
            agent.read(&["the", "dot"], &ReadOptions::default()),
            Err(AgentError::MissingAuxiliaryInput("dots_mentioned"))
        ));
        let opts = ReadOptions {
            dots_mentioned_per_ref: Some(vec![vec![true, false, false], vec![false, false, true]]),
            ..ReadOptions::default()
        };
        agent.read(&["the", "dot"], &opts).unwrap();
        assert_eq!(agent.turn(), 1);
    }

    #[test]
    fn test_oracle_targets_replace_predictions_in_beliefs() {
        let mut agent = setup(|_| {});
        let options = ContextOptions {
            belief_constructor: Some(BeliefConstructor::uniform(&[BeliefSource::PartnerLast])),
            ..ContextOptions::default()
        };
        agent.feed_context(context(), options).unwrap();
        let opts = ReadOptions {
            partner_ref_spans: Some(vec![RefSpan::new(2, 3, 3)]),
            partner_ref_tgt: Some(vec![vec![false, true, false]]),
            ..ReadOptions::default()
        };
        agent.read(&["the", "large", "dot"], &opts).unwrap();

        let beliefs = agent.make_beliefs(BeliefKind::Ref).unwrap().unwrap();
        let col = BeliefSource::PartnerLast.column();
        assert_eq!(beliefs.row(0).unwrap()[col], 0.0);
        assert_eq!(beliefs.row(1).unwrap()[col], 1.0);
        assert!(agent.history().unwrap().turns[0].partner_ref_out.is_some());
    }

    #[test]
    fn test_forced_write_returns_words_without_marker() {
        let mut agent = fed(|_| {});
        let opts = WriteOptions {
            force_words: Some(vec!["the".into(), "left".into(), "dot".into(), "<eos>".into()]),
            ..WriteOptions::default()
        };
        let words = agent.write(&opts).unwrap();
        assert_eq!(words, vec!["the", "left", "dot", "<eos>"]);
        let turn = &agent.history().unwrap().turns[0];
        assert_eq!(turn.tokens[0], agent.vocab().you_idx());
        assert_eq!(turn.logprobs.len(), 4);
        assert!(turn.partner_ref_out.is_none());
        let plan = agent.history().unwrap().next_mention_outs.last().unwrap();
        assert_eq!(plan.num_markables, 0);
    }

    #[test]
    fn test_choose_maps_real_ids() {
        let mut agent = setup(|_| {});
        let ctx = context().with_real_ids(vec!["a".into(), "b".into(), "c".into()]);
        agent.feed_context(ctx, ContextOptions::default()).unwrap();
        let choice = agent.choose().unwrap();
        let expected = ["a", "b", "c"][choice.index];
        assert_eq!(choice.id.as_deref(), Some(expected));
        assert!(choice.prob > 0.0 && choice.prob <= 1.0);
    }

    #[test]
    fn test_feed_context_resets_dialogue() {
        let mut agent = fed(|_| {});
        agent.read(&["the", "dot"], &ReadOptions::default()).unwrap();
        agent.feed_context(context(), ContextOptions::default()).unwrap();
        assert_eq!(agent.turn(), 0);
        assert!(agent.history().unwrap().is_empty());
        assert_eq!(agent.history().unwrap().is_selection_outs.len(), 1);
    }

    #[test]
    fn test_context_parse() {
        let ctx = Context::parse(&["0.5", " -1.25", "3"]).unwrap();
        assert_eq!(ctx.features, vec![0.5, -1.25, 3.0]);
        assert!(matches!(Context::parse(&["x"]), Err(AgentError::InvalidContext(_))));
    }
}
