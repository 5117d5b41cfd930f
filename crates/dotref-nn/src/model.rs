//! ReferenceModel: the recurrent network behind the dialogue agent.
//!
//! ```text
//! entity features ──► ContextEncoder ──► ctx_h (num_ent × nembed_ctx)
//!                                           │
//! tokens ──► word_embed ──► GRU (Reader ≡ Writer) ──► hidden trajectory
//!                                           │
//!            ┌──────────────────────────────┼──────────────────────┐
//!            ▼                              ▼                      ▼
//!   lang attention + hid2output     reference resolution        selection
//!   ──► tied vocab projection      (mean of 3 span positions)  (selection token)
//! ```

use rand::Rng;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{trace, warn};

use dotref_core::module::{prefixed, prefixed_mut};
use dotref_core::ops::{log_softmax, sigmoid, softmax, weighted_row_sum};
use dotref_core::{Module, Tensor};

use crate::attention::{add_bias, AttentionHeads, BeliefBias, BeliefTarget, ScoreHead};
use crate::config::{ModelConfig, TurnStructure};
use crate::ctx_encoder::ContextEncoder;
use crate::error::{ModelError, Result};
use crate::gru::{GruCell, PackedOutput};
use crate::layers::{Embedding, Linear, Mlp};
use crate::mention::{MentionMode, MentionPlan, MentionPlanner};
use crate::sampler::{make_mask, sample_token, scaled_scores};

/// A referent span: token positions of the expression's start, its end, and
/// the end of the sentence it occurs in, all indexing the hidden trajectory.
pub type SpanIndices = [usize; 3];

/// Hidden trajectory and final state of one read utterance.
#[derive(Clone, Debug)]
pub struct ReadOutput {
    /// `(len, nhid_lang)`, one row per input position.
    pub hs: Tensor,
    pub last_h: Vec<f32>,
}

/// Knobs for one generated utterance.
#[derive(Clone, Debug)]
pub struct WriteRequest<'a> {
    pub start_token: usize,
    pub stop_tokens: &'a [usize],
    pub max_words: usize,
    pub temperature: f32,
    /// Emit exactly these tokens instead of sampling.
    pub force_words: Option<&'a [usize]>,
    /// Per-entity offsets for the language attention logits.
    pub lang_bias: Option<&'a [f32]>,
}

#[derive(Clone, Debug)]
pub struct WriteOutput {
    /// Generated tokens, without the leading role marker.
    pub tokens: Vec<usize>,
    /// Log-probability of each generated token.
    pub logprobs: Vec<f32>,
    /// `[start] + tokens` re-encoded by the Reader.
    pub reader_hs: Tensor,
    /// States produced step by step while generating; same shape as `reader_hs`.
    pub writer_hs: Tensor,
    pub last_h: Vec<f32>,
    /// Whether generation ended on a stop token.
    pub stopped: bool,
}

/// How hidden state crosses utterance boundaries.
#[derive(Clone, Debug)]
pub enum TurnRecurrence {
    Flat,
    Hierarchical(GruCell),
}

impl TurnRecurrence {
    /// The carried state after an utterance whose final word-level state is `utterance_h`.
    pub fn advance(&self, carried: &[f32], utterance_h: &[f32]) -> Vec<f32> {
        match self {
            TurnRecurrence::Flat => utterance_h.to_vec(),
            TurnRecurrence::Hierarchical(cell) => cell.step(utterance_h, carried),
        }
    }
}

/// Attention pooling over the utterance used for selection.
#[derive(Clone, Debug)]
pub struct SelectionAttention {
    ctx_layer: Linear,
    scorer: Mlp,
}

impl SelectionAttention {
    /// Softmax weights over positions and the pooled hidden vector.
    pub fn pool(&self, ctx_h: &Tensor, hs: &Tensor) -> Result<(Vec<f32>, Vec<f32>)> {
        let (num_ent, _) = ctx_h.dims2()?;
        let (len, hid) = hs.dims2()?;
        if len == 0 {
            return Err(ModelError::EmptyInput("selection attention over an empty utterance"));
        }
        let mut summary = vec![0.0f32; self.ctx_layer.out_dim()];
        for e in 0..num_ent {
            let t = self.ctx_layer.forward_row(ctx_h.row(e)?);
            summary.iter_mut().zip(&t).for_each(|(s, v)| *s += v);
        }
        summary.iter_mut().for_each(|s| *s /= num_ent as f32);

        let mut logits = Vec::with_capacity(len);
        for t in 0..len {
            let mut joint = summary.clone();
            joint.extend_from_slice(hs.row(t)?);
            logits.push(self.scorer.forward_row(&joint)[0]);
        }
        let probs = softmax(&logits);
        let pooled = weighted_row_sum(&probs, hs.as_slice(), hid);
        Ok((probs, pooled))
    }
}

pub struct ReferenceModel {
    pub config: ModelConfig,
    pub word_embed: Embedding,
    pub ctx_encoder: ContextEncoder,
    /// The single recurrence behind both Reader and Writer.
    pub rnn: GruCell,
    pub turn_recurrence: TurnRecurrence,
    pub hid2output: Mlp,
    pub attention: AttentionHeads,
    pub belief_bias: BeliefBias,
    pub selection_attention: Option<SelectionAttention>,
    /// Only present with `feed_context_attend`.
    pub ctx2hid: Option<Linear>,
    pub mention: MentionPlanner,
    pub is_sel_probe: Linear,
    special_token_mask: Vec<f32>,
}

impl ReferenceModel {
    /// Build with random weights. `masked_token_ids` are never generated.
    pub fn new(config: ModelConfig, masked_token_ids: &[usize]) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.init_seed);
        let r = config.init_range;

        let word_embed = Embedding::new(config.vocab_size, config.nembed_word, r, &mut rng);
        let ctx_encoder = ContextEncoder::new(&config, &mut rng);
        let rnn = GruCell::new(config.nembed_word, config.nhid_lang, r, &mut rng);
        let turn_recurrence = match config.turn_structure {
            TurnStructure::Flat => TurnRecurrence::Flat,
            TurnStructure::Hierarchical => {
                TurnRecurrence::Hierarchical(GruCell::new(config.nhid_lang, config.nhid_lang, r, &mut rng))
            }
        };
        let hid2output = Mlp::new(&[config.nhid_lang + config.nembed_ctx, config.nembed_word], true, r, &mut rng);
        let attention = AttentionHeads::new(&config, &mut rng);
        let belief_bias = BeliefBias::new(config.belief_dim, r, &mut rng);
        let selection_attention = config.selection_attention.then(|| SelectionAttention {
            ctx_layer: Linear::new(config.nembed_ctx, config.nhid_attn, r, &mut rng),
            scorer: Mlp::new(&[config.nhid_attn + config.nhid_lang, config.nhid_attn, 1], false, r, &mut rng),
        });
        let ctx2hid = config
            .feed_context_attend
            .then(|| Linear::new(config.nembed_ctx, config.nhid_lang, r, &mut rng));
        let mention = MentionPlanner::new(&config, &mut rng);
        let is_sel_probe = Linear::new(config.nhid_lang, 1, r, &mut rng);
        let special_token_mask = make_mask(config.vocab_size, masked_token_ids);

        Ok(Self {
            config,
            word_embed,
            ctx_encoder,
            rnn,
            turn_recurrence,
            hid2output,
            attention,
            belief_bias,
            selection_attention,
            ctx2hid,
            mention,
            is_sel_probe,
            special_token_mask,
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    pub fn num_ent(&self) -> usize {
        self.config.num_ent
    }

    pub fn hidden_size(&self) -> usize {
        self.config.nhid_lang
    }

    pub fn initial_hidden(&self) -> Vec<f32> {
        vec![0.0; self.config.nhid_lang]
    }

    pub fn encode_context(&self, features: &[f32]) -> Result<Tensor> {
        self.ctx_encoder.encode(features)
    }

    fn embed_token(&self, id: usize) -> Result<&[f32]> {
        self.word_embed.lookup(id).ok_or(ModelError::TokenOutOfRange {
            id,
            vocab_size: self.vocab_size(),
        })
    }

    fn embed_tokens(&self, tokens: &[usize]) -> Result<Vec<f32>> {
        let mut out = Vec::with_capacity(tokens.len() * self.config.nembed_word);
        for &t in tokens {
            out.extend_from_slice(self.embed_token(t)?);
        }
        Ok(out)
    }

    /// Initial word-level state for an utterance.
    ///
    /// With `feed_context_attend` the carried state is shifted by a projection
    /// of the mean embedding of the mentioned entities, which must be given.
    pub fn utterance_init(&self, carried: &[f32], ctx_h: &Tensor, dots_mentioned: Option<&[bool]>) -> Result<Vec<f32>> {
        let Some(ctx2hid) = &self.ctx2hid else {
            return Ok(carried.to_vec());
        };
        let dots = dots_mentioned.ok_or(ModelError::MissingAuxiliaryInput("dots_mentioned"))?;
        let (num_ent, dim) = ctx_h.dims2()?;
        if dots.len() != num_ent {
            return Err(ModelError::Core(dotref_core::CoreError::ShapeMismatch {
                expected: vec![num_ent],
                got: vec![dots.len()],
            }));
        }
        let idx: Vec<usize> = (0..num_ent).filter(|&e| dots[e]).collect();
        let mean = if idx.is_empty() {
            vec![0.0; dim]
        } else {
            ctx_h.mean_rows(&idx)?
        };
        let shift = ctx2hid.forward_row(&mean);
        Ok(carried.iter().zip(&shift).map(|(h, s)| h + s).collect())
    }

    /// Reader: encode `tokens` from `h0`.
    pub fn read(&self, tokens: &[usize], h0: &[f32]) -> Result<ReadOutput> {
        let xs = self.embed_tokens(tokens)?;
        let (hs, last_h) = self.rnn.run(&xs, tokens.len(), h0);
        Ok(ReadOutput { hs, last_h })
    }

    /// Reader over a batch of variable-length sequences; `h0` is `(batch, nhid_lang)`.
    pub fn read_batch(&self, seqs: &[Vec<usize>], h0: &Tensor) -> Result<PackedOutput> {
        let xs = seqs
            .iter()
            .map(|s| self.embed_tokens(s))
            .collect::<Result<Vec<_>>>()?;
        let lens: Vec<usize> = seqs.iter().map(Vec::len).collect();
        Ok(self.rnn.run_packed(&xs, &lens, h0)?)
    }

    /// Vocabulary logits for hidden state `h`: attention-pooled context is
    /// concatenated with `h`, passed through `hid2output` and projected onto
    /// the (tied) word embeddings.
    pub fn language_logits(&self, h: &[f32], ctx_h: &Tensor, lang_bias: Option<&[f32]>) -> Result<Vec<f32>> {
        let (_, pooled) = self.attention.pool(h, ctx_h, lang_bias)?;
        let mut joint = h.to_vec();
        joint.extend(pooled);
        let out = self.hid2output.forward_row(&joint);
        Ok(self.word_embed.project(&out))
    }

    /// Writer: generate an utterance autoregressively from `h0`.
    ///
    /// Every emitted token is also stepped through the recurrence, so the
    /// writer trajectory has one row per `[start] + tokens` position and
    /// matches the Reader's replay of the same tokens.
    pub fn write<R: Rng + ?Sized>(
        &self,
        ctx_h: &Tensor,
        h0: &[f32],
        req: &WriteRequest<'_>,
        rng: &mut R,
    ) -> Result<WriteOutput> {
        let limit = req.force_words.map_or(req.max_words, <[usize]>::len);
        let mut h = h0.to_vec();
        let mut current = req.start_token;
        let mut tokens = Vec::new();
        let mut logprobs = Vec::new();
        let mut writer_rows = Vec::new();
        let mut stopped = false;

        loop {
            h = self.rnn.step(self.embed_token(current)?, &h);
            writer_rows.push(h.clone());

            let at_stop = !tokens.is_empty() && req.stop_tokens.contains(&current);
            if req.force_words.is_some() {
                // Forced words are emitted in full, stop tokens included.
                if tokens.len() >= limit {
                    stopped = at_stop;
                    break;
                }
            } else if at_stop {
                stopped = true;
                break;
            } else if tokens.len() >= limit {
                break;
            }

            let logits = self.language_logits(&h, ctx_h, req.lang_bias)?;
            let scores = scaled_scores(&logits, req.temperature, &self.special_token_mask);
            let (next, logprob) = match req.force_words {
                Some(forced) => {
                    let next = forced[tokens.len()];
                    let lp = *log_softmax(&scores)
                        .get(next)
                        .ok_or(ModelError::TokenOutOfRange { id: next, vocab_size: self.vocab_size() })?;
                    (next, lp)
                }
                None => sample_token(&scores, rng),
            };
            trace!(step = tokens.len(), token = next, logprob, "writer step");
            tokens.push(next);
            logprobs.push(logprob);
            current = next;
        }

        if !stopped && req.force_words.is_none() {
            warn!(max_words = req.max_words, "writer hit max_words before a stop token");
        }

        let mut replay = Vec::with_capacity(tokens.len() + 1);
        replay.push(req.start_token);
        replay.extend_from_slice(&tokens);
        let ReadOutput { hs: reader_hs, last_h } = self.read(&replay, h0)?;

        Ok(WriteOutput {
            tokens,
            logprobs,
            reader_hs,
            writer_hs: Tensor::stack_rows(&writer_rows, self.hidden_size())?,
            last_h,
            stopped,
        })
    }

    /// Score every markable against every entity.
    ///
    /// Each span's three positions are gathered from `hs` and mean-pooled;
    /// the pooled vector is scored with the reference head. Returns
    /// `(num_markables, num_ent)` logits, or `None` for a turn without
    /// markables.
    pub fn reference_resolution(
        &self,
        ctx_h: &Tensor,
        hs: &Tensor,
        spans: &[SpanIndices],
        num_markables: usize,
        target: BeliefTarget,
        beliefs: Option<&Tensor>,
    ) -> Result<Option<Tensor>> {
        if spans.len() != num_markables {
            return Err(ModelError::MarkableCountMismatch {
                declared: num_markables,
                supplied: spans.len(),
            });
        }
        if num_markables == 0 {
            return Ok(None);
        }
        let (len, _) = hs.dims2()?;
        let (num_ent, _) = ctx_h.dims2()?;
        let bias = self.belief_bias.bias(target, beliefs)?;

        let mut rows = Vec::with_capacity(num_markables);
        for span in spans {
            if let Some(&bad) = span.iter().find(|&&i| i >= len) {
                return Err(ModelError::PositionOutOfRange { index: bad, len });
            }
            let pooled = self.span_representation(hs, span)?;
            let mut logits = self.attention.score(ScoreHead::Ref, &pooled, ctx_h)?;
            add_bias(&mut logits, bias.as_deref());
            rows.push(logits);
        }
        Ok(Some(Tensor::stack_rows(&rows, num_ent)?))
    }

    /// Mean of the hidden states at a span's start, end and sentence end.
    pub fn span_representation(&self, hs: &Tensor, span: &SpanIndices) -> Result<Vec<f32>> {
        Ok(hs.mean_rows(span)?)
    }

    /// Selection logits from the hidden state at `sel_idx` (or the
    /// attention-pooled utterance when `selection_attention` is on).
    pub fn selection(&self, ctx_h: &Tensor, hs: &Tensor, sel_idx: usize, beliefs: Option<&Tensor>) -> Result<Vec<f32>> {
        let sel_inpt = match &self.selection_attention {
            Some(attn) => attn.pool(ctx_h, hs)?.1,
            None => {
                let (len, _) = hs.dims2()?;
                hs.row(sel_idx)
                    .map_err(|_| ModelError::PositionOutOfRange { index: sel_idx, len })?
                    .to_vec()
            }
        };
        let mut logits = self.attention.score(ScoreHead::Sel, &sel_inpt, ctx_h)?;
        let bias = self.belief_bias.bias(BeliefTarget::Selection, beliefs)?;
        add_bias(&mut logits, bias.as_deref());
        Ok(logits)
    }

    /// Plan the mentions of the next utterance from `query`.
    pub fn next_mention(&self, ctx_h: &Tensor, query: &[f32], beliefs: Option<&Tensor>, mode: MentionMode) -> Result<MentionPlan> {
        let bias = self.belief_bias.bias(BeliefTarget::Mention, beliefs)?;
        self.mention.predict(query, ctx_h, &self.attention, bias.as_deref(), mode)
    }

    /// Probability that the next utterance is the selection utterance.
    pub fn is_selection_prediction(&self, h: &[f32]) -> f32 {
        sigmoid(self.is_sel_probe.forward_row(h)[0])
    }

    /// Carry the dialogue-level state across an utterance boundary.
    pub fn advance_turn(&self, carried: &[f32], utterance_h: &[f32]) -> Vec<f32> {
        self.turn_recurrence.advance(carried, utterance_h)
    }

    /// Generation-time bias for the language attention.
    pub fn generation_bias(&self, beliefs: Option<&Tensor>) -> Result<Option<Vec<f32>>> {
        self.belief_bias.bias(BeliefTarget::Generation, beliefs)
    }

    pub fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut p = prefixed("word_embed", self.word_embed.named_parameters());
        p.extend(prefixed("ctx_encoder", self.ctx_encoder.named_parameters()));
        p.extend(prefixed("reader", self.rnn.named_parameters()));
        if let TurnRecurrence::Hierarchical(cell) = &self.turn_recurrence {
            p.extend(prefixed("sentence_rnn", cell.named_parameters()));
        }
        p.extend(prefixed("hid2output", self.hid2output.named_parameters()));
        p.extend(self.attention.named_parameters());
        p.extend(prefixed("belief_bias", self.belief_bias.named_parameters()));
        if let Some(sa) = &self.selection_attention {
            p.extend(prefixed("ctx_layer.0", sa.ctx_layer.named_parameters()));
            p.extend(prefixed("selection_attention_layer", sa.scorer.named_parameters()));
        }
        if let Some(c) = &self.ctx2hid {
            p.extend(prefixed("ctx2hid", c.named_parameters()));
        }
        p.extend(prefixed("mention", self.mention.named_parameters()));
        p.extend(prefixed("is_sel_probe", self.is_sel_probe.named_parameters()));
        p
    }

    pub fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut p = prefixed_mut("word_embed", self.word_embed.named_parameters_mut());
        p.extend(prefixed_mut("ctx_encoder", self.ctx_encoder.named_parameters_mut()));
        p.extend(prefixed_mut("reader", self.rnn.named_parameters_mut()));
        if let TurnRecurrence::Hierarchical(cell) = &mut self.turn_recurrence {
            p.extend(prefixed_mut("sentence_rnn", cell.named_parameters_mut()));
        }
        p.extend(prefixed_mut("hid2output", self.hid2output.named_parameters_mut()));
        p.extend(self.attention.named_parameters_mut());
        p.extend(prefixed_mut("belief_bias", self.belief_bias.named_parameters_mut()));
        if let Some(sa) = &mut self.selection_attention {
            p.extend(prefixed_mut("ctx_layer.0", sa.ctx_layer.named_parameters_mut()));
            p.extend(prefixed_mut("selection_attention_layer", sa.scorer.named_parameters_mut()));
        }
        if let Some(c) = &mut self.ctx2hid {
            p.extend(prefixed_mut("ctx2hid", c.named_parameters_mut()));
        }
        p.extend(prefixed_mut("mention", self.mention.named_parameters_mut()));
        p.extend(prefixed_mut("is_sel_probe", self.is_sel_probe.named_parameters_mut()));
        p
    }

    /// Total parameter count.
    pub fn param_count(&self) -> usize {
        self.named_parameters().iter().map(|(_, t)| t.numel()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOCAB: usize = 12;
    const START: usize = 1;
    const STOP: usize = 5;
    const SEL: usize = 6;

    fn model_with(f: impl FnOnce(&mut ModelConfig)) -> ReferenceModel {
        let mut cfg = ModelConfig::tiny(VOCAB, 3);
        f(&mut cfg);
        ReferenceModel::new(cfg, &[0, 1, 2, 3]).unwrap()
    }

    fn ctx(model: &ReferenceModel) -> Tensor {
        let features: Vec<f32> = (0..12).map(|i| (i as f32 * 0.21).sin()).collect();
        model.encode_context(&features).unwrap()
    }

    fn request<'a>(force: Option<&'a [usize]>, max_words: usize) -> WriteRequest<'a> {
        WriteRequest {
            start_token: START,
            stop_tokens: &[STOP, SEL],
            max_words,
            temperature: 0.25,
            force_words: force,
            lang_bias: None,
        }
    }

    #[test]
    fn test_reader_writer_hidden_states_agree() {
        let model = model_with(|_| {});
        let c = ctx(&model);
        let h0: Vec<f32> = (0..16).map(|i| i as f32 * 0.01).collect();
        let forced = [7, 8, 9, STOP];
        let mut rng = StdRng::seed_from_u64(0);
        let out = model.write(&c, &h0, &request(Some(&forced), 100), &mut rng).unwrap();

        assert_eq!(out.tokens, forced);
        assert!(out.stopped);
        assert_eq!(out.writer_hs.dims(), &[5, 16]);
        assert!(out.writer_hs.approx_eq(&out.reader_hs, 1e-6));

        let read = model.read(&[START, 7, 8, 9, STOP], &h0).unwrap();
        assert!(read.hs.approx_eq(&out.writer_hs, 1e-6));
        assert_eq!(read.last_h, out.last_h);
    }

    #[test]
    fn test_forced_write_runs_past_inner_stop_token() {
        let model = model_with(|_| {});
        let c = ctx(&model);
        let forced = [7, STOP, 8];
        let mut rng = StdRng::seed_from_u64(3);
        let out = model.write(&c, &model.initial_hidden(), &request(Some(&forced), 100), &mut rng).unwrap();
        assert_eq!(out.tokens, forced);
        assert_eq!(out.logprobs.len(), 3);
        assert!(!out.stopped);
        assert_eq!(out.writer_hs.dims(), &[4, 16]);
        assert!(out.writer_hs.approx_eq(&out.reader_hs, 1e-6));
    }

    #[test]
    fn test_sampled_write_respects_mask_and_cap() {
        let model = model_with(|_| {});
        let c = ctx(&model);
        let mut rng = StdRng::seed_from_u64(42);
        let out = model.write(&c, &model.initial_hidden(), &request(None, 6), &mut rng).unwrap();
        assert!(out.tokens.len() <= 6);
        assert_eq!(out.logprobs.len(), out.tokens.len());
        assert!(out.tokens.iter().all(|&t| t > 3), "masked token generated: {:?}", out.tokens);
        assert!(out.logprobs.iter().all(|lp| *lp <= 0.0));
        assert_eq!(out.reader_hs.dims()[0], out.tokens.len() + 1);
        assert!(out.writer_hs.approx_eq(&out.reader_hs, 1e-5));
    }

    #[test]
    fn test_write_zero_words() {
        let model = model_with(|_| {});
        let c = ctx(&model);
        let out = model
            .write(&c, &model.initial_hidden(), &request(None, 0), &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert!(out.tokens.is_empty());
        assert_eq!(out.reader_hs.dims(), &[1, 16]);
    }

    #[test]
    fn test_read_rejects_unknown_token() {
        let model = model_with(|_| {});
        assert!(matches!(
            model.read(&[START, VOCAB + 3], &model.initial_hidden()),
            Err(ModelError::TokenOutOfRange { .. })
        ));
    }

    #[test]
    fn test_reference_resolution_shapes_and_absence() {
        let model = model_with(|_| {});
        let c = ctx(&model);
        let read = model.read(&[START, 7, 8, 9, STOP], &model.initial_hidden()).unwrap();

        let none = model
            .reference_resolution(&c, &read.hs, &[], 0, BeliefTarget::Ref, None)
            .unwrap();
        assert!(none.is_none());

        let logits = model
            .reference_resolution(&c, &read.hs, &[[1, 2, 4], [3, 3, 4]], 2, BeliefTarget::Ref, None)
            .unwrap()
            .unwrap();
        assert_eq!(logits.dims(), &[2, 3]);
    }

    #[test]
    fn test_reference_resolution_contract_violations() {
        let model = model_with(|_| {});
        let c = ctx(&model);
        let read = model.read(&[START, 7, 8], &model.initial_hidden()).unwrap();
        assert!(matches!(
            model.reference_resolution(&c, &read.hs, &[[1, 1, 2]], 2, BeliefTarget::Ref, None),
            Err(ModelError::MarkableCountMismatch { declared: 2, supplied: 1 })
        ));
        assert!(matches!(
            model.reference_resolution(&c, &read.hs, &[[1, 2, 3]], 1, BeliefTarget::Ref, None),
            Err(ModelError::PositionOutOfRange { index: 3, len: 3 })
        ));
    }

    #[test]
    fn test_degenerate_span_equals_single_position() {
        let model = model_with(|_| {});
        let read = model.read(&[START, 7, 8, 9], &model.initial_hidden()).unwrap();
        let pooled = model.span_representation(&read.hs, &[2, 2, 2]).unwrap();
        assert_eq!(pooled.as_slice(), read.hs.row(2).unwrap());
    }

    #[test]
    fn test_selection_gather_and_attention_modes() {
        let model = model_with(|_| {});
        let c = ctx(&model);
        let read = model.read(&[START, 7, SEL], &model.initial_hidden()).unwrap();
        assert_eq!(model.selection(&c, &read.hs, 2, None).unwrap().len(), 3);
        assert!(matches!(
            model.selection(&c, &read.hs, 3, None),
            Err(ModelError::PositionOutOfRange { index: 3, len: 3 })
        ));

        let attn_model = model_with(|cfg| cfg.selection_attention = true);
        let c = ctx(&attn_model);
        let read = attn_model.read(&[START, 7, SEL], &attn_model.initial_hidden()).unwrap();
        let logits = attn_model.selection(&c, &read.hs, 2, None).unwrap();
        assert_eq!(logits.len(), 3);
        assert!(logits.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_feed_context_attend_requires_mentions() {
        let model = model_with(|cfg| cfg.feed_context_attend = true);
        let c = ctx(&model);
        let h = model.initial_hidden();
        assert!(matches!(
            model.utterance_init(&h, &c, None),
            Err(ModelError::MissingAuxiliaryInput("dots_mentioned"))
        ));
        let shifted = model.utterance_init(&h, &c, Some(&[true, false, false])).unwrap();
        assert_eq!(shifted.len(), h.len());

        let plain = model_with(|_| {});
        assert_eq!(plain.utterance_init(&h, &c, None).unwrap(), h);
    }

    #[test]
    fn test_turn_recurrence_modes() {
        let flat = model_with(|cfg| cfg.turn_structure = TurnStructure::Flat);
        let carried = vec![0.2; 16];
        let utt = vec![-0.3; 16];
        assert_eq!(flat.advance_turn(&carried, &utt), utt);

        let hier = model_with(|cfg| cfg.turn_structure = TurnStructure::Hierarchical);
        let next = hier.advance_turn(&carried, &utt);
        assert_eq!(next.len(), 16);
        assert_ne!(next, utt);
    }

    #[test]
    fn test_is_selection_prediction_is_probability() {
        let model = model_with(|_| {});
        let p = model.is_selection_prediction(&model.initial_hidden());
        assert!((0.0..=1.0).contains(&p));
        assert!((p - 0.5).abs() < 1e-6, "zero state with zero bias should give 0.5");
    }

    #[test]
    fn test_parameter_names_cover_optional_modules() {
        let model = model_with(|cfg| {
            cfg.selection_attention = true;
            cfg.feed_context_attend = true;
        });
        let names: Vec<String> = model.named_parameters().into_iter().map(|(n, _)| n).collect();
        for key in [
            "word_embed.weight",
            "reader.weight_ih_l0",
            "sentence_rnn.weight_hh_l0",
            "ctx_layer.0.weight",
            "selection_attention_layer.3.bias",
            "ctx2hid.weight",
            "mention.slot_embed.weight",
        ] {
            assert!(names.iter().any(|n| n == key), "missing {key}");
        }
        assert!(model.param_count() > 1000);
    }
}
