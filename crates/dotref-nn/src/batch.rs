//! Offline forward over a batch of whole dialogues.
//!
//! Sentences are read position-aligned across dialogues with the
//! length-aware packed GRU; everything downstream of the Reader runs per
//! dialogue on that dialogue's own (unpadded) trajectory.

use tracing::debug;

use dotref_core::Tensor;

use crate::attention::BeliefTarget;
use crate::error::{ModelError, Result};
use crate::gru::PackedOutput;
use crate::model::{ReferenceModel, SpanIndices};

/// The `i`-th sentence of every dialogue in the batch.
#[derive(Clone, Debug, Default)]
pub struct SentenceBatch {
    /// One token sequence per dialogue, each starting with its role marker.
    pub tokens: Vec<Vec<usize>>,
    /// Referent spans per dialogue.
    pub ref_spans: Vec<Vec<SpanIndices>>,
    /// Mentioned entities per dialogue; required with `feed_context_attend`.
    pub dots_mentioned: Option<Vec<Vec<bool>>>,
}

#[derive(Clone, Debug, Default)]
pub struct DialogueBatch {
    /// Flattened entity features, one entry per dialogue.
    pub contexts: Vec<Vec<f32>>,
    pub sentences: Vec<SentenceBatch>,
    /// Position of the selection token in each dialogue's final sentence.
    pub sel_idx: Vec<usize>,
}

impl DialogueBatch {
    pub fn batch_size(&self) -> usize {
        self.contexts.len()
    }
}

#[derive(Clone, Debug)]
pub struct SentenceOutput {
    /// Per dialogue, `(len, vocab_size)` next-token logits.
    pub lang_logits: Vec<Tensor>,
    /// Per dialogue, `(num_markables, num_ent)` or `None` without markables.
    pub ref_logits: Vec<Option<Tensor>>,
    /// Per dialogue reader trajectory, `(len, nhid_lang)`.
    pub hs: Vec<Tensor>,
}

#[derive(Clone, Debug)]
pub struct BatchOutput {
    pub sentences: Vec<SentenceOutput>,
    /// Selection logits from each dialogue's final sentence.
    pub sel_logits: Vec<Vec<f32>>,
}

/// Rows `0..len` of dialogue `b` in a `(max_len, batch, hidden)` packed trajectory.
fn unpack(packed: &PackedOutput, b: usize) -> Result<Tensor> {
    let dims = packed.hs.dims();
    let (batch, hidden) = (dims[1], dims[2]);
    let len = packed.lens[b];
    let data = packed.hs.as_slice();
    let mut out = Vec::with_capacity(len * hidden);
    for t in 0..len {
        let off = (t * batch + b) * hidden;
        out.extend_from_slice(&data[off..off + hidden]);
    }
    Ok(Tensor::from_vec(out, &[len, hidden])?)
}

fn check_width(what: &'static str, got: usize, batch: usize) -> Result<()> {
    if got != batch {
        return Err(ModelError::Config(format!("{what}: {got} entries for a batch of {batch}")));
    }
    Ok(())
}

impl ReferenceModel {
    /// Teacher-forced pass over complete dialogues.
    pub fn forward_dialogues(&self, batch: &DialogueBatch) -> Result<BatchOutput> {
        let bsz = batch.batch_size();
        if bsz == 0 || batch.sentences.is_empty() {
            return Err(ModelError::EmptyInput("dialogue batch"));
        }
        check_width("sel_idx", batch.sel_idx.len(), bsz)?;

        let ctx_hs = batch
            .contexts
            .iter()
            .map(|c| self.encode_context(c))
            .collect::<Result<Vec<_>>>()?;
        let mut carried: Vec<Vec<f32>> = vec![self.initial_hidden(); bsz];
        let mut sentences = Vec::with_capacity(batch.sentences.len());

        for (i, sentence) in batch.sentences.iter().enumerate() {
            check_width("tokens", sentence.tokens.len(), bsz)?;
            check_width("ref_spans", sentence.ref_spans.len(), bsz)?;

            let mut h0_rows = Vec::with_capacity(bsz);
            for b in 0..bsz {
                let dots = sentence.dots_mentioned.as_ref().and_then(|d| d.get(b)).map(Vec::as_slice);
                h0_rows.push(self.utterance_init(&carried[b], &ctx_hs[b], dots)?);
            }
            let h0 = Tensor::stack_rows(&h0_rows, self.hidden_size())?;
            let packed = self.read_batch(&sentence.tokens, &h0)?;

            let mut out = SentenceOutput {
                lang_logits: Vec::with_capacity(bsz),
                ref_logits: Vec::with_capacity(bsz),
                hs: Vec::with_capacity(bsz),
            };
            for b in 0..bsz {
                let hs = unpack(&packed, b)?;
                let (len, _) = hs.dims2()?;
                let mut rows = Vec::with_capacity(len);
                for t in 0..len {
                    rows.push(self.language_logits(hs.row(t)?, &ctx_hs[b], None)?);
                }
                out.lang_logits.push(Tensor::stack_rows(&rows, self.vocab_size())?);

                let spans = &sentence.ref_spans[b];
                out.ref_logits.push(self.reference_resolution(
                    &ctx_hs[b],
                    &hs,
                    spans,
                    spans.len(),
                    BeliefTarget::Ref,
                    None,
                )?);

                if len > 0 {
                    let last = packed.last_h.row(b)?;
                    carried[b] = self.advance_turn(&carried[b], last);
                }
                out.hs.push(hs);
            }
            debug!(sentence = i, batch = bsz, max_len = packed.lens.iter().max().copied().unwrap_or(0), "batched sentence");
            sentences.push(out);
        }

        let mut sel_logits = Vec::with_capacity(bsz);
        if let Some(last) = sentences.last() {
            for b in 0..bsz {
                sel_logits.push(self.selection(&ctx_hs[b], &last.hs[b], batch.sel_idx[b], None)?);
            }
        }

        Ok(BatchOutput { sentences, sel_logits })
    }
}
