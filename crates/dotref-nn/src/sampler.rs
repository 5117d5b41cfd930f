//! Token sampling for the Writer.

use rand::Rng;

use dotref_core::ops::{log_softmax, softmax};

/// Logit offset that effectively removes a token from the distribution.
pub const MASK_VALUE: f32 = -1e9;

/// Build an additive mask over the vocabulary with `MASK_VALUE` at `ids`.
pub fn make_mask(vocab_size: usize, ids: &[usize]) -> Vec<f32> {
    let mut mask = vec![0.0f32; vocab_size];
    for &id in ids {
        if let Some(m) = mask.get_mut(id) {
            *m = MASK_VALUE;
        }
    }
    mask
}

/// Temperature-scaled, masked scores: `logits / T - max + mask`.
pub fn scaled_scores(logits: &[f32], temperature: f32, mask: &[f32]) -> Vec<f32> {
    let temp = temperature.max(1e-6);
    let scaled: Vec<f32> = logits.iter().map(|&x| x / temp).collect();
    let max_val = scaled.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    scaled
        .iter()
        .zip(mask)
        .map(|(&s, &m)| s - max_val + m)
        .collect()
}

/// Draw an index proportionally to `probs`.
pub fn sample_index<R: Rng + ?Sized>(probs: &[f32], rng: &mut R) -> usize {
    let total: f32 = probs.iter().sum();
    let r: f32 = rng.gen::<f32>() * total;
    let mut acc = 0.0f32;
    for (i, &p) in probs.iter().enumerate() {
        acc += p;
        if acc >= r && p > 0.0 {
            return i;
        }
    }
    probs
        .iter()
        .rposition(|&p| p > 0.0)
        .unwrap_or(0)
}

/// Sample a token from scores, returning it with its log-probability.
pub fn sample_token<R: Rng + ?Sized>(scores: &[f32], rng: &mut R) -> (usize, f32) {
    let probs = softmax(scores);
    let idx = sample_index(&probs, rng);
    (idx, log_softmax(scores)[idx])
}
