//! Numeric kernels on flat f32 slices.

#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[inline]
pub fn relu(x: f32) -> f32 {
    x.max(0.0)
}

/// Numerically stable softmax. Returns a uniform distribution if every
/// exponent underflows.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_val = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max_val).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        exps.iter().map(|&x| x / sum).collect()
    } else {
        let uniform = 1.0 / logits.len().max(1) as f32;
        vec![uniform; logits.len()]
    }
}

pub fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max_val = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let lse = logits.iter().map(|&x| (x - max_val).exp()).sum::<f32>().ln() + max_val;
    logits.iter().map(|&x| x - lse).collect()
}

/// Index of the largest value; ties resolve to the lowest index.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Weighted sum of the rows of a `(rows, cols)` matrix.
pub fn weighted_row_sum(weights: &[f32], matrix: &[f32], cols: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; cols];
    for (r, &w) in weights.iter().enumerate() {
        let row = &matrix[r * cols..(r + 1) * cols];
        for (o, v) in out.iter_mut().zip(row) {
            *o += w * v;
        }
    }
    out
}
