//! GRU recurrence shared by the Reader and the Writer.
//!
//! There is exactly one weight set. Reading a sequence is repeated
//! application of [`GruCell::step`], and the Writer advances one token at a
//! time with the same call, so both produce the same hidden states for the
//! same tokens.
//!
//! Gate layout matches `torch.nn.GRU`: rows `[r | z | n]` of `weight_ih`
//! `(3H, I)` and `weight_hh` `(3H, H)`.
//!
//! ```text
//! r  = σ(W_ir x + b_ir + W_hr h + b_hr)
//! z  = σ(W_iz x + b_iz + W_hz h + b_hz)
//! n  = tanh(W_in x + b_in + r ⊙ (W_hn h + b_hn))
//! h' = (1 − z) ⊙ n + z ⊙ h
//! ```

use rand::Rng;

use dotref_core::ops::sigmoid;
use dotref_core::{CoreError, Module, Tensor};

#[derive(Clone, Debug)]
pub struct GruCell {
    pub weight_ih: Tensor,
    pub weight_hh: Tensor,
    pub bias_ih: Tensor,
    pub bias_hh: Tensor,
    input_size: usize,
    hidden_size: usize,
}

/// Output of running a batch of variable-length sequences.
#[derive(Clone, Debug)]
pub struct PackedOutput {
    /// `(max_len, batch, hidden)`; rows past a sequence's length are zero.
    pub hs: Tensor,
    /// `(batch, hidden)`: the state after each sequence's own last token.
    pub last_h: Tensor,
    pub lens: Vec<usize>,
}

impl GruCell {
    pub fn new<R: Rng + ?Sized>(input_size: usize, hidden_size: usize, init_range: f32, rng: &mut R) -> Self {
        Self {
            weight_ih: Tensor::rand_uniform(&[3 * hidden_size, input_size], init_range, rng),
            weight_hh: Tensor::rand_uniform(&[3 * hidden_size, hidden_size], init_range, rng),
            bias_ih: Tensor::zeros(&[3 * hidden_size]),
            bias_hh: Tensor::zeros(&[3 * hidden_size]),
            input_size,
            hidden_size,
        }
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Advance the state by one input vector.
    pub fn step(&self, x: &[f32], h: &[f32]) -> Vec<f32> {
        let hs = self.hidden_size;
        let gi = affine(self.weight_ih.as_slice(), self.bias_ih.as_slice(), x, 3 * hs);
        let gh = affine(self.weight_hh.as_slice(), self.bias_hh.as_slice(), h, 3 * hs);

        let mut out = vec![0.0f32; hs];
        for j in 0..hs {
            let r = sigmoid(gi[j] + gh[j]);
            let z = sigmoid(gi[hs + j] + gh[hs + j]);
            let n = (gi[2 * hs + j] + r * gh[2 * hs + j]).tanh();
            out[j] = (1.0 - z) * n + z * h[j];
        }
        out
    }

    /// Run over `len` inputs stored contiguously, starting from `h0`.
    ///
    /// Returns the trajectory `(len, hidden)` and the final state; for an
    /// empty sequence the final state is `h0`.
    pub fn run(&self, xs: &[f32], len: usize, h0: &[f32]) -> (Tensor, Vec<f32>) {
        let mut h = h0.to_vec();
        let mut traj = Vec::with_capacity(len * self.hidden_size);
        for t in 0..len {
            h = self.step(&xs[t * self.input_size..(t + 1) * self.input_size], &h);
            traj.extend_from_slice(&h);
        }
        let traj = Tensor::from_vec(traj, &[len, self.hidden_size])
            .unwrap_or_else(|_| Tensor::zeros(&[0, self.hidden_size]));
        (traj, h)
    }

    /// Length-aware batched run. `xs[b]` holds `lens[b]` inputs; each
    /// sequence advances only over its own length.
    pub fn run_packed(
        &self,
        xs: &[Vec<f32>],
        lens: &[usize],
        h0: &Tensor,
    ) -> Result<PackedOutput, CoreError> {
        let batch = xs.len();
        let hs = self.hidden_size;
        if lens.len() != batch || h0.dims() != [batch, hs] {
            return Err(CoreError::ShapeMismatch {
                expected: vec![batch, hs],
                got: h0.dims().to_vec(),
            });
        }
        for (x, &len) in xs.iter().zip(lens) {
            if x.len() != len * self.input_size {
                return Err(CoreError::DataLength {
                    shape: vec![len, self.input_size],
                    numel: len * self.input_size,
                    len: x.len(),
                });
            }
        }

        let max_len = lens.iter().copied().max().unwrap_or(0);
        let mut states: Vec<Vec<f32>> = (0..batch).map(|b| h0.row(b).map(<[f32]>::to_vec)).collect::<Result<_, _>>()?;
        let mut out = vec![0.0f32; max_len * batch * hs];
        for t in 0..max_len {
            for b in 0..batch {
                if t >= lens[b] {
                    continue;
                }
                let x = &xs[b][t * self.input_size..(t + 1) * self.input_size];
                states[b] = self.step(x, &states[b]);
                let off = (t * batch + b) * hs;
                out[off..off + hs].copy_from_slice(&states[b]);
            }
        }

        Ok(PackedOutput {
            hs: Tensor::from_vec(out, &[max_len, batch, hs])?,
            last_h: Tensor::stack_rows(&states, hs)?,
            lens: lens.to_vec(),
        })
    }
}

fn affine(w: &[f32], b: &[f32], x: &[f32], rows: usize) -> Vec<f32> {
    let cols = x.len();
    (0..rows)
        .map(|o| b[o] + w[o * cols..(o + 1) * cols].iter().zip(x).map(|(a, v)| a * v).sum::<f32>())
        .collect()
}

impl Module for GruCell {
    /// Run a `(len, input)` sequence from a zero state; returns the trajectory.
    fn forward(&self, input: &Tensor) -> dotref_core::Result<Tensor> {
        let (len, cols) = input.dims2()?;
        if cols != self.input_size {
            return Err(CoreError::ShapeMismatch {
                expected: vec![len, self.input_size],
                got: vec![len, cols],
            });
        }
        let (traj, _) = self.run(input.as_slice(), len, &vec![0.0; self.hidden_size]);
        Ok(traj)
    }

    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        vec![
            ("weight_ih_l0".into(), &self.weight_ih),
            ("weight_hh_l0".into(), &self.weight_hh),
            ("bias_ih_l0".into(), &self.bias_ih),
            ("bias_hh_l0".into(), &self.bias_hh),
        ]
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        vec![
            ("weight_ih_l0".into(), &mut self.weight_ih),
            ("weight_hh_l0".into(), &mut self.weight_hh),
            ("bias_ih_l0".into(), &mut self.bias_ih),
            ("bias_hh_l0".into(), &mut self.bias_hh),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn cell() -> GruCell {
        let mut rng = StdRng::seed_from_u64(11);
        GruCell::new(3, 4, 0.5, &mut rng)
    }

    #[test]
    fn test_step_zero_weights_keeps_half() {
        let mut rng = StdRng::seed_from_u64(0);
        let cell = GruCell::new(2, 2, 0.0, &mut rng);
        // z = σ(0) = 0.5 and n = tanh(0) = 0, so h' = 0.5 h.
        let h = cell.step(&[1.0, -1.0], &[0.8, -0.4]);
        assert!((h[0] - 0.4).abs() < 1e-6);
        assert!((h[1] + 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_run_matches_repeated_step() {
        let cell = cell();
        let xs: Vec<f32> = (0..9).map(|i| (i as f32 * 0.37).sin()).collect();
        let h0 = vec![0.1, 0.0, -0.1, 0.2];
        let (traj, last) = cell.run(&xs, 3, &h0);

        let mut h = h0.clone();
        for t in 0..3 {
            h = cell.step(&xs[t * 3..(t + 1) * 3], &h);
            assert_eq!(traj.row(t).unwrap(), h.as_slice());
        }
        assert_eq!(last, h);
    }

    #[test]
    fn test_run_empty_returns_initial_state() {
        let cell = cell();
        let (traj, last) = cell.run(&[], 0, &[0.5; 4]);
        assert_eq!(traj.dims(), &[0, 4]);
        assert_eq!(last, vec![0.5; 4]);
    }

    #[test]
    fn test_run_packed_respects_lengths() {
        let cell = cell();
        let a: Vec<f32> = vec![0.3; 3 * 3];
        let b: Vec<f32> = vec![-0.2; 3];
        let h0 = Tensor::zeros(&[2, 4]);
        let out = cell.run_packed(&[a.clone(), b.clone()], &[3, 1], &h0).unwrap();
        assert_eq!(out.hs.dims(), &[3, 2, 4]);

        let (traj_a, last_a) = cell.run(&a, 3, &[0.0; 4]);
        let (_, last_b) = cell.run(&b, 1, &[0.0; 4]);
        assert_eq!(out.last_h.row(0).unwrap(), last_a.as_slice());
        assert_eq!(out.last_h.row(1).unwrap(), last_b.as_slice());
        // Position 2 of sequence a is populated, of sequence b it is padding.
        let hs = out.hs.as_slice();
        assert_eq!(&hs[(2 * 2) * 4..(2 * 2 + 1) * 4], traj_a.row(2).unwrap());
        assert!(hs[(2 * 2 + 1) * 4..(2 * 2 + 2) * 4].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_run_packed_shape_errors() {
        let cell = cell();
        let h0 = Tensor::zeros(&[1, 4]);
        assert!(cell.run_packed(&[vec![0.0; 3]], &[2], &h0).is_err());
        assert!(cell.run_packed(&[vec![0.0; 3]], &[1], &Tensor::zeros(&[2, 4])).is_err());
    }
}
