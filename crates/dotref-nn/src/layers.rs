//! Dense layers on flat f32 rows.
//!
//! Parameter names follow `torch.nn.Sequential(Linear, ReLU, Dropout, ...)`
//! indexing, so the `k`-th linear layer of an [`Mlp`] is stored under
//! `{3k}.weight` / `{3k}.bias`. Dropout is an identity at inference time.

use rand::Rng;

use dotref_core::module::{prefixed, prefixed_mut};
use dotref_core::ops::relu;
use dotref_core::{CoreError, Module, Tensor};

/// Affine layer `y = W x + b` with `W` of shape `(out_dim, in_dim)`.
#[derive(Clone, Debug)]
pub struct Linear {
    pub weight: Tensor,
    pub bias: Tensor,
    in_dim: usize,
    out_dim: usize,
}

impl Linear {
    pub fn new<R: Rng + ?Sized>(in_dim: usize, out_dim: usize, init_range: f32, rng: &mut R) -> Self {
        Self {
            weight: Tensor::rand_uniform(&[out_dim, in_dim], init_range, rng),
            bias: Tensor::zeros(&[out_dim]),
            in_dim,
            out_dim,
        }
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    /// Apply to a single row.
    pub fn forward_row(&self, x: &[f32]) -> Vec<f32> {
        debug_assert_eq!(x.len(), self.in_dim);
        let w = self.weight.as_slice();
        let b = self.bias.as_slice();
        (0..self.out_dim)
            .map(|o| {
                let row = &w[o * self.in_dim..(o + 1) * self.in_dim];
                b[o] + row.iter().zip(x).map(|(a, v)| a * v).sum::<f32>()
            })
            .collect()
    }

    /// Apply to `n` rows stored contiguously.
    pub fn forward_rows(&self, x: &[f32], n: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(n * self.out_dim);
        for i in 0..n {
            out.extend(self.forward_row(&x[i * self.in_dim..(i + 1) * self.in_dim]));
        }
        out
    }
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> dotref_core::Result<Tensor> {
        let (n, cols) = input.dims2()?;
        if cols != self.in_dim {
            return Err(CoreError::ShapeMismatch {
                expected: vec![n, self.in_dim],
                got: vec![n, cols],
            });
        }
        Tensor::from_vec(self.forward_rows(input.as_slice(), n), &[n, self.out_dim])
    }

    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        vec![("weight".into(), &self.weight), ("bias".into(), &self.bias)]
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        vec![("weight".into(), &mut self.weight), ("bias".into(), &mut self.bias)]
    }
}

/// Stack of linear layers with ReLU between them.
#[derive(Clone, Debug)]
pub struct Mlp {
    pub layers: Vec<Linear>,
    /// Whether a ReLU also follows the last layer.
    final_relu: bool,
}

impl Mlp {
    /// `dims = [in, hidden..., out]`.
    pub fn new<R: Rng + ?Sized>(dims: &[usize], final_relu: bool, init_range: f32, rng: &mut R) -> Self {
        let layers = dims
            .windows(2)
            .map(|w| Linear::new(w[0], w[1], init_range, rng))
            .collect();
        Self { layers, final_relu }
    }

    pub fn in_dim(&self) -> usize {
        self.layers.first().map_or(0, Linear::in_dim)
    }

    pub fn out_dim(&self) -> usize {
        self.layers.last().map_or(0, Linear::out_dim)
    }

    pub fn forward_row(&self, x: &[f32]) -> Vec<f32> {
        let last = self.layers.len().saturating_sub(1);
        let mut h = x.to_vec();
        for (i, layer) in self.layers.iter().enumerate() {
            h = layer.forward_row(&h);
            if i < last || self.final_relu {
                h.iter_mut().for_each(|v| *v = relu(*v));
            }
        }
        h
    }
}

impl Module for Mlp {
    fn forward(&self, input: &Tensor) -> dotref_core::Result<Tensor> {
        let (n, cols) = input.dims2()?;
        if cols != self.in_dim() {
            return Err(CoreError::ShapeMismatch {
                expected: vec![n, self.in_dim()],
                got: vec![n, cols],
            });
        }
        let mut data = Vec::with_capacity(n * self.out_dim());
        for i in 0..n {
            data.extend(self.forward_row(input.row(i)?));
        }
        Tensor::from_vec(data, &[n, self.out_dim()])
    }

    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(i, l)| prefixed(&(3 * i).to_string(), l.named_parameters()))
            .collect()
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        self.layers
            .iter_mut()
            .enumerate()
            .flat_map(|(i, l)| prefixed_mut(&(3 * i).to_string(), l.named_parameters_mut()))
            .collect()
    }
}

/// Word embedding table, also used as the tied output projection.
#[derive(Clone, Debug)]
pub struct Embedding {
    pub weight: Tensor,
    vocab_size: usize,
    dim: usize,
}

impl Embedding {
    pub fn new<R: Rng + ?Sized>(vocab_size: usize, dim: usize, init_range: f32, rng: &mut R) -> Self {
        Self {
            weight: Tensor::rand_uniform(&[vocab_size, dim], init_range, rng),
            vocab_size,
            dim,
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn lookup(&self, id: usize) -> Option<&[f32]> {
        self.weight.row(id).ok()
    }

    /// Score a vector against every embedding row: `x · Wᵀ`.
    pub fn project(&self, x: &[f32]) -> Vec<f32> {
        let w = self.weight.as_slice();
        (0..self.vocab_size)
            .map(|v| {
                w[v * self.dim..(v + 1) * self.dim]
                    .iter()
                    .zip(x)
                    .map(|(a, b)| a * b)
                    .sum()
            })
            .collect()
    }
}

impl Module for Embedding {
    /// Treats each input value as a token id.
    fn forward(&self, input: &Tensor) -> dotref_core::Result<Tensor> {
        let mut data = Vec::with_capacity(input.numel() * self.dim);
        for &id in input.as_slice() {
            let id = id as usize;
            let row = self.weight.row(id)?;
            data.extend_from_slice(row);
        }
        Tensor::from_vec(data, &[input.numel(), self.dim])
    }

    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        vec![("weight".into(), &self.weight)]
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        vec![("weight".into(), &mut self.weight)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_linear_forward() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut lin = Linear::new(2, 1, 0.1, &mut rng);
        lin.weight = Tensor::from_f32(&[2.0, -1.0], &[1, 2]).unwrap();
        lin.bias = Tensor::from_f32(&[0.5], &[1]).unwrap();
        assert_eq!(lin.forward_row(&[1.0, 3.0]), vec![-0.5]);
        let out = lin.forward(&Tensor::from_f32(&[1.0, 3.0, 0.0, 0.0], &[2, 2]).unwrap()).unwrap();
        assert_eq!(out.as_slice(), &[-0.5, 0.5]);
    }

    #[test]
    fn test_mlp_shapes_and_names() {
        let mut rng = StdRng::seed_from_u64(1);
        let mlp = Mlp::new(&[6, 4, 1], false, 0.1, &mut rng);
        assert_eq!(mlp.in_dim(), 6);
        assert_eq!(mlp.out_dim(), 1);
        let names: Vec<String> = mlp.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["0.weight", "0.bias", "3.weight", "3.bias"]);
        assert_eq!(mlp.param_count(), 6 * 4 + 4 + 4 + 1);
    }

    #[test]
    fn test_mlp_final_relu_clamps() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut mlp = Mlp::new(&[1, 1], true, 0.1, &mut rng);
        mlp.layers[0].weight = Tensor::from_f32(&[-1.0], &[1, 1]).unwrap();
        assert_eq!(mlp.forward_row(&[3.0]), vec![0.0]);
    }

    #[test]
    fn test_embedding_tied_projection() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut emb = Embedding::new(3, 2, 0.1, &mut rng);
        emb.weight = Tensor::from_f32(&[1.0, 0.0, 0.0, 1.0, 1.0, 1.0], &[3, 2]).unwrap();
        assert_eq!(emb.project(&[2.0, 3.0]), vec![2.0, 3.0, 5.0]);
        assert_eq!(emb.lookup(1).unwrap(), &[0.0, 1.0]);
        assert!(emb.lookup(3).is_none());
    }
}
