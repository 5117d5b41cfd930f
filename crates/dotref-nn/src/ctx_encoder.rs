//! Context encoder: one embedding per entity in the scene.
//!
//! Each entity is embedded from its own properties and from the mean of its
//! pairwise feature differences to every other entity, so spatial relations
//! ("left of", "darker than") are visible to the attention scorers.

use rand::Rng;

use dotref_core::module::{prefixed, prefixed_mut};
use dotref_core::{Module, Tensor};

use crate::config::ModelConfig;
use crate::error::{ModelError, Result};
use crate::layers::{Linear, Mlp};

#[derive(Clone, Debug)]
pub struct ContextEncoder {
    property_encoder: Mlp,
    relation_encoder: Mlp,
    output: Linear,
    num_ent: usize,
    dim_ent: usize,
}

impl ContextEncoder {
    pub fn new<R: Rng + ?Sized>(config: &ModelConfig, rng: &mut R) -> Self {
        let r = config.init_range;
        Self {
            property_encoder: Mlp::new(&[config.dim_ent, config.nhid_rel], true, r, rng),
            relation_encoder: Mlp::new(&[config.dim_ent, config.nhid_rel], true, r, rng),
            output: Linear::new(2 * config.nhid_rel, config.nembed_ctx, r, rng),
            num_ent: config.num_ent,
            dim_ent: config.dim_ent,
        }
    }

    /// Encode a flat `(num_ent * dim_ent)` feature vector into `(num_ent, nembed_ctx)`.
    pub fn encode(&self, features: &[f32]) -> Result<Tensor> {
        let expected = self.num_ent * self.dim_ent;
        if features.len() != expected {
            return Err(ModelError::ContextSize {
                expected,
                got: features.len(),
            });
        }

        let diffs = pairwise_differences(features, self.num_ent, self.dim_ent);
        let rel_dim = self.relation_encoder.out_dim();
        let mut rows = Vec::with_capacity(self.num_ent);
        for i in 0..self.num_ent {
            let props = self
                .property_encoder
                .forward_row(&features[i * self.dim_ent..(i + 1) * self.dim_ent]);

            let mut rel = vec![0.0f32; rel_dim];
            if self.num_ent > 1 {
                for j in (0..self.num_ent).filter(|&j| j != i) {
                    let off = (i * self.num_ent + j) * self.dim_ent;
                    let enc = self.relation_encoder.forward_row(&diffs[off..off + self.dim_ent]);
                    rel.iter_mut().zip(&enc).for_each(|(a, v)| *a += v);
                }
                let inv = 1.0 / (self.num_ent - 1) as f32;
                rel.iter_mut().for_each(|a| *a *= inv);
            }

            let mut joint = props;
            joint.extend(rel);
            rows.push(self.output.forward_row(&joint));
        }
        Ok(Tensor::stack_rows(&rows, self.output.out_dim())?)
    }
}

/// `diff[i][j] = features[i] - features[j]`, flattened to `(n, n, dim)`.
pub fn pairwise_differences(features: &[f32], n: usize, dim: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; n * n * dim];
    for i in 0..n {
        for j in 0..n {
            let off = (i * n + j) * dim;
            for k in 0..dim {
                out[off + k] = features[i * dim + k] - features[j * dim + k];
            }
        }
    }
    out
}

impl Module for ContextEncoder {
    fn forward(&self, input: &Tensor) -> dotref_core::Result<Tensor> {
        self.encode(input.as_slice()).map_err(|e| match e {
            ModelError::Core(c) => c,
            _ => dotref_core::CoreError::DataLength {
                shape: vec![self.num_ent, self.dim_ent],
                numel: self.num_ent * self.dim_ent,
                len: input.numel(),
            },
        })
    }

    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut p = prefixed("property_encoder", self.property_encoder.named_parameters());
        p.extend(prefixed("relation_encoder", self.relation_encoder.named_parameters()));
        p.extend(prefixed("output", self.output.named_parameters()));
        p
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut p = prefixed_mut("property_encoder", self.property_encoder.named_parameters_mut());
        p.extend(prefixed_mut("relation_encoder", self.relation_encoder.named_parameters_mut()));
        p.extend(prefixed_mut("output", self.output.named_parameters_mut()));
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn encoder(num_ent: usize) -> ContextEncoder {
        let cfg = ModelConfig::tiny(10, num_ent);
        ContextEncoder::new(&cfg, &mut StdRng::seed_from_u64(5))
    }

    #[test]
    fn test_encode_shape() {
        let enc = encoder(3);
        let ctx: Vec<f32> = (0..12).map(|i| i as f32 * 0.1).collect();
        let h = enc.encode(&ctx).unwrap();
        assert_eq!(h.dims(), &[3, 16]);
    }

    #[test]
    fn test_encode_wrong_size() {
        let enc = encoder(3);
        assert!(matches!(
            enc.encode(&[0.0; 5]),
            Err(ModelError::ContextSize { expected: 12, got: 5 })
        ));
    }

    #[test]
    fn test_encode_deterministic() {
        let enc = encoder(2);
        let ctx = [0.1, -0.2, 0.3, 0.9, -0.5, 0.4, 0.0, 0.2];
        assert_eq!(enc.encode(&ctx).unwrap(), enc.encode(&ctx).unwrap());
    }

    #[test]
    fn test_pairwise_differences_antisymmetric() {
        let f = [1.0, 2.0, 4.0, 8.0];
        let d = pairwise_differences(&f, 2, 2);
        assert_eq!(&d[0..2], &[0.0, 0.0]);
        assert_eq!(&d[2..4], &[-3.0, -6.0]);
        assert_eq!(&d[4..6], &[3.0, 6.0]);
    }

    #[test]
    fn test_single_entity_has_no_relations() {
        let enc = encoder(1);
        let h = enc.encode(&[0.1, 0.2, 0.3, 0.4]).unwrap();
        assert_eq!(h.dims(), &[1, 16]);
    }
}
