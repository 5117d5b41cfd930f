use crate::{Result, Tensor};

/// Base trait for network modules.
pub trait Module: Send + Sync {
    /// Forward pass over a `(rows, in_dim)` input.
    fn forward(&self, input: &Tensor) -> Result<Tensor>;

    /// Parameters keyed by their dotted path, e.g. `attn.0.weight`.
    fn named_parameters(&self) -> Vec<(String, &Tensor)>;

    /// Mutable access to the same parameters, in the same order.
    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)>;

    fn param_count(&self) -> usize {
        self.named_parameters().iter().map(|(_, t)| t.numel()).sum()
    }
}

/// Prefix every parameter name of a child module.
pub fn prefixed<'a>(prefix: &str, params: Vec<(String, &'a Tensor)>) -> Vec<(String, &'a Tensor)> {
    params
        .into_iter()
        .map(|(name, t)| (format!("{prefix}.{name}"), t))
        .collect()
}

pub fn prefixed_mut<'a>(
    prefix: &str,
    params: Vec<(String, &'a mut Tensor)>,
) -> Vec<(String, &'a mut Tensor)> {
    params
        .into_iter()
        .map(|(name, t)| (format!("{prefix}.{name}"), t))
        .collect()
}
