//! SafeTensors weight loading.
//!
//! Tensors are matched by the dotted names of [`ReferenceModel::named_parameters`]
//! (`reader.weight_ih_l0`, `lang_attn.0.weight`, ...). F32, F16 and BF16
//! checkpoints are accepted; everything is widened to f32.

use std::collections::HashMap;
use std::path::Path;

use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use thiserror::Error;
use tracing::{debug, info};

use dotref_core::Tensor;

use crate::model::ReferenceModel;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SafeTensors error: {0}")]
    SafeTensors(String),

    #[error("Missing key: {0}")]
    MissingKey(String),

    #[error("Unsupported dtype {dtype} for {key}")]
    Dtype { key: String, dtype: String },

    #[error("Shape mismatch for {key}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        key: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
}

/// Convert a SafeTensors tensor view to `Vec<f32>`.
fn tensor_to_f32(key: &str, view: &TensorView<'_>) -> Result<Vec<f32>, LoadError> {
    let data = view.data();
    match view.dtype() {
        Dtype::F32 => Ok(data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()),
        Dtype::F16 => Ok(data
            .chunks_exact(2)
            .map(|b| half::f16::from_bits(u16::from_le_bytes([b[0], b[1]])).to_f32())
            .collect()),
        Dtype::BF16 => Ok(data
            .chunks_exact(2)
            .map(|b| half::bf16::from_bits(u16::from_le_bytes([b[0], b[1]])).to_f32())
            .collect()),
        other => Err(LoadError::Dtype {
            key: key.to_string(),
            dtype: format!("{other:?}"),
        }),
    }
}

/// Overwrite the model's parameters from a `.safetensors` file.
///
/// With `strict`, every model parameter must be present; otherwise missing
/// keys keep their initial values. Returns the number of tensors loaded.
pub fn load_weights(path: &Path, model: &mut ReferenceModel, strict: bool) -> Result<usize, LoadError> {
    let bytes = std::fs::read(path)?;
    let loaded = load_weights_from_bytes(&bytes, model, strict)?;
    info!(path = %path.display(), loaded, "loaded weights");
    Ok(loaded)
}

/// Like [`load_weights`], from an in-memory checkpoint.
///
/// Every tensor is checked and decoded before any parameter is written, so
/// on error the model is left exactly as it was.
pub fn load_weights_from_bytes(bytes: &[u8], model: &mut ReferenceModel, strict: bool) -> Result<usize, LoadError> {
    let tensors = SafeTensors::deserialize(bytes).map_err(|e| LoadError::SafeTensors(e.to_string()))?;

    let mut staged: Vec<(usize, Vec<f32>)> = Vec::new();
    for (i, (name, param)) in model.named_parameters().into_iter().enumerate() {
        let view = match tensors.tensor(&name) {
            Ok(view) => view,
            Err(_) if strict => return Err(LoadError::MissingKey(name)),
            Err(_) => {
                debug!(key = %name, "not in checkpoint, keeping initial value");
                continue;
            }
        };
        if view.shape() != param.dims() {
            return Err(LoadError::ShapeMismatch {
                key: name,
                expected: param.dims().to_vec(),
                got: view.shape().to_vec(),
            });
        }
        staged.push((i, tensor_to_f32(&name, &view)?));
    }

    let loaded = staged.len();
    let mut params = model.named_parameters_mut();
    for (i, values) in staged {
        params[i].1.data_mut().copy_from_slice(&values);
    }
    Ok(loaded)
}

/// Serialize every parameter as F32.
pub fn save_weights_to_bytes(model: &ReferenceModel) -> Result<Vec<u8>, LoadError> {
    let params: Vec<(String, Vec<usize>, Vec<u8>)> = model
        .named_parameters()
        .into_iter()
        .map(|(name, t): (String, &Tensor)| {
            let bytes = t.as_slice().iter().flat_map(|v| v.to_le_bytes()).collect();
            (name, t.dims().to_vec(), bytes)
        })
        .collect();

    let mut views = Vec::with_capacity(params.len());
    for (name, shape, bytes) in &params {
        let view = TensorView::new(Dtype::F32, shape.clone(), bytes)
            .map_err(|e| LoadError::SafeTensors(e.to_string()))?;
        views.push((name.clone(), view));
    }
    let metadata: Option<HashMap<String, String>> = None;
    safetensors::serialize(views, &metadata).map_err(|e| LoadError::SafeTensors(e.to_string()))
}

pub fn save_weights(path: &Path, model: &ReferenceModel) -> Result<(), LoadError> {
    std::fs::write(path, save_weights_to_bytes(model)?)?;
    Ok(())
}
