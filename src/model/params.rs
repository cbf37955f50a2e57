//! Parameter Store - Learned weights for the four architectures
//!
//! Weight files are safetensors blobs keyed by the training-time state-dict
//! names (`encoder.0.weight`, `encoder.1.running_mean`, ...). Loading happens
//! once at startup; the typed parameters built from a [`StateDict`] are
//! immutable afterwards.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};
use safetensors::{Dtype, SafeTensors};

use super::architecture::ModelKind;

/// File name prefix used by the training script
pub const WEIGHT_FILE_PREFIX: &str = "enhanced_";

/// Weight file extension
pub const WEIGHT_FILE_EXTENSION: &str = "safetensors";

// ============================================================================
// ERROR HANDLING
// ============================================================================

/// Fatal startup error: the registry never serves with a partial model set.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("weight file for '{model}' not found at {}", path.display())]
    Missing { model: String, path: PathBuf },

    #[error("failed to read weights for '{model}': {source}")]
    Io {
        model: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed weights for '{model}': {reason}")]
    Malformed { model: String, reason: String },

    #[error("'{model}' is missing tensor '{tensor}'")]
    MissingTensor { model: String, tensor: String },

    #[error("'{model}' tensor '{tensor}' has shape {actual:?}, expected {expected}")]
    ShapeMismatch {
        model: String,
        tensor: String,
        expected: String,
        actual: Vec<usize>,
    },

    #[error("'{model}' tensor '{tensor}' has unsupported dtype {dtype}")]
    UnsupportedDtype {
        model: String,
        tensor: String,
        dtype: String,
    },

    #[error("'{model}' expects {actual} input features but the other models use {expected}")]
    InputDimMismatch {
        model: String,
        expected: usize,
        actual: usize,
    },

    #[error("'{model}' attention produces {width} weights, expected 1 or {channels}")]
    AttentionWidth {
        model: String,
        width: usize,
        channels: usize,
    },
}

// ============================================================================
// STATE DICT
// ============================================================================

#[derive(Debug, Clone)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Named tensors of one model, as produced by training
#[derive(Debug, Clone)]
pub struct StateDict {
    model: String,
    tensors: HashMap<String, Tensor>,
}

impl StateDict {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            tensors: HashMap::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Add a tensor; `data` must hold exactly `shape.iter().product()` finite values.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        shape: Vec<usize>,
        data: Vec<f32>,
    ) -> Result<(), LoadError> {
        let name = name.into();
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(LoadError::Malformed {
                model: self.model.clone(),
                reason: format!(
                    "tensor '{}' declares shape {:?} but holds {} values",
                    name,
                    shape,
                    data.len()
                ),
            });
        }
        if let Some(value) = data.iter().find(|v| !v.is_finite()) {
            return Err(LoadError::Malformed {
                model: self.model.clone(),
                reason: format!("tensor '{}' holds non-finite value {}", name, value),
            });
        }
        self.tensors.insert(name, Tensor { shape, data });
        Ok(())
    }

    /// Parse a safetensors blob.
    ///
    /// `num_batches_tracked` counters (int64 in the training export) carry no
    /// inference information and are skipped; any other non-F32 tensor is an error.
    pub fn from_safetensors(model: impl Into<String>, bytes: &[u8]) -> Result<Self, LoadError> {
        let mut dict = Self::new(model);

        let tensors = SafeTensors::deserialize(bytes).map_err(|e| LoadError::Malformed {
            model: dict.model.clone(),
            reason: e.to_string(),
        })?;

        for (name, view) in tensors.tensors() {
            if name.ends_with("num_batches_tracked") {
                continue;
            }
            if view.dtype() != Dtype::F32 {
                return Err(LoadError::UnsupportedDtype {
                    model: dict.model.clone(),
                    tensor: name,
                    dtype: format!("{:?}", view.dtype()),
                });
            }

            let data = view
                .data()
                .chunks_exact(4)
                .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect();
            dict.insert(name, view.shape().to_vec(), data)?;
        }

        Ok(dict)
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Tensor)> {
        self.tensors.iter()
    }

    pub fn get(&self, name: &str) -> Result<&Tensor, LoadError> {
        self.tensors.get(name).ok_or_else(|| LoadError::MissingTensor {
            model: self.model.clone(),
            tensor: name.to_string(),
        })
    }

    /// `[rows, cols]` matrix; `rows = None` accepts any row count.
    pub fn matrix(&self, name: &str, rows: Option<usize>, cols: usize) -> Result<Array2<f32>, LoadError> {
        let tensor = self.get(name)?;
        let shape_ok = match tensor.shape.as_slice() {
            [r, c] => *c == cols && rows.map_or(true, |rows| rows == *r),
            _ => false,
        };
        if !shape_ok {
            let expected = match rows {
                Some(r) => format!("[{r}, {cols}]"),
                None => format!("[_, {cols}]"),
            };
            return Err(self.shape_mismatch(name, expected, tensor));
        }

        Array2::from_shape_vec((tensor.shape[0], tensor.shape[1]), tensor.data.clone()).map_err(|e| {
            LoadError::Malformed {
                model: self.model.clone(),
                reason: format!("tensor '{}': {}", name, e),
            }
        })
    }

    pub fn vector(&self, name: &str, len: usize) -> Result<Array1<f32>, LoadError> {
        let tensor = self.get(name)?;
        if tensor.shape != [len] {
            return Err(self.shape_mismatch(name, format!("[{len}]"), tensor));
        }
        Ok(Array1::from_vec(tensor.data.clone()))
    }

    /// Column count of a 2-D weight, i.e. the width it consumes.
    pub fn input_width(&self, name: &str) -> Result<usize, LoadError> {
        let tensor = self.get(name)?;
        match tensor.shape.as_slice() {
            [_, cols] => Ok(*cols),
            _ => Err(self.shape_mismatch(name, "[_, input_dim]".to_string(), tensor)),
        }
    }

    fn shape_mismatch(&self, name: &str, expected: String, tensor: &Tensor) -> LoadError {
        LoadError::ShapeMismatch {
            model: self.model.clone(),
            tensor: name.to_string(),
            expected,
            actual: tensor.shape.clone(),
        }
    }
}

// ============================================================================
// SOURCES
// ============================================================================

/// Where model parameters come from
pub trait ParameterSource {
    fn load(&self, kind: ModelKind) -> Result<StateDict, LoadError>;
}

/// Directory of `enhanced_<id>.safetensors` files
#[derive(Debug, Clone)]
pub struct ParameterStore {
    root: PathBuf,
}

impl ParameterStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, kind: ModelKind) -> PathBuf {
        self.root
            .join(format!("{}{}.{}", WEIGHT_FILE_PREFIX, kind.id(), WEIGHT_FILE_EXTENSION))
    }
}

impl ParameterSource for ParameterStore {
    fn load(&self, kind: ModelKind) -> Result<StateDict, LoadError> {
        let path = self.path_for(kind);
        tracing::info!("Loading '{}' weights from {}", kind, path.display());

        if !path.exists() {
            return Err(LoadError::Missing {
                model: kind.id().to_string(),
                path,
            });
        }

        let bytes = std::fs::read(&path).map_err(|source| LoadError::Io {
            model: kind.id().to_string(),
            source,
        })?;

        let dict = StateDict::from_safetensors(kind.id(), &bytes)?;
        tracing::debug!("'{}': {} tensors, {} bytes", kind, dict.len(), bytes.len());
        Ok(dict)
    }
}
