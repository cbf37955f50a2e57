//! Model Registry - Identifier to pipeline lookup
//!
//! Built once before the server starts accepting requests and shared behind
//! an `Arc` afterwards. There is no interior mutability: concurrent readers
//! need no locking.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::architecture::{ModelKind, Pipeline};
use super::params::{LoadError, ParameterSource};

/// Selector that matches none of the registered identifiers
#[derive(Debug, Clone, thiserror::Error)]
#[error("Invalid model type '{requested}'. Available models: {}", available.join(", "))]
pub struct UnknownModelError {
    pub requested: String,
    pub available: Vec<&'static str>,
}

pub struct ModelRegistry {
    input_dim: usize,
    models: BTreeMap<ModelKind, Arc<dyn Pipeline>>,
}

impl ModelRegistry {
    /// Load all four architectures or none.
    ///
    /// `input_dim` comes from the first model loaded; every other model must
    /// consume the same width.
    pub fn load(source: &dyn ParameterSource) -> Result<Self, LoadError> {
        let mut input_dim: Option<usize> = None;
        let mut models = BTreeMap::new();

        for kind in ModelKind::ALL {
            let dict = source.load(kind)?;
            let width = dict.input_width(kind.first_weight())?;
            let expected = *input_dim.get_or_insert(width);

            if width != expected {
                return Err(LoadError::InputDimMismatch {
                    model: kind.id().to_string(),
                    expected,
                    actual: width,
                });
            }

            let pipeline: Arc<dyn Pipeline> = Arc::from(kind.build(&dict, expected)?);
            tracing::info!(
                "Model '{}' ready: {} -> {}, {} parameter bytes",
                kind,
                expected,
                expected,
                pipeline.parameter_bytes()
            );
            models.insert(kind, pipeline);
        }

        Ok(Self {
            input_dim: input_dim.unwrap_or_default(),
            models,
        })
    }

    /// Sensor vector width shared by every model
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Registered identifiers in registration order
    pub fn ids(&self) -> Vec<&'static str> {
        self.models.keys().map(|kind| kind.id()).collect()
    }

    /// Case-insensitive lookup
    pub fn resolve(&self, model_id: &str) -> Result<Arc<dyn Pipeline>, UnknownModelError> {
        ModelKind::from_id(model_id)
            .and_then(|kind| self.models.get(&kind))
            .cloned()
            .ok_or_else(|| UnknownModelError {
                requested: model_id.to_string(),
                available: self.ids(),
            })
    }

    /// Parameter bytes per model, for the memory gauge
    pub fn memory_usage(&self) -> Vec<(ModelKind, usize)> {
        self.models
            .iter()
            .map(|(kind, pipeline)| (*kind, pipeline.parameter_bytes()))
            .collect()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("input_dim", &self.input_dim)
            .field("models", &self.ids())
            .finish()
    }
}
