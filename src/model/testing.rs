//! Seeded weights for tests

use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::architecture::ModelKind;
use super::params::{LoadError, ParameterSource, StateDict};

/// Generates a full state dict for each architecture from a fixed seed.
#[derive(Debug, Clone)]
pub struct SeededWeights {
    pub input_dim: usize,
    pub seed: u64,
    /// Rows of `attention.2.weight`
    pub attention_width: usize,
    /// Per-model input width override, for dimension mismatch tests
    pub input_dim_for: Option<(ModelKind, usize)>,
    /// Model whose source fails, for all-or-nothing tests
    pub missing: Option<ModelKind>,
    /// Multiplier applied to every affine weight
    pub weight_scale: f32,
}

impl SeededWeights {
    pub fn new(input_dim: usize) -> Self {
        Self {
            input_dim,
            seed: 42,
            attention_width: 1,
            input_dim_for: None,
            missing: None,
            weight_scale: 1.0,
        }
    }

    pub fn state_dict(&self, kind: ModelKind) -> StateDict {
        let input_dim = match self.input_dim_for {
            Some((k, dim)) if k == kind => dim,
            _ => self.input_dim,
        };
        let mut rng = StdRng::seed_from_u64(self.seed ^ kind as u64);
        let mut dict = StateDict::new(kind.id());

        for group in kind.layout() {
            let mut width = group.input.resolve(input_dim).unwrap_or(input_dim);
            for stage in group.stages {
                let out = stage.width.resolve(input_dim).unwrap_or(self.attention_width);
                let prefix = format!("{}.{}", group.name, stage.index);
                let bound = 1.0 / (width as f32).sqrt();

                let weight = (0..out * width)
                    .map(|_| rng.gen_range(-bound..bound) * self.weight_scale)
                    .collect();
                let bias = (0..out).map(|_| rng.gen_range(-bound..bound)).collect();
                dict.insert(format!("{prefix}.weight"), vec![out, width], weight).unwrap();
                dict.insert(format!("{prefix}.bias"), vec![out], bias).unwrap();

                if stage.normalized {
                    let prefix = format!("{}.{}", group.name, stage.index + 1);
                    let mut fill = |name: &str, lo: f32, hi: f32| {
                        let values = (0..out).map(|_| rng.gen_range(lo..hi)).collect();
                        dict.insert(format!("{prefix}.{name}"), vec![out], values).unwrap();
                    };
                    fill("weight", 0.5, 1.5);
                    fill("bias", -0.1, 0.1);
                    fill("running_mean", -0.1, 0.1);
                    fill("running_var", 0.5, 1.5);
                }
                width = out;
            }
        }

        dict
    }
}

impl ParameterSource for SeededWeights {
    fn load(&self, kind: ModelKind) -> Result<StateDict, LoadError> {
        if self.missing == Some(kind) {
            return Err(LoadError::Missing {
                model: kind.id().to_string(),
                path: format!("memory://{}", kind.id()).into(),
            });
        }
        Ok(self.state_dict(kind))
    }
}

/// Write a state dict as an F32 safetensors blob.
pub fn write_safetensors(dict: &StateDict, path: &Path) {
    use safetensors::tensor::TensorView;
    use safetensors::Dtype;

    let encoded: Vec<(String, Vec<usize>, Vec<u8>)> = dict
        .iter()
        .map(|(name, tensor)| {
            let bytes = tensor.data.iter().flat_map(|v| v.to_le_bytes()).collect();
            (name.clone(), tensor.shape.clone(), bytes)
        })
        .collect();

    let views: Vec<(String, TensorView<'_>)> = encoded
        .iter()
        .map(|(name, shape, bytes)| (name.clone(), TensorView::new(Dtype::F32, shape.clone(), bytes).unwrap()))
        .collect();

    std::fs::write(path, safetensors::serialize(views, &None).unwrap()).unwrap();
}
