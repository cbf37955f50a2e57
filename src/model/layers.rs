//! Layers - Inference-mode building blocks
//!
//! Affine projection, batch normalization over running statistics and the
//! activations chained between them. Dropout only exists at training time
//! and has no counterpart here.

use ndarray::{Array1, Array2, ArrayView1};

use super::params::{LoadError, StateDict};

/// BatchNorm epsilon used at training time
pub const BATCH_NORM_EPS: f32 = 1e-5;

// ============================================================================
// LAYOUT DESCRIPTION
// ============================================================================

/// Width at a stage boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    /// Fixed hidden width
    Fixed(usize),
    /// Back to the sensor vector width
    Input,
    /// Taken from the stored weight (attention scores)
    Stored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Identity,
    Relu,
    Tanh,
}

impl Activation {
    fn apply(self, values: &mut Array1<f32>) {
        match self {
            Activation::Identity => {}
            // NaN passes through unchanged
            Activation::Relu => values.mapv_inplace(|v| if v < 0.0 { 0.0 } else { v }),
            Activation::Tanh => values.mapv_inplace(f32::tanh),
        }
    }
}

/// One stage of a layout: `<group>.<index>` is the affine layer,
/// `<group>.<index + 1>` the normalization when `normalized` is set.
#[derive(Debug, Clone, Copy)]
pub struct StageSpec {
    pub index: usize,
    pub width: Width,
    pub normalized: bool,
    pub activation: Activation,
}

impl StageSpec {
    /// Affine -> BatchNorm -> ReLU
    pub const fn hidden(index: usize, width: usize) -> Self {
        Self {
            index,
            width: Width::Fixed(width),
            normalized: true,
            activation: Activation::Relu,
        }
    }

    /// Bare affine projection closing a group
    pub const fn projection(index: usize, width: Width) -> Self {
        Self {
            index,
            width,
            normalized: false,
            activation: Activation::Identity,
        }
    }

    pub const fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }
}

/// A named sequence of stages
#[derive(Debug, Clone, Copy)]
pub struct GroupSpec {
    pub name: &'static str,
    /// Width consumed by the first stage
    pub input: Width,
    pub stages: &'static [StageSpec],
}

impl Width {
    /// Concrete width; `Stored` has none until the weights are read.
    pub fn resolve(self, input_dim: usize) -> Option<usize> {
        match self {
            Width::Fixed(n) => Some(n),
            Width::Input => Some(input_dim),
            Width::Stored => None,
        }
    }
}

// ============================================================================
// LAYERS
// ============================================================================

#[derive(Debug, Clone)]
pub struct Linear {
    /// [out, in]
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Linear {
    pub fn load(
        dict: &StateDict,
        prefix: &str,
        in_dim: usize,
        out_dim: Option<usize>,
    ) -> Result<Self, LoadError> {
        let weight = dict.matrix(&format!("{prefix}.weight"), out_dim, in_dim)?;
        let bias = dict.vector(&format!("{prefix}.bias"), weight.nrows())?;
        Ok(Self { weight, bias })
    }

    #[cfg(test)]
    pub fn in_dim(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_dim(&self) -> usize {
        self.weight.nrows()
    }

    pub fn forward(&self, x: ArrayView1<f32>) -> Array1<f32> {
        self.weight.dot(&x) + &self.bias
    }

    pub fn parameter_count(&self) -> usize {
        self.weight.len() + self.bias.len()
    }
}

/// BatchNorm1d in eval mode, folded into a per-channel scale and shift
#[derive(Debug, Clone)]
pub struct BatchNorm {
    scale: Array1<f32>,
    shift: Array1<f32>,
}

impl BatchNorm {
    pub fn load(dict: &StateDict, prefix: &str, width: usize) -> Result<Self, LoadError> {
        let weight = dict.vector(&format!("{prefix}.weight"), width)?;
        let bias = dict.vector(&format!("{prefix}.bias"), width)?;
        let mean = dict.vector(&format!("{prefix}.running_mean"), width)?;
        let var = dict.vector(&format!("{prefix}.running_var"), width)?;
        if var.iter().any(|v| *v < 0.0) {
            return Err(LoadError::Malformed {
                model: dict.model().to_string(),
                reason: format!("tensor '{prefix}.running_var' has negative entries"),
            });
        }

        let scale = &weight / &var.mapv(|v| (v + BATCH_NORM_EPS).sqrt());
        let shift = &bias - &(&mean * &scale);

        Ok(Self { scale, shift })
    }

    fn apply(&self, values: &mut Array1<f32>) {
        *values *= &self.scale;
        *values += &self.shift;
    }

    /// Learnable weight + bias; running statistics are buffers
    pub fn parameter_count(&self) -> usize {
        self.scale.len() * 2
    }
}

#[derive(Debug, Clone)]
pub struct Stage {
    linear: Linear,
    norm: Option<BatchNorm>,
    activation: Activation,
}

impl Stage {
    pub fn forward(&self, x: ArrayView1<f32>) -> Array1<f32> {
        let mut y = self.linear.forward(x);
        if let Some(norm) = &self.norm {
            norm.apply(&mut y);
        }
        self.activation.apply(&mut y);
        y
    }

    pub fn out_dim(&self) -> usize {
        self.linear.out_dim()
    }

    fn parameter_count(&self) -> usize {
        self.linear.parameter_count() + self.norm.as_ref().map_or(0, BatchNorm::parameter_count)
    }
}

/// Stages evaluated in order
#[derive(Debug, Clone)]
pub struct StageGroup {
    name: &'static str,
    stages: Vec<Stage>,
}

impl StageGroup {
    /// Build a group from a layout, checking every width against the stored tensors.
    pub fn load(dict: &StateDict, spec: &GroupSpec, input_dim: usize) -> Result<Self, LoadError> {
        let mut stages = Vec::with_capacity(spec.stages.len());
        let mut width = spec.input.resolve(input_dim).unwrap_or(input_dim);

        for stage in spec.stages {
            let out_dim = stage.width.resolve(input_dim);
            let linear = Linear::load(dict, &format!("{}.{}", spec.name, stage.index), width, out_dim)?;
            let norm = if stage.normalized {
                let prefix = format!("{}.{}", spec.name, stage.index + 1);
                Some(BatchNorm::load(dict, &prefix, linear.out_dim())?)
            } else {
                None
            };

            width = linear.out_dim();
            stages.push(Stage {
                linear,
                norm,
                activation: stage.activation,
            });
        }

        Ok(Self {
            name: spec.name,
            stages,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    #[cfg(test)]
    pub fn in_dim(&self) -> usize {
        self.stages.first().map_or(0, |s| s.linear.in_dim())
    }

    pub fn out_dim(&self) -> usize {
        self.stages.last().map_or(0, Stage::out_dim)
    }

    pub fn forward(&self, x: ArrayView1<f32>) -> Array1<f32> {
        let mut current = x.to_owned();
        for stage in &self.stages {
            current = stage.forward(current.view());
        }
        current
    }

    pub fn parameter_count(&self) -> usize {
        self.stages.iter().map(Stage::parameter_count).sum()
    }
}
