//! Architectures - The four reconstruction pipelines
//!
//! Every pipeline is a feed-forward chain of stage groups that shrinks the
//! sensor vector and expands it back to `input_dim`. Two identifiers (`lstm`,
//! `rnn`) are historical: neither pipeline has a time axis or recurrence.
//!
//! ```text
//! autoencoder  in ─ encoder ─▶ 16 ─ decoder ─▶ in
//! lstm         in ─ encoder ─▶ 32 ─ decoder ─▶ in            (wider hidden layers)
//! dlrm         in ─ embedding ─▶ 32 ─ encoder ─▶ 16 ─ decoder ─▶ 32 ─ output ─▶ in
//! rnn          in ─ encoder ─▶ 32 ─ × softmax(attention) ─ decoder ─▶ in
//! ```

use std::fmt;

use ndarray::{Array1, ArrayView1};

use super::layers::{Activation, GroupSpec, StageGroup, StageSpec as S, Width};
use super::params::{LoadError, StateDict};

// ============================================================================
// LAYOUTS
// ============================================================================

const AUTOENCODER: &[GroupSpec] = &[
    GroupSpec {
        name: "encoder",
        input: Width::Input,
        stages: &[
            S::hidden(0, 128),
            S::hidden(4, 64),
            S::hidden(8, 32),
            S::projection(11, Width::Fixed(16)),
        ],
    },
    GroupSpec {
        name: "decoder",
        input: Width::Fixed(16),
        stages: &[
            S::hidden(0, 32),
            S::hidden(4, 64),
            S::hidden(8, 128),
            S::projection(11, Width::Input),
        ],
    },
];

const WIDE: &[GroupSpec] = &[
    GroupSpec {
        name: "encoder",
        input: Width::Input,
        stages: &[
            S::hidden(0, 256),
            S::hidden(4, 128),
            S::hidden(8, 64),
            S::projection(11, Width::Fixed(32)),
        ],
    },
    GroupSpec {
        name: "decoder",
        input: Width::Fixed(32),
        stages: &[
            S::hidden(0, 64),
            S::hidden(4, 128),
            S::hidden(8, 256),
            S::projection(11, Width::Input),
        ],
    },
];

/// Width of the embedding produced by the first `dlrm` group
pub const EMBEDDING_DIM: usize = 32;

const EMBEDDING: &[GroupSpec] = &[
    GroupSpec {
        name: "embedding",
        input: Width::Input,
        stages: &[
            S::hidden(0, 128),
            S::hidden(4, 64),
            S::projection(7, Width::Fixed(EMBEDDING_DIM)),
        ],
    },
    GroupSpec {
        name: "encoder",
        input: Width::Fixed(EMBEDDING_DIM),
        stages: &[S::hidden(0, 64), S::hidden(4, 32), S::projection(7, Width::Fixed(16))],
    },
    GroupSpec {
        name: "decoder",
        input: Width::Fixed(16),
        stages: &[
            S::hidden(0, 32),
            S::hidden(4, 64),
            S::projection(7, Width::Fixed(EMBEDDING_DIM)),
        ],
    },
    GroupSpec {
        name: "output",
        input: Width::Fixed(EMBEDDING_DIM),
        stages: &[S::hidden(0, 128), S::projection(4, Width::Input)],
    },
];

/// Channels of the encoded vector weighted by attention
pub const ATTENTION_CHANNELS: usize = 32;

const ATTENTION_ENCODER: GroupSpec = GroupSpec {
    name: "encoder",
    input: Width::Input,
    stages: &[
        S::hidden(0, 128),
        S::hidden(4, 64),
        S::projection(7, Width::Fixed(ATTENTION_CHANNELS)),
    ],
};

const ATTENTION_SCORES: GroupSpec = GroupSpec {
    name: "attention",
    input: Width::Fixed(ATTENTION_CHANNELS),
    stages: &[
        S::projection(0, Width::Fixed(16)).with_activation(Activation::Tanh),
        S::projection(2, Width::Stored),
    ],
};

const ATTENTION_DECODER: GroupSpec = GroupSpec {
    name: "decoder",
    input: Width::Fixed(ATTENTION_CHANNELS),
    stages: &[S::hidden(0, 64), S::hidden(4, 128), S::projection(7, Width::Input)],
};

const ATTENTION: &[GroupSpec] = &[ATTENTION_ENCODER, ATTENTION_SCORES, ATTENTION_DECODER];

// ============================================================================
// MODEL KIND
// ============================================================================

/// The four registered architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelKind {
    /// `autoencoder`: 128-64-32-16 bottleneck
    Autoencoder,
    /// `lstm`: 256-128-64-32 bottleneck
    Wide,
    /// `dlrm`: embedding, bottleneck, output groups
    Embedding,
    /// `rnn`: bottleneck with softmax channel weighting
    Attention,
}

impl ModelKind {
    /// Registration order
    pub const ALL: [ModelKind; 4] = [
        ModelKind::Autoencoder,
        ModelKind::Wide,
        ModelKind::Embedding,
        ModelKind::Attention,
    ];

    /// Model selected when a request names none
    pub const DEFAULT: ModelKind = ModelKind::Autoencoder;

    /// Wire identifier
    pub fn id(self) -> &'static str {
        match self {
            ModelKind::Autoencoder => "autoencoder",
            ModelKind::Wide => "lstm",
            ModelKind::Embedding => "dlrm",
            ModelKind::Attention => "rnn",
        }
    }

    /// Case-insensitive lookup
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id().eq_ignore_ascii_case(id))
    }

    /// Weight whose column count is the sensor vector width
    pub fn first_weight(self) -> &'static str {
        match self {
            ModelKind::Embedding => "embedding.0.weight",
            _ => "encoder.0.weight",
        }
    }

    /// Stage groups in the order their tensors appear
    pub fn layout(self) -> &'static [GroupSpec] {
        match self {
            ModelKind::Autoencoder => AUTOENCODER,
            ModelKind::Wide => WIDE,
            ModelKind::Embedding => EMBEDDING,
            ModelKind::Attention => ATTENTION,
        }
    }

    /// Build the typed pipeline for this architecture.
    pub fn build(self, dict: &StateDict, input_dim: usize) -> Result<Box<dyn Pipeline>, LoadError> {
        let pipeline: Box<dyn Pipeline> = match self {
            ModelKind::Attention => Box::new(Attentive::load(dict, input_dim)?),
            _ => Box::new(Sequential::load(self, dict, input_dim)?),
        };
        Ok(pipeline)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

// ============================================================================
// PIPELINE TRAIT
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("'{model}' expects {expected} features, got {actual}")]
    DimensionMismatch {
        model: ModelKind,
        expected: usize,
        actual: usize,
    },

    #[error("'{model}' produced a non-finite reconstruction")]
    NonFinite { model: ModelKind },
}

/// Deterministic `f(x; θ) -> x'` over a fixed-width vector
pub trait Pipeline: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn input_dim(&self) -> usize;

    /// Forward pass without the length check
    fn forward(&self, input: ArrayView1<f32>) -> Array1<f32>;

    /// Bytes held by learnable parameters (f32)
    fn parameter_bytes(&self) -> usize;

    /// Reconstruct `input`, rejecting wrong widths and overflowed output.
    fn reconstruct(&self, input: ArrayView1<f32>) -> Result<Array1<f32>, InferenceError> {
        if input.len() != self.input_dim() {
            return Err(InferenceError::DimensionMismatch {
                model: self.kind(),
                expected: self.input_dim(),
                actual: input.len(),
            });
        }

        let output = self.forward(input);
        if output.iter().any(|v| !v.is_finite()) {
            return Err(InferenceError::NonFinite { model: self.kind() });
        }
        Ok(output)
    }
}

// ============================================================================
// IMPLEMENTATIONS
// ============================================================================

/// Stage groups applied one after another
#[derive(Debug, Clone)]
pub struct Sequential {
    kind: ModelKind,
    input_dim: usize,
    groups: Vec<StageGroup>,
}

impl Sequential {
    pub(crate) fn load(kind: ModelKind, dict: &StateDict, input_dim: usize) -> Result<Self, LoadError> {
        let groups = kind
            .layout()
            .iter()
            .map(|spec| StageGroup::load(dict, spec, input_dim))
            .collect::<Result<Vec<_>, _>>()?;

        let pipeline = Self {
            kind,
            input_dim,
            groups,
        };
        tracing::debug!("'{}' stage groups: {:?}", kind, pipeline.group_names());
        Ok(pipeline)
    }

    pub fn group_names(&self) -> Vec<&'static str> {
        self.groups.iter().map(StageGroup::name).collect()
    }
}

impl Pipeline for Sequential {
    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn forward(&self, input: ArrayView1<f32>) -> Array1<f32> {
        let mut current = input.to_owned();
        for group in &self.groups {
            current = group.forward(current.view());
        }
        current
    }

    fn parameter_bytes(&self) -> usize {
        self.groups.iter().map(StageGroup::parameter_count).sum::<usize>() * std::mem::size_of::<f32>()
    }
}

/// Encoder, softmax channel weighting, decoder
#[derive(Debug, Clone)]
pub struct Attentive {
    input_dim: usize,
    encoder: StageGroup,
    attention: StageGroup,
    decoder: StageGroup,
}

impl Attentive {
    pub(crate) fn load(dict: &StateDict, input_dim: usize) -> Result<Self, LoadError> {
        let encoder = StageGroup::load(dict, &ATTENTION_ENCODER, input_dim)?;
        let attention = StageGroup::load(dict, &ATTENTION_SCORES, input_dim)?;

        let width = attention.out_dim();
        if width != 1 && width != ATTENTION_CHANNELS {
            return Err(LoadError::AttentionWidth {
                model: ModelKind::Attention.id().to_string(),
                width,
                channels: ATTENTION_CHANNELS,
            });
        }

        let decoder = StageGroup::load(dict, &ATTENTION_DECODER, input_dim)?;

        Ok(Self {
            input_dim,
            encoder,
            attention,
            decoder,
        })
    }

    /// Softmax over the attention outputs; a single output is broadcast.
    pub fn weights(&self, encoded: ArrayView1<f32>) -> Array1<f32> {
        softmax(self.attention.forward(encoded))
    }
}

impl Pipeline for Attentive {
    fn kind(&self) -> ModelKind {
        ModelKind::Attention
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn forward(&self, input: ArrayView1<f32>) -> Array1<f32> {
        let encoded = self.encoder.forward(input);
        let weights = self.weights(encoded.view());

        let attended = if weights.len() == 1 {
            encoded * weights[0]
        } else {
            encoded * &weights
        };

        self.decoder.forward(attended.view())
    }

    fn parameter_bytes(&self) -> usize {
        (self.encoder.parameter_count() + self.attention.parameter_count() + self.decoder.parameter_count())
            * std::mem::size_of::<f32>()
    }
}

/// Numerically stable softmax
pub fn softmax(scores: Array1<f32>) -> Array1<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp = scores.mapv(|s| (s - max).exp());
    let sum = exp.sum();
    exp / sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_ids_round_trip_case_insensitive() {
        for kind in ModelKind::ALL {
            assert_eq!(ModelKind::from_id(kind.id()), Some(kind));
            assert_eq!(ModelKind::from_id(&kind.id().to_uppercase()), Some(kind));
        }
        assert_eq!(ModelKind::from_id("LsTm"), Some(ModelKind::Wide));
        assert_eq!(ModelKind::from_id("unknown"), None);
        assert_eq!(ModelKind::from_id(""), None);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let weights = softmax(array![1.0f32, 2.0, 3.0, -50.0]);
        assert!((weights.sum() - 1.0).abs() < 1e-6);
        assert!(weights[2] > weights[1] && weights[1] > weights[0]);
    }

    #[test]
    fn test_softmax_single_score_is_one() {
        assert_eq!(softmax(array![-7.25f32]), array![1.0f32]);
    }
}
