//! Scoring Engine - Reconstruction error to anomaly decision
//!
//! `error = mean((output - input)^2)`, anomalous when `error > threshold`,
//! `confidence = 1 - min(error / threshold, 1)`.
//! Thresholds are configurable per architecture.

use std::collections::HashMap;

use ndarray::ArrayView1;
use crate::model::ModelKind;

/// Threshold used when nothing is configured
pub const DEFAULT_THRESHOLD: f64 = 0.1;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Threshold Configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdConfig {
    /// Applies to every model without an override
    pub base_threshold: f64,

    /// Per-architecture overrides
    pub per_model: HashMap<ModelKind, f64>,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            base_threshold: DEFAULT_THRESHOLD,
            per_model: HashMap::new(),
        }
    }
}

impl ThresholdConfig {
    pub fn new(base: f64) -> Self {
        Self {
            base_threshold: base,
            ..Default::default()
        }
    }

    pub fn with_override(mut self, kind: ModelKind, threshold: f64) -> Self {
        self.per_model.insert(kind, threshold);
        self
    }

    pub fn threshold_for(&self, kind: ModelKind) -> f64 {
        self.per_model.get(&kind).copied().unwrap_or(self.base_threshold)
    }

    /// Every threshold must be a positive finite number.
    pub fn validate(&self) -> Result<(), String> {
        let check = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(format!("threshold for {} must be positive and finite, got {}", name, value))
            }
        };

        check("all models", self.base_threshold)?;
        for (kind, value) in &self.per_model {
            check(kind.id(), *value)?;
        }
        Ok(())
    }
}

// ============================================================================
// SCORING
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoringError {
    #[error("reconstruction has {actual} values, input has {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("reconstruction error is not finite")]
    NonFinite,
}

/// Decision for one input/reconstruction pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub anomaly_score: f64,
    pub is_anomaly: bool,
    pub confidence: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    config: ThresholdConfig,
}

impl ScoringEngine {
    pub fn new(config: ThresholdConfig) -> Self {
        Self { config }
    }

    /// Score a reconstruction produced by `kind`.
    pub fn score(
        &self,
        kind: ModelKind,
        input: ArrayView1<f32>,
        output: ArrayView1<f32>,
    ) -> Result<Score, ScoringError> {
        let error = reconstruction_error(input, output)?;
        Ok(decide(error, self.config.threshold_for(kind)))
    }
}

/// Mean squared difference, accumulated in f64
pub fn reconstruction_error(input: ArrayView1<f32>, output: ArrayView1<f32>) -> Result<f64, ScoringError> {
    if input.len() != output.len() {
        return Err(ScoringError::LengthMismatch {
            expected: input.len(),
            actual: output.len(),
        });
    }
    if input.is_empty() {
        return Ok(0.0);
    }

    let sum: f64 = input
        .iter()
        .zip(output.iter())
        .map(|(x, y)| (f64::from(*y) - f64::from(*x)).powi(2))
        .sum();
    let error = sum / input.len() as f64;

    if !error.is_finite() {
        return Err(ScoringError::NonFinite);
    }
    Ok(error)
}

/// Threshold decision and confidence for a known error
pub fn decide(error: f64, threshold: f64) -> Score {
    let confidence = (1.0 - (error / threshold).min(1.0)).clamp(0.0, 1.0);
    Score {
        anomaly_score: error,
        is_anomaly: error > threshold,
        confidence,
        threshold,
    }
}
