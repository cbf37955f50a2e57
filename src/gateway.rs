//! Request Gateway - One prediction request, start to finish
//!
//! ```text
//! Received ─▶ Authenticated ─▶ Validated ─▶ Scored ─▶ Responded
//!     └──────────────┴──────────────┴───────────┴──▶ Errored(kind)
//! ```
//!
//! Each phase is a method returning the input of the next one, so a request
//! cannot be scored before it is validated. Failures are counted by kind;
//! nothing is retried.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics::MetricsRegistry;
use crate::model::{ModelKind, ModelRegistry, Pipeline};
use crate::scoring::{Score, ScoringEngine};

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Phases of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Received,
    Authenticated,
    Validated,
    Scored,
    Responded,
}

/// Prediction request body
#[derive(Debug, Clone, Deserialize)]
pub struct SensorReading {
    pub data: Vec<f64>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub model_type: Option<String>,
}

/// Prediction response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub anomaly_score: f64,
    pub is_anomaly: bool,
    pub confidence: f64,
    pub model_used: String,
    pub timestamp: String,
}

/// Request that passed shape and selector checks
pub struct Validated {
    pipeline: Arc<dyn Pipeline>,
    input: Array1<f32>,
    timestamp: Option<String>,
    received_at: Instant,
}

/// Request with a decision attached
#[derive(Debug)]
pub struct Scored {
    kind: ModelKind,
    score: Score,
    timestamp: Option<String>,
    received_at: Instant,
}

// ============================================================================
// GATEWAY
// ============================================================================

pub struct RequestGateway {
    registry: Arc<ModelRegistry>,
    scoring: ScoringEngine,
    metrics: Arc<MetricsRegistry>,
    api_key_digest: Option<[u8; 32]>,
}

impl RequestGateway {
    pub fn new(
        registry: Arc<ModelRegistry>,
        scoring: ScoringEngine,
        metrics: Arc<MetricsRegistry>,
        api_key: Option<&str>,
    ) -> Self {
        Self {
            registry,
            scoring,
            metrics,
            api_key_digest: api_key.map(digest),
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Received -> Authenticated
    ///
    /// Digests are compared so the check does not depend on where the
    /// supplied key first differs.
    pub fn authenticate(&self, supplied: Option<&str>) -> AppResult<()> {
        let accepted = match (self.api_key_digest, supplied) {
            (Some(expected), Some(key)) => {
                let actual = digest(key);
                expected.iter().zip(actual.iter()).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
            }
            _ => false,
        };

        if !accepted {
            let reason = if supplied.is_some() { "wrong API key" } else { "missing API key" };
            tracing::warn!("Rejected request in {:?}: {}", Phase::Received, reason);
            return Err(self.fail(AppError::Auth));
        }
        Ok(())
    }

    /// Authenticated -> Validated
    pub fn validate(&self, reading: SensorReading, received_at: Instant) -> AppResult<Validated> {
        let expected = self.registry.input_dim();
        if reading.data.len() != expected {
            return Err(AppError::wrong_length(expected, reading.data.len()));
        }

        let model_id = reading.model_type.as_deref().unwrap_or(ModelKind::DEFAULT.id());
        let pipeline = self.registry.resolve(model_id)?;

        let input: Array1<f32> = reading.data.iter().map(|v| *v as f32).collect();
        if input.iter().any(|v| !v.is_finite()) {
            return Err(AppError::Validation(
                "Input data must contain finite single-precision values".to_string(),
            ));
        }

        Ok(Validated {
            pipeline,
            input,
            timestamp: reading.timestamp,
            received_at,
        })
    }

    /// Validated -> Scored
    pub fn score(&self, validated: Validated) -> AppResult<Scored> {
        let Validated {
            pipeline,
            input,
            timestamp,
            received_at,
        } = validated;

        let output = pipeline.reconstruct(input.view())?;
        let score = self.scoring.score(pipeline.kind(), input.view(), output.view())?;
        tracing::debug!(
            "'{}' reconstruction error {:.6} against threshold {}",
            pipeline.kind(),
            score.anomaly_score,
            score.threshold
        );

        Ok(Scored {
            kind: pipeline.kind(),
            score,
            timestamp,
            received_at,
        })
    }

    /// Scored -> Responded
    pub fn respond(&self, scored: Scored) -> PredictionResult {
        self.metrics.record_prediction(
            scored.score.is_anomaly,
            scored.received_at.elapsed().as_secs_f64(),
        );

        PredictionResult {
            anomaly_score: scored.score.anomaly_score,
            is_anomaly: scored.score.is_anomaly,
            confidence: scored.score.confidence,
            model_used: scored.kind.id().to_string(),
            timestamp: scored.timestamp.unwrap_or_else(|| Utc::now().to_rfc3339()),
        }
    }

    /// Authenticated request through to a response. CPU-bound: call from a
    /// blocking worker, not from the async scheduler.
    pub fn predict(&self, reading: SensorReading, received_at: Instant) -> AppResult<PredictionResult> {
        let span = tracing::debug_span!("predict", request_id = %Uuid::new_v4());
        let _guard = span.enter();

        let mut phase = Phase::Authenticated;
        let result = self.traverse(reading, received_at, &mut phase);

        match result {
            Ok(result) => {
                tracing::debug!(
                    "{:?}: model={} score={:.6} anomaly={}",
                    phase,
                    result.model_used,
                    result.anomaly_score,
                    result.is_anomaly
                );
                Ok(result)
            }
            Err(err) => {
                tracing::debug!("Errored after {:?}: {}", phase, err);
                Err(self.fail(err))
            }
        }
    }

    fn traverse(
        &self,
        reading: SensorReading,
        received_at: Instant,
        phase: &mut Phase,
    ) -> AppResult<PredictionResult> {
        let validated = self.validate(reading, received_at)?;
        *phase = Phase::Validated;

        let scored = self.score(validated)?;
        *phase = Phase::Scored;

        let result = self.respond(scored);
        *phase = Phase::Responded;
        Ok(result)
    }

    /// Full traversal from `Received`, including the key check
    #[cfg(test)]
    pub fn handle(&self, api_key: Option<&str>, reading: SensorReading) -> AppResult<PredictionResult> {
        let received_at = Instant::now();
        self.authenticate(api_key)?;
        self.predict(reading, received_at)
    }

    /// Count a failure before handing it back
    pub fn fail(&self, err: AppError) -> AppError {
        self.metrics.record_error(err.kind());
        err
    }
}

fn digest(key: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(key.as_bytes()));
    out
}
