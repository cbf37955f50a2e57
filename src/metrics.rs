//! Metrics Registry - Prediction counters, latency and model memory
//!
//! Owned by the application state and shared by every request. The
//! prometheus collectors are atomic, so recording needs no extra locking.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::model::ModelKind;

pub struct MetricsRegistry {
    registry: Registry,

    /// Successful predictions
    pub predictions_total: IntCounter,

    /// Predictions flagged as anomalous
    pub anomalies_total: IntCounter,

    /// Validation-to-response latency
    pub prediction_latency_seconds: Histogram,

    /// Learnable parameter bytes per model
    pub model_memory_bytes: IntGaugeVec,

    /// Rejected or failed predictions by error kind
    pub prediction_errors_total: IntCounterVec,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let predictions_total = IntCounter::new("predictions_total", "Total number of predictions")?;
        registry.register(Box::new(predictions_total.clone()))?;

        let anomalies_total = IntCounter::new("anomalies_detected_total", "Total number of anomalies detected")?;
        registry.register(Box::new(anomalies_total.clone()))?;

        let prediction_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "prediction_latency_seconds",
            "Prediction latency in seconds",
        ))?;
        registry.register(Box::new(prediction_latency_seconds.clone()))?;

        let model_memory_bytes = IntGaugeVec::new(
            Opts::new("model_memory_usage_bytes", "Memory usage of models in bytes"),
            &["model_name"],
        )?;
        registry.register(Box::new(model_memory_bytes.clone()))?;

        let prediction_errors_total = IntCounterVec::new(
            Opts::new("prediction_errors_total", "Rejected or failed predictions"),
            &["kind"],
        )?;
        registry.register(Box::new(prediction_errors_total.clone()))?;

        Ok(Self {
            registry,
            predictions_total,
            anomalies_total,
            prediction_latency_seconds,
            model_memory_bytes,
            prediction_errors_total,
        })
    }

    /// Record a completed prediction
    pub fn record_prediction(&self, is_anomaly: bool, latency_secs: f64) {
        self.predictions_total.inc();
        if is_anomaly {
            self.anomalies_total.inc();
        }
        self.prediction_latency_seconds.observe(latency_secs);
    }

    pub fn record_error(&self, kind: &str) {
        self.prediction_errors_total.with_label_values(&[kind]).inc();
    }

    pub fn set_model_memory(&self, kind: ModelKind, bytes: usize) {
        self.model_memory_bytes
            .with_label_values(&[kind.id()])
            .set(i64::try_from(bytes).unwrap_or(i64::MAX));
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("predictions_total", &self.predictions_total.get())
            .field("anomalies_total", &self.anomalies_total.get())
            .finish()
    }
}
