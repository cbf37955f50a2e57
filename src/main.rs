//! Sensor Anomaly Detection Server
//!
//! Scores IoT sensor vectors against four pretrained reconstruction models.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  SENSOR ANOMALY SERVER                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌───────────┐  ┌─────────────────────────┐ │
//! │  │  HTTP     │  │  API key  │  │  Request Gateway        │ │
//! │  │  (Axum)   │─▶│  check    │─▶│  validate ▶ score       │ │
//! │  └───────────┘  └───────────┘  └────────────┬────────────┘ │
//! │                                              ▼              │
//! │  ┌──────────────────────────┐  ┌─────────────────────────┐ │
//! │  │  Model Registry          │  │  Metrics Registry       │ │
//! │  │  autoencoder lstm        │  │  (Prometheus)           │ │
//! │  │  dlrm        rnn         │  │                         │ │
//! │  └──────────────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod error;
mod gateway;
mod handlers;
mod metrics;
mod middleware;
mod model;
mod scoring;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
    middleware as axum_middleware,
};
use tower_http::{
    cors::{CorsLayer, Any},
    trace::TraceLayer,
    compression::CompressionLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use error::{AppError, AppResult};

use gateway::RequestGateway;
use metrics::MetricsRegistry;
use model::{ModelRegistry, ParameterStore};
use scoring::ScoringEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // Load configuration
    let config = config::Config::from_env().context("invalid configuration")?;

    tracing::info!("Sensor anomaly server starting...");
    tracing::debug!("{:?}", config);
    if config.api_key.is_none() {
        tracing::warn!("API_KEY is not set: every /predict request will be rejected");
    }

    // Load all four models; any failure aborts startup
    let store = ParameterStore::new(&config.model_dir);
    let registry = ModelRegistry::load(&store)
        .with_context(|| format!("failed to load models from {}", store.root().display()))?;
    tracing::info!("Models loaded: {:?} (input_dim = {})", registry.ids(), registry.input_dim());

    let metrics = MetricsRegistry::new().context("failed to create metrics registry")?;
    for (kind, bytes) in registry.memory_usage() {
        metrics.set_model_memory(kind, bytes);
    }

    // Build application state
    let gateway = RequestGateway::new(
        Arc::new(registry),
        ScoringEngine::new(config.thresholds.clone()),
        Arc::new(metrics),
        config.api_key.as_deref(),
    );
    let state = AppState {
        gateway: Arc::new(gateway),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

/// `RUST_LOG` filter, JSON output when `LOG_FORMAT=json`
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sensor_anomaly=debug,tower_http=debug".into());

    let json = std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<RequestGateway>,
}

/// Create the main router with all routes
fn create_router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(handlers::health::check))
        .route("/metrics", get(handlers::metrics::export));

    // Prediction routes (API key auth)
    let predict_routes = Router::new()
        .route("/predict", post(handlers::predict::predict))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_api_key
        ));

    // Combine all routes
    Router::new()
        .merge(public_routes)
        .merge(predict_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}
