//! Health check handler

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    models_loaded: Vec<&'static str>,
    input_dim: usize,
    timestamp: i64,
}

pub async fn check(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.gateway.registry();
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        models_loaded: registry.ids(),
        input_dim: registry.input_dim(),
        timestamp: chrono::Utc::now().timestamp(),
    })
}
