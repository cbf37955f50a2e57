//! Prometheus exposition handler

use axum::{
    extract::State,
    http::header::CONTENT_TYPE,
    response::IntoResponse,
};

use crate::{AppError, AppResult, AppState};

pub async fn export(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let metrics = state.gateway.metrics();
    let body = metrics
        .export()
        .map_err(|e| AppError::Internal(format!("metrics encoding failed: {}", e)))?;

    Ok(([(CONTENT_TYPE, metrics.content_type())], body))
}
