//! Prediction handler

use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};

use crate::gateway::{PredictionResult, SensorReading};
use crate::{AppError, AppResult, AppState};

/// Score one sensor vector. The API key has already been checked by
/// `middleware::auth::require_api_key`.
pub async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<SensorReading>, JsonRejection>,
) -> AppResult<Json<PredictionResult>> {
    let received_at = Instant::now();

    let Json(reading) = payload.map_err(|rejection| {
        let err = match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => AppError::PayloadTooLarge(rejection.body_text()),
            _ => AppError::Validation(rejection.body_text()),
        };
        state.gateway.fail(err)
    })?;

    // Matrix arithmetic stays off the async workers
    let gateway = state.gateway.clone();
    let result = tokio::task::spawn_blocking(move || gateway.predict(reading, received_at))
        .await
        .map_err(|e| state.gateway.fail(AppError::Internal(format!("prediction task failed: {}", e))))??;

    Ok(Json(result))
}
