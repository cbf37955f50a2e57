//! Authentication middleware

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::{AppError, AppState};

/// Header carrying the shared secret
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Middleware: Require a matching `X-API-Key` header
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let supplied = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    state.gateway.authenticate(supplied)?;

    Ok(next.run(req).await)
}
