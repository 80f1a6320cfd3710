use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::{ApiError, AppState};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Reject requests whose `x-api-key` does not match the configured route
/// secret. An empty secret rejects everything.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let expected = state.config.api.route_secret.as_str();
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    match provided {
        Some(key) if !expected.is_empty() && key == expected => Ok(next.run(request).await),
        _ => {
            warn!("Rejected {} {}: bad or missing API key", request.method(), request.uri().path());
            Err(ApiError::Unauthorized)
        }
    }
}
