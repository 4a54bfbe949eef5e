//! API-key check for `/api/v1/*`.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::ApiState;
use crate::error::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Reject requests without a matching `x-api-key` header.
///
/// A no-op when no key is configured.
pub async fn require_api_key(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    if provided.is_some_and(|p| keys_match(p.as_bytes(), expected.as_bytes())) {
        return next.run(request).await;
    }

    warn!(
        method = %request.method(),
        path = %request.uri().path(),
        present = provided.is_some(),
        "rejected request with missing or invalid API key"
    );
    ApiError::Unauthorized.into_response()
}

/// Compare without short-circuiting on the first differing byte.
fn keys_match(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
