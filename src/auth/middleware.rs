use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::AppState;

/// Byte-wise comparison that does not short-circuit on the first mismatch.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .as_bytes()
            .iter()
            .zip(b.as_bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

/// Checks a presented secret against the configured gateway token. An empty
/// configured token never matches.
pub fn gateway_token_matches(presented: &str, expected: &str) -> bool {
    !expected.is_empty() && constant_time_eq(presented, expected)
}

/// Only the chat gateway process may call the API.
pub async fn require_gateway_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    if !gateway_token_matches(token, &state.config.gateway_token) {
        tracing::warn!(path = %req.uri().path(), "Rejected request with bad gateway token");
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(req).await)
}
