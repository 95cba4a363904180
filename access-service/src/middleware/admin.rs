use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use subtle::ConstantTimeEq;

use crate::AppState;

pub const ADMIN_API_KEY_HEADER: &str = "x-admin-api-key";

pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let expected = state.config.security.admin_api_key.as_bytes();

    let valid = headers
        .get(ADMIN_API_KEY_HEADER)
        .map(|value| !expected.is_empty() && bool::from(value.as_bytes().ct_eq(expected)))
        .unwrap_or(false);

    if !valid {
        tracing::warn!("Failed admin authentication attempt");
        return Err(AppError::domain(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Invalid or missing admin API key",
        ));
    }

    Ok(next.run(request).await)
}
