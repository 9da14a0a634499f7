use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashboard_core::error::AppError;
use secrecy::ExposeSecret;
use subtle::ConstantTimeEq;

use crate::AppState;

pub const ADMIN_API_KEY_HEADER: &str = "x-admin-api-key";

/// Gate for the role-setting endpoint when an admin API key is configured.
/// Without a configured key every request passes.
pub async fn require_admin_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.admin_api_key.as_ref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(ADMIN_API_KEY_HEADER)
        .map(|value| value.as_bytes())
        .unwrap_or_default();

    let matches: bool = expected.expose_secret().as_bytes().ct_eq(presented).into();
    if !matches {
        tracing::warn!(path = %request.uri().path(), "Rejected request with missing or wrong admin API key");
        return AppError::Unauthorized(anyhow::anyhow!("Invalid admin API key")).into_response();
    }

    next.run(request).await
}
