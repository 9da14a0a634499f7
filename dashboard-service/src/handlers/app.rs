use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use dashboard_core::observability::render_metrics;
use serde_json::json;

use crate::AppState;

/// Liveness plus a role store ping.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.role_store.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "dashboard-service",
                "version": env!("CARGO_PKG_VERSION"),
                "auth_provider": state.sessions.backend().provider_name(),
                "browser_sessions": state.sessions.len(),
                "role_store": state.role_store.store_name(),
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "service": "dashboard-service",
                "error": e.to_string()
            })),
        ),
    }
}

pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        render_metrics(),
    )
}
