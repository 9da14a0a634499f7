//! `POST /api/setUserRole`: the server-side role write.
//!
//! The body is parsed leniently so that every malformed request gets the
//! same 400 answer instead of the extractor's own rejection.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::services::metrics::record_role_write;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SetUserRoleRequest {
    pub uid: Option<String>,
    pub role: Option<String>,
}

fn parse_request(body: &[u8]) -> Option<(String, String)> {
    let request: SetUserRoleRequest = serde_json::from_slice(body).ok()?;
    let uid = request.uid.filter(|uid| !uid.is_empty())?;
    let role = request.role.filter(|role| !role.is_empty())?;
    Some((uid, role))
}

pub async fn set_user_role(State(state): State<AppState>, body: Bytes) -> Response {
    let Some((uid, role)) = parse_request(&body) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing uid or role" })),
        )
            .into_response();
    };

    match state.role_store.set_role(&uid, &role).await {
        Ok(()) => {
            record_role_write("api", true);
            tracing::info!(uid = %uid, role = %role, "Role set");
            (
                StatusCode::OK,
                Json(json!({ "message": "Role set successfully" })),
            )
                .into_response()
        }
        Err(e) => {
            record_role_write("api", false);
            tracing::error!(uid = %uid, error = %e, "Failed to set role");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal error" })),
            )
                .into_response()
        }
    }
}
