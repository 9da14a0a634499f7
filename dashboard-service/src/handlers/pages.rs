//! Guarded pages. Each handler runs behind a guard and receives the
//! session snapshot the guard approved.

use askama::Template;
use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Extension, Json,
};
use dashboard_core::error::AppError;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::render;
use crate::middleware::Browser;
use crate::models::{Role, RoleRecord, Session};
use crate::services::metrics::record_role_write;
use crate::AppState;

#[derive(Template)]
#[template(path = "dashboard.html")]
pub struct DashboardTemplate {
    pub name: String,
    pub initials: String,
    pub role: String,
    pub is_admin: bool,
}

#[derive(Template)]
#[template(path = "settings.html")]
pub struct SettingsTemplate {
    pub name: String,
    pub email: String,
    pub uid: String,
    pub role: String,
}

pub struct RoleRow {
    pub uid: String,
    pub role: String,
    pub updated: String,
}

impl From<RoleRecord> for RoleRow {
    fn from(record: RoleRecord) -> Self {
        Self {
            uid: record.uid,
            role: record.role.unwrap_or_else(|| "(none)".to_string()),
            updated: record
                .updated_utc
                .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_default(),
        }
    }
}

#[derive(Template)]
#[template(path = "admin.html")]
pub struct AdminTemplate {
    pub rows: Vec<RoleRow>,
}

/// Role label for display; a lookup still in flight shows as pending.
fn role_label(session: &Session) -> String {
    session
        .role
        .as_ref()
        .map(|role| role.to_string())
        .unwrap_or_else(|| "pending".to_string())
}

pub async fn dashboard(Extension(session): Extension<Session>) -> Result<Response, AppError> {
    let Some(identity) = session.identity.as_ref() else {
        return Err(AppError::Unauthorized(anyhow::anyhow!("Not signed in")));
    };

    Ok(render(&DashboardTemplate {
        name: identity.name(),
        initials: identity.initials(),
        role: role_label(&session),
        is_admin: session.role == Some(Role::Admin),
    })?
    .into_response())
}

pub async fn settings(Extension(session): Extension<Session>) -> Result<Response, AppError> {
    let Some(identity) = session.identity.as_ref() else {
        return Err(AppError::Unauthorized(anyhow::anyhow!("Not signed in")));
    };

    Ok(render(&SettingsTemplate {
        name: identity.name(),
        email: identity.email.clone(),
        uid: identity.uid.clone(),
        role: role_label(&session),
    })?
    .into_response())
}

#[derive(Serialize)]
pub struct SessionView {
    pub session: Session,
    /// Warm-start hint from this browser's mirror file. Never consulted by
    /// guards.
    pub restored: Option<Session>,
}

pub async fn session_view(
    browser: Browser,
    Extension(session): Extension<Session>,
) -> Json<SessionView> {
    Json(SessionView {
        session,
        restored: browser.restored().cloned(),
    })
}

pub async fn admin_page(State(state): State<AppState>) -> Result<Response, AppError> {
    let records = state.role_store.list_roles().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to list role records");
        AppError::DatabaseError(anyhow::anyhow!(e))
    })?;

    Ok(render(&AdminTemplate {
        rows: records.into_iter().map(RoleRow::from).collect(),
    })?
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: String,
}

/// Admin screen write path for `userRoles/{uid}`.
pub async fn admin_set_role(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(uid): Path<String>,
    Json(payload): Json<UpdateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let role = payload.role.trim();
    if uid.trim().is_empty() || role.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!("Missing uid or role")));
    }

    let result = state.role_store.set_role(&uid, role).await;
    record_role_write("admin", result.is_ok());
    result.map_err(|e| {
        tracing::error!(uid = %uid, error = %e, "Failed to update role");
        AppError::DatabaseError(anyhow::anyhow!(e))
    })?;

    tracing::info!(
        uid = %uid,
        role = %role,
        admin = session.uid().unwrap_or("-"),
        "Role updated from admin screen"
    );

    Ok(Json(json!({
        "message": "Role updated",
        "uid": uid,
        "role": role,
    })))
}
