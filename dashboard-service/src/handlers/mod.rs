pub mod app;
pub mod auth;
pub mod pages;
pub mod roles;

use askama::Template;
use axum::response::Html;
use dashboard_core::error::AppError;
use std::time::Duration;

use crate::models::Session;
use crate::services::SessionContext;

/// How long a form handler waits for the auth listener to apply the
/// provider's notification before answering anyway.
pub(crate) const SESSION_SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) fn render<T: Template>(template: &T) -> Result<Html<String>, AppError> {
    template.render().map(Html).map_err(|e| {
        AppError::InternalError(anyhow::anyhow!("Template rendering failed: {}", e))
    })
}

/// Wait (bounded) for the session to reach a state. The provider call has
/// already succeeded at this point; this only keeps the redirect that
/// follows from racing the listener.
pub(crate) async fn settle<F>(session: &SessionContext, predicate: F) -> Session
where
    F: FnMut(&Session) -> bool,
{
    match tokio::time::timeout(SESSION_SETTLE_TIMEOUT, session.wait_until(predicate)).await {
        Ok(settled) => settled,
        Err(_) => {
            tracing::warn!("Session did not settle in time");
            session.snapshot()
        }
    }
}
