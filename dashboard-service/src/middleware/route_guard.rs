//! Guard middleware: evaluates a guard over the requesting browser's
//! session snapshot and either lets the request through or answers it
//! directly.

use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
};

use super::browser::Browser;
use crate::guards::{require_authenticated, require_role, GuardOutcome};
use crate::models::Role;
use crate::services::metrics::record_guard_outcome;

const LOADING_PAGE: &str = "<!doctype html><html><head><title>Loading</title></head>\
<body><p>Loading...</p></body></html>";

/// Any signed-in user with a verified email.
pub async fn require_verified_user(
    browser: Browser,
    mut request: Request,
    next: Next,
) -> Response {
    let session = browser.session().snapshot();
    let outcome = require_authenticated(&session);
    record_guard_outcome("authenticated", outcome.as_str());

    if outcome != GuardOutcome::Render {
        return respond(outcome);
    }
    request.extensions_mut().insert(session);
    next.run(request).await
}

/// Verified user whose role is exactly `admin`.
pub async fn require_admin(browser: Browser, mut request: Request, next: Next) -> Response {
    let session = browser.session().snapshot();
    let outcome = require_role(&session, &Role::Admin);
    record_guard_outcome("admin", outcome.as_str());

    if outcome != GuardOutcome::Render {
        tracing::debug!(
            path = %request.uri().path(),
            outcome = outcome.as_str(),
            "Admin guard refused request"
        );
        return respond(outcome);
    }
    request.extensions_mut().insert(session);
    next.run(request).await
}

/// Turn a non-render outcome into a response. The loading page asks the
/// browser to retry shortly instead of redirecting.
fn respond(outcome: GuardOutcome) -> Response {
    match outcome.redirect_target() {
        Some(target) => Redirect::to(target).into_response(),
        None => (
            StatusCode::OK,
            [
                (header::REFRESH, "1"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            Html(LOADING_PAGE),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirects_are_see_other() {
        let response = respond(GuardOutcome::RedirectToUnauthorized);
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/unauthorized");
    }

    #[test]
    fn loading_asks_for_refresh() {
        let response = respond(GuardOutcome::Loading);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::REFRESH], "1");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    }
}
