//! Binds a request to its browser's session state through the cookie
//! session.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use dashboard_core::error::AppError;
use std::ops::Deref;
use std::sync::Arc;
use tower_sessions::Session as CookieSession;
use uuid::Uuid;

use crate::services::BrowserSession;
use crate::AppState;

/// Cookie-session field holding the key of the browser's registry entry.
pub const BROWSER_KEY: &str = "browser_key";

/// The requesting browser's live session state. A request without a
/// cookie session gets a fresh, signed-out entry.
#[derive(Clone)]
pub struct Browser(pub Arc<BrowserSession>);

impl Deref for Browser {
    type Target = BrowserSession;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

fn cookie_error(e: impl std::fmt::Display) -> AppError {
    AppError::InternalError(anyhow::anyhow!("Cookie session unavailable: {}", e))
}

#[async_trait]
impl FromRequestParts<AppState> for Browser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(browser) = parts.extensions.get::<Browser>() {
            return Ok(browser.clone());
        }

        let cookie = CookieSession::from_request_parts(parts, state)
            .await
            .map_err(|(_, message)| cookie_error(message))?;

        let key = match cookie.get::<String>(BROWSER_KEY).await.map_err(cookie_error)? {
            Some(key) => key,
            None => {
                let key = Uuid::new_v4().simple().to_string();
                cookie.insert(BROWSER_KEY, &key).await.map_err(cookie_error)?;
                key
            }
        };

        let browser = Browser(state.sessions.open(&key).await);
        parts.extensions.insert(browser.clone());
        Ok(browser)
    }
}
