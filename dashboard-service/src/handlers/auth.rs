//! Account flows. Every action is a pass-through to the requesting
//! browser's auth client; its session only changes through the auth
//! listener.

use askama::Template;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Form,
};
use dashboard_core::error::AppError;
use serde::Deserialize;
use tower_sessions::Session as CookieSession;
use validator::Validate;

use super::{render, settle, SESSION_SETTLE_TIMEOUT};
use crate::guards::LOGIN_PATH;
use crate::middleware::Browser;
use crate::services::metrics::record_role_write;
use crate::services::AuthProviderError;
use crate::AppState;

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub email: String,
    pub error: Option<String>,
}

#[derive(Template)]
#[template(path = "signup.html")]
pub struct SignupTemplate {
    pub error: Option<String>,
}

#[derive(Template)]
#[template(path = "verify_email.html")]
pub struct VerifyEmailTemplate {
    pub email: String,
    pub notice: Option<String>,
}

#[derive(Template)]
#[template(path = "forgot_password.html")]
pub struct ForgotPasswordTemplate {
    pub notice: Option<String>,
}

#[derive(Template)]
#[template(path = "unauthorized.html")]
pub struct UnauthorizedTemplate {}

#[derive(Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SignupForm {
    #[validate(length(min = 1, message = "Name is required"))]
    pub display_name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
    #[validate(must_match(other = "password", message = "Passwords do not match"))]
    pub repeat_password: String,
}

#[derive(Deserialize)]
pub struct ForgotPasswordForm {
    pub email: String,
}

fn provider_status(err: &AuthProviderError) -> StatusCode {
    match err {
        AuthProviderError::InvalidCredentials
        | AuthProviderError::UserNotFound
        | AuthProviderError::NoCurrentUser => StatusCode::UNAUTHORIZED,
        AuthProviderError::EmailInUse => StatusCode::CONFLICT,
        AuthProviderError::InvalidEmail | AuthProviderError::WeakPassword(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AuthProviderError::Network(_) | AuthProviderError::Provider(_) => StatusCode::BAD_GATEWAY,
    }
}

/// First message of the first failing field, in declaration order.
fn first_validation_message(errors: &validator::ValidationErrors) -> String {
    const FIELDS: [&str; 4] = ["display_name", "email", "password", "repeat_password"];
    let field_errors = errors.field_errors();

    FIELDS
        .iter()
        .filter_map(|field| field_errors.get(field))
        .flat_map(|errors| errors.iter())
        .find_map(|error| error.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| "Please check the form and try again.".to_string())
}

pub async fn login_page() -> Result<Response, AppError> {
    Ok(render(&LoginTemplate {
        email: String::new(),
        error: None,
    })?
    .into_response())
}

pub async fn login(
    browser: Browser,
    cookie: CookieSession,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    match browser.auth().sign_in(form.email.trim(), &form.password).await {
        Ok(identity) => {
            tracing::info!(uid = %identity.uid, email = %identity.email, "User signed in");
            // New cookie id on privilege change; the browser key moves with it.
            if let Err(e) = cookie.cycle_id().await {
                tracing::warn!(error = %e, "Failed to rotate cookie session id");
            }
            settle(browser.session(), |s| s.uid() == Some(identity.uid.as_str())).await;
            Ok(Redirect::to("/").into_response())
        }
        Err(e) => {
            tracing::warn!(email = %form.email, error = %e, "Sign-in failed");
            let page = render(&LoginTemplate {
                email: form.email,
                error: Some(e.friendly_message().to_string()),
            })?;
            Ok((provider_status(&e), page).into_response())
        }
    }
}

pub async fn logout(browser: Browser) -> Result<Response, AppError> {
    browser.auth().sign_out().await.map_err(|e| {
        tracing::error!(error = %e, "Sign-out failed");
        AppError::BadGateway(e.to_string())
    })?;

    settle(browser.session(), |s| s.identity.is_none()).await;
    tracing::info!("User signed out");
    Ok(Redirect::to(LOGIN_PATH).into_response())
}

pub async fn signup_page() -> Result<Response, AppError> {
    Ok(render(&SignupTemplate { error: None })?.into_response())
}

/// Create the account, write its default role record, send the
/// verification email, then re-announce the identity so the listener
/// picks up the record it may have raced.
pub async fn signup(
    State(state): State<AppState>,
    browser: Browser,
    Form(form): Form<SignupForm>,
) -> Result<Response, AppError> {
    if let Err(errors) = form.validate() {
        let page = render(&SignupTemplate {
            error: Some(first_validation_message(&errors)),
        })?;
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, page).into_response());
    }

    let identity = match browser
        .auth()
        .sign_up(form.email.trim(), &form.password, form.display_name.trim())
        .await
    {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(email = %form.email, error = %e, "Sign-up failed");
            let page = render(&SignupTemplate {
                error: Some(e.friendly_message().to_string()),
            })?;
            return Ok((provider_status(&e), page).into_response());
        }
    };

    let default_role = state.config.signup_default_role.as_str();
    match state.role_store.set_role(&identity.uid, default_role).await {
        Ok(()) => {
            record_role_write("signup", true);
            tracing::info!(uid = %identity.uid, role = %default_role, "Default role written");
        }
        Err(e) => {
            // The account exists either way; a missing record resolves to user.
            record_role_write("signup", false);
            tracing::warn!(uid = %identity.uid, error = %e, "Failed to write default role");
        }
    }

    if let Err(e) = browser.auth().send_email_verification().await {
        tracing::warn!(uid = %identity.uid, error = %e, "Failed to send verification email");
    }

    let generation = browser.session().generation();
    if let Err(e) = browser.auth().reload().await {
        tracing::warn!(uid = %identity.uid, error = %e, "Failed to refresh new account");
    } else {
        let _ = tokio::time::timeout(
            SESSION_SETTLE_TIMEOUT,
            browser.session().wait_past(generation),
        )
        .await;
    }

    let page = render(&VerifyEmailTemplate {
        email: identity.email,
        notice: Some("Account created. Check your inbox to verify your email.".to_string()),
    })?;
    Ok((StatusCode::CREATED, page).into_response())
}

pub async fn verify_email_page(browser: Browser) -> Result<Response, AppError> {
    let session = browser.session().snapshot();
    match session.identity {
        None if !session.loading => Ok(Redirect::to(LOGIN_PATH).into_response()),
        Some(identity) if identity.email_verified => Ok(Redirect::to("/").into_response()),
        identity => Ok(render(&VerifyEmailTemplate {
            email: identity.map(|i| i.email).unwrap_or_default(),
            notice: None,
        })?
        .into_response()),
    }
}

pub async fn resend_verification(browser: Browser) -> Result<Response, AppError> {
    let email = match browser.session().snapshot().identity {
        Some(identity) => identity.email,
        None => return Ok(Redirect::to(LOGIN_PATH).into_response()),
    };

    let notice = match browser.auth().send_email_verification().await {
        Ok(()) => "Verification email sent.".to_string(),
        Err(AuthProviderError::NoCurrentUser) => {
            return Ok(Redirect::to(LOGIN_PATH).into_response())
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to resend verification email");
            e.friendly_message().to_string()
        }
    };

    Ok(render(&VerifyEmailTemplate {
        email,
        notice: Some(notice),
    })?
    .into_response())
}

/// Re-read the identity from the provider, e.g. after the user followed the
/// emailed verification link.
pub async fn refresh_identity(browser: Browser) -> Result<Response, AppError> {
    let generation = browser.session().generation();

    match browser.auth().reload().await {
        Ok(()) => {
            let _ = tokio::time::timeout(
                SESSION_SETTLE_TIMEOUT,
                browser.session().wait_past(generation),
            )
            .await;
            Ok(Redirect::to("/").into_response())
        }
        Err(AuthProviderError::NoCurrentUser | AuthProviderError::UserNotFound) => {
            Ok(Redirect::to(LOGIN_PATH).into_response())
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to refresh identity");
            Err(AppError::BadGateway(e.to_string()))
        }
    }
}

pub async fn forgot_password_page() -> Result<Response, AppError> {
    Ok(render(&ForgotPasswordTemplate { notice: None })?.into_response())
}

/// Unknown addresses get the same answer as known ones. Not tied to any
/// browser session, so it goes through a throwaway client.
pub async fn forgot_password(
    State(state): State<AppState>,
    Form(form): Form<ForgotPasswordForm>,
) -> Result<Response, AppError> {
    let generic = "If an account exists for that address, a reset link is on its way.";

    let (status, notice) = match state
        .sessions
        .backend()
        .connect()
        .send_password_reset(form.email.trim())
        .await
    {
        Ok(()) | Err(AuthProviderError::UserNotFound) => (StatusCode::OK, generic.to_string()),
        Err(e @ AuthProviderError::InvalidEmail) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            e.friendly_message().to_string(),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to send password reset");
            (provider_status(&e), e.friendly_message().to_string())
        }
    };

    let page = render(&ForgotPasswordTemplate {
        notice: Some(notice),
    })?;
    Ok((status, page).into_response())
}

pub async fn unauthorized_page() -> Result<Response, AppError> {
    Ok((StatusCode::FORBIDDEN, render(&UnauthorizedTemplate {})?).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(name: &str, email: &str, password: &str, repeat: &str) -> SignupForm {
        SignupForm {
            display_name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            repeat_password: repeat.to_string(),
        }
    }

    #[test]
    fn signup_form_accepts_valid_input() {
        assert!(form("Ada", "ada@example.com", "secret1", "secret1")
            .validate()
            .is_ok());
    }

    #[test]
    fn signup_form_reports_first_problem() {
        let errors = form("", "not-an-email", "123", "456")
            .validate()
            .unwrap_err();
        assert_eq!(first_validation_message(&errors), "Name is required");

        let errors = form("Ada", "ada@example.com", "secret1", "secret2")
            .validate()
            .unwrap_err();
        assert_eq!(first_validation_message(&errors), "Passwords do not match");
    }

    #[test]
    fn provider_errors_map_to_statuses() {
        assert_eq!(
            provider_status(&AuthProviderError::InvalidCredentials),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            provider_status(&AuthProviderError::EmailInUse),
            StatusCode::CONFLICT
        );
        assert_eq!(
            provider_status(&AuthProviderError::Network("timeout".into())),
            StatusCode::BAD_GATEWAY
        );
    }
}
