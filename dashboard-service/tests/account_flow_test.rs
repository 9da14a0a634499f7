//! Login, logout, signup and verification flows through the router.

mod common;

use axum::http::{header, StatusCode};
use common::{assert_redirect, body_text, TestApp, PASSWORD};
use dashboard_service::config::DashboardConfig;
use dashboard_service::models::Role;

fn signup_body(email: &str, password: &str, repeat: &str) -> String {
    format!(
        "display_name=Ada+Lovelace&email={}&password={}&repeat_password={}",
        email.replace('@', "%40"),
        password,
        repeat
    )
}

#[tokio::test]
async fn login_then_dashboard_then_logout() {
    let app = TestApp::spawn().await;
    app.accounts
        .add_account("ada@example.com", PASSWORD, Some("Ada"), true);

    assert_redirect(&app.login("ada@example.com", PASSWORD).await, "/");

    let response = app.get("/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Welcome back, Ada"));

    assert_redirect(&app.post_form("/logout", "").await, "/login");
    assert!(!app.session().await.is_signed_in());
    assert_redirect(&app.get("/").await, "/login");
}

#[tokio::test]
async fn wrong_password_returns_401_and_keeps_session_empty() {
    let app = TestApp::spawn().await;
    app.accounts
        .add_account("ada@example.com", PASSWORD, None, true);

    let response = app.login("ada@example.com", "nope").await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(body_text(response)
        .await
        .contains("Invalid email or password."));
    assert!(!app.session().await.is_signed_in());
}

#[tokio::test]
async fn signup_writes_default_role_and_sends_verification() {
    let app = TestApp::spawn().await;

    let response = app
        .post_form("/signup", &signup_body("new@example.com", "secret1", "secret1"))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let identity = app
        .session()
        .await
        .identity
        .expect("signed in after signup");
    assert_eq!(identity.display_name.as_deref(), Some("Ada Lovelace"));
    assert_eq!(
        app.roles.get(&identity.uid).unwrap().role.as_deref(),
        Some("user")
    );
    assert_eq!(app.accounts.verification_emails(), vec!["new@example.com"]);

    let session = app.wait_for(|s| s.role.is_some()).await;
    assert_eq!(session.role, Some(Role::User));
    assert_redirect(&app.get("/").await, "/verify-email");
}

#[tokio::test]
async fn signup_default_role_is_configurable() {
    let app = TestApp::with_config(DashboardConfig {
        signup_default_role: "admin".to_string(),
        ..DashboardConfig::default()
    })
    .await;

    let response = app
        .post_form("/signup", &signup_body("boss@example.com", "secret1", "secret1"))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let session = app.wait_for(|s| s.role == Some(Role::Admin)).await;
    assert!(session.is_signed_in());
}

#[tokio::test]
async fn signup_succeeds_even_if_role_write_fails() {
    let app = TestApp::spawn().await;
    app.roles.fail_writes(true);

    let response = app
        .post_form("/signup", &signup_body("new@example.com", "secret1", "secret1"))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let session = app.wait_for(|s| s.role.is_some()).await;
    assert_eq!(session.role, Some(Role::User));
}

#[tokio::test]
async fn signup_rejects_invalid_forms() {
    let app = TestApp::spawn().await;

    let response = app
        .post_form("/signup", &signup_body("new@example.com", "secret1", "secret2"))
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_text(response).await.contains("Passwords do not match"));

    let response = app
        .post_form("/signup", &signup_body("new@example.com", "123", "123"))
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    assert!(app.accounts.account("new@example.com").is_none());
}

#[tokio::test]
async fn signup_with_taken_email_returns_409() {
    let app = TestApp::spawn().await;
    app.accounts
        .add_account("ada@example.com", PASSWORD, None, true);

    let response = app
        .post_form("/signup", &signup_body("ada@example.com", "secret1", "secret1"))
        .await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(body_text(response)
        .await
        .contains("This email address is already in use."));
}

#[tokio::test]
async fn refresh_after_verification_opens_dashboard() {
    let app = TestApp::spawn().await;
    app.sign_in_as("ada@example.com", None, false).await;
    assert_redirect(&app.get("/").await, "/verify-email");

    let response = app.get("/verify-email").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("ada@example.com"));

    app.accounts.mark_email_verified("ada@example.com");
    assert_redirect(&app.post_form("/verify-email/refresh", "").await, "/");

    assert_eq!(app.get("/").await.status(), StatusCode::OK);
    assert_eq!(app.session().await.role, Some(Role::User));
}

#[tokio::test]
async fn resend_verification_requires_identity() {
    let app = TestApp::spawn().await;
    assert_redirect(&app.post_form("/verify-email/resend", "").await, "/login");

    app.sign_in_as("ada@example.com", None, false).await;
    let response = app.post_form("/verify-email/resend", "").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.accounts.verification_emails(), vec!["ada@example.com"]);
}

#[tokio::test]
async fn forgot_password_does_not_reveal_accounts() {
    let app = TestApp::spawn().await;
    app.accounts
        .add_account("ada@example.com", PASSWORD, None, true);

    let known = app
        .post_form("/forgot-password", "email=ada%40example.com")
        .await;
    let unknown = app
        .post_form("/forgot-password", "email=nobody%40example.com")
        .await;

    assert_eq!(known.status(), StatusCode::OK);
    assert_eq!(unknown.status(), StatusCode::OK);
    assert_eq!(body_text(known).await, body_text(unknown).await);
    assert_eq!(app.accounts.password_resets(), vec!["ada@example.com"]);
}

#[tokio::test]
async fn public_pages_render() {
    let app = TestApp::spawn().await;

    for path in ["/login", "/signup", "/forgot-password"] {
        assert_eq!(app.get(path).await.status(), StatusCode::OK, "path: {}", path);
    }
    assert_eq!(app.get("/unauthorized").await.status(), StatusCode::FORBIDDEN);
    assert_redirect(&app.get("/verify-email").await, "/login");
}

#[tokio::test]
async fn login_rotates_the_session_cookie_but_keeps_the_browser() {
    let app = TestApp::spawn().await;
    app.accounts
        .add_account("ada@example.com", PASSWORD, None, true);

    let before = app.get("/verify-email").await;
    assert_redirect(&before, "/login");
    let browser = app.browser().await;
    let cookie = before.headers()[header::SET_COOKIE].to_str().unwrap().to_string();

    let response = app.login("ada@example.com", PASSWORD).await;
    assert_redirect(&response, "/");
    let rotated = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();

    assert_ne!(cookie.split(';').next(), rotated.split(';').next());
    assert_eq!(app.browser().await.key(), browser.key());
}

#[tokio::test]
async fn signup_in_one_browser_leaves_another_signed_out() {
    let app = TestApp::spawn().await;
    let other = app.other_browser();
    assert_redirect(&other.get("/").await, "/login");

    let response = app
        .post_form("/signup", &signup_body("new@example.com", "secret1", "secret1"))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    assert!(app.session().await.is_signed_in());
    assert!(!other.session().await.is_signed_in());
    assert_redirect(&other.post_form("/verify-email/resend", "").await, "/login");
}
