#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use dashboard_service::config::DashboardConfig;
use dashboard_service::middleware::BROWSER_KEY;
use dashboard_service::models::{Identity, Session};
use dashboard_service::services::{
    BrowserSession, MemoryAuthBackend, MemoryRoleStore, RoleStore, SessionRegistry,
};
use dashboard_service::startup::build_router;
use dashboard_service::AppState;
use http_body_util::BodyExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::util::ServiceExt;
use tower_sessions::{session::Id, SessionStore};

pub const PASSWORD: &str = "secret1";
const WAIT: Duration = Duration::from_secs(2);

/// Router over in-memory collaborators, driven like one browser: the
/// session cookie from each response is sent with the next request.
pub struct TestApp {
    pub accounts: MemoryAuthBackend,
    pub roles: Arc<MemoryRoleStore>,
    pub state: AppState,
    cookie: Mutex<Option<String>>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::build(MemoryAuthBackend::new(), DashboardConfig::default())
    }

    pub async fn with_config(config: DashboardConfig) -> Self {
        Self::build(MemoryAuthBackend::new(), config)
    }

    /// Auth clients report nothing until `accounts.settle()`, so browser
    /// sessions stay loading.
    pub async fn pending() -> Self {
        Self::build(MemoryAuthBackend::pending(), DashboardConfig::default())
    }

    fn build(accounts: MemoryAuthBackend, config: DashboardConfig) -> Self {
        let roles = Arc::new(MemoryRoleStore::new());
        let role_store: Arc<dyn RoleStore> = roles.clone();
        let sessions = SessionRegistry::new(Arc::new(accounts.clone()), role_store.clone());
        let state = AppState::new(Arc::new(sessions), role_store, Arc::new(config));

        Self {
            accounts,
            roles,
            state,
            cookie: Mutex::new(None),
        }
    }

    /// Another browser against the same application, with no cookie yet.
    pub fn other_browser(&self) -> Self {
        Self {
            accounts: self.accounts.clone(),
            roles: self.roles.clone(),
            state: self.state.clone(),
            cookie: Mutex::new(None),
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    async fn browser_key(&self) -> Option<String> {
        let cookie = self.cookie.lock().unwrap().clone()?;
        let id = cookie.strip_prefix("id=")?.parse::<Id>().ok()?;
        let record = self.state.cookie_store.load(&id).await.ok()??;
        record.data.get(BROWSER_KEY)?.as_str().map(str::to_string)
    }

    /// Live state behind this browser's cookie.
    pub async fn browser(&self) -> Arc<BrowserSession> {
        let key = self
            .browser_key()
            .await
            .expect("no browser session yet; make a request first");
        self.state
            .sessions
            .get(&key)
            .expect("browser session was evicted")
    }

    pub async fn session(&self) -> Session {
        self.browser().await.session().snapshot()
    }

    pub async fn wait_for<F>(&self, predicate: F) -> Session
    where
        F: FnMut(&Session) -> bool,
    {
        let browser = self.browser().await;
        tokio::time::timeout(WAIT, browser.session().wait_until(predicate))
            .await
            .expect("session never reached the expected state")
    }

    pub async fn login(&self, email: &str, password: &str) -> Response<Body> {
        self.post_form(
            "/login",
            &format!("email={}&password={}", email.replace('@', "%40"), password),
        )
        .await
    }

    /// Create an account, store its role (if any) and sign it in through
    /// `/login`, then wait for the listener to finish the role lookup.
    pub async fn sign_in_as(&self, email: &str, role: Option<&str>, verified: bool) -> Identity {
        let identity = self.accounts.add_account(email, PASSWORD, None, verified);
        if let Some(role) = role {
            self.roles.set_role(&identity.uid, role).await.unwrap();
        }
        assert_redirect(&self.login(email, PASSWORD).await, "/");

        let uid = identity.uid.clone();
        self.wait_for(move |s| s.uid() == Some(uid.as_str()) && s.role.is_some())
            .await;
        identity
    }

    pub async fn request(&self, mut request: Request<Body>) -> Response<Body> {
        let cookie = self.cookie.lock().unwrap().clone();
        if let Some(cookie) = cookie {
            request
                .headers_mut()
                .insert(header::COOKIE, cookie.parse().unwrap());
        }

        let response = self.router().oneshot(request).await.unwrap();

        if let Some(set_cookie) = response.headers().get(header::SET_COOKIE) {
            let pair = set_cookie
                .to_str()
                .unwrap()
                .split(';')
                .next()
                .unwrap()
                .to_string();
            *self.cookie.lock().unwrap() = Some(pair);
        }
        response
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.request(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_form(&self, uri: &str, body: &str) -> Response<Body> {
        self.request(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn send_json(
        &self,
        method: &str,
        uri: &str,
        body: &str,
        headers: &[(&str, &str)],
    ) -> Response<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.request(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }
}

pub fn location(response: &Response<Body>) -> Option<&str> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
}

pub fn assert_redirect(response: &Response<Body>, target: &str) {
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(response), Some(target));
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
