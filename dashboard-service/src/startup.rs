//! Application startup and lifecycle management.

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
    Router,
};
use dashboard_core::error::AppError;
use dashboard_core::middleware::{
    metrics_middleware, request_id_middleware, security_headers_middleware, REQUEST_ID_HEADER,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, SessionManagerLayer};

use crate::config::{AuthProviderSettings, DashboardConfig, RoleStoreSettings};
use crate::handlers::{
    app::{health_check, metrics_endpoint},
    auth, pages,
    roles::set_user_role,
};
use crate::middleware::{require_admin, require_admin_api_key, require_verified_user};
use crate::services::{
    AuthBackend, IdentityToolkitBackend, MemoryAuthBackend, MemoryRoleStore, MongoRoleStore,
    RoleStore, SessionRegistry,
};
use crate::AppState;

/// Cookie sessions outlive the live state the registry keeps for them.
const COOKIE_SESSION_TTL_HOURS: i64 = 24;

pub fn build_router(state: AppState) -> Router {
    let session_layer = SessionManagerLayer::new(state.cookie_store.clone())
        .with_secure(state.config.secure_cookies)
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(
            COOKIE_SESSION_TTL_HOURS,
        )));

    let guarded = Router::new()
        .route("/", get(pages::dashboard))
        .route("/settings", get(pages::settings))
        .route("/api/session", get(pages::session_view))
        .route_layer(from_fn_with_state(state.clone(), require_verified_user));

    let admin = Router::new()
        .route("/admin", get(pages::admin_page))
        .route("/admin/users/:uid/role", put(pages::admin_set_role))
        .route_layer(from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .route("/login", get(auth::login_page).post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/signup", get(auth::signup_page).post(auth::signup))
        .route("/verify-email", get(auth::verify_email_page))
        .route("/verify-email/resend", post(auth::resend_verification))
        .route("/verify-email/refresh", post(auth::refresh_identity))
        .route(
            "/forgot-password",
            get(auth::forgot_password_page).post(auth::forgot_password),
        )
        .route("/unauthorized", get(auth::unauthorized_page))
        .route(
            "/api/setUserRole",
            post(set_user_role).route_layer(from_fn_with_state(
                state.clone(),
                require_admin_api_key,
            )),
        )
        .merge(guarded)
        .merge(admin)
        .route_layer(from_fn(metrics_middleware))
        .layer(session_layer)
        .layer(from_fn(security_headers_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

fn build_auth_backend(config: &DashboardConfig) -> Arc<dyn AuthBackend> {
    match &config.auth {
        AuthProviderSettings::Memory => {
            tracing::info!("Using in-memory auth provider");
            Arc::new(MemoryAuthBackend::new())
        }
        AuthProviderSettings::IdentityToolkit(toolkit) => {
            tracing::info!(base_url = %toolkit.base_url, "Using identity toolkit auth provider");
            Arc::new(IdentityToolkitBackend::new(toolkit))
        }
    }
}

async fn build_role_store(config: &DashboardConfig) -> Result<Arc<dyn RoleStore>, AppError> {
    match &config.role_store {
        RoleStoreSettings::Memory => {
            tracing::info!("Using in-memory role store");
            Ok(Arc::new(MemoryRoleStore::new()))
        }
        RoleStoreSettings::MongoDb(mongo) => {
            let store = MongoRoleStore::connect(&mongo.uri, &mongo.database)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to connect to MongoDB: {}", e);
                    AppError::DatabaseError(anyhow::anyhow!(e))
                })?;
            Ok(Arc::new(store))
        }
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    sweeper: JoinHandle<()>,
}

impl Application {
    /// Build with collaborators chosen by `config`.
    pub async fn build(config: DashboardConfig) -> Result<Self, AppError> {
        let auth_backend = build_auth_backend(&config);
        let role_store = build_role_store(&config).await?;
        Self::build_with(config, auth_backend, role_store).await
    }

    /// Build around caller-supplied collaborators (used by tests).
    pub async fn build_with(
        config: DashboardConfig,
        auth_backend: Arc<dyn AuthBackend>,
        role_store: Arc<dyn RoleStore>,
    ) -> Result<Self, AppError> {
        let mut registry = SessionRegistry::new(auth_backend, role_store.clone());
        if let Some(dir) = &config.session_mirror_dir {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                tracing::error!("Failed to create session mirror directory {}: {}", dir.display(), e);
                AppError::from(e)
            })?;
            tracing::info!(path = %dir.display(), "Mirroring browser sessions to disk");
            registry = registry.with_mirror_dir(dir.clone());
        }
        let sessions = Arc::new(registry);
        let sweeper = sessions.clone().spawn_sweeper(config.session_idle_timeout);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();
        tracing::info!("Dashboard service listening on port {}", port);

        let state = AppState::new(sessions, role_store, Arc::new(config));

        Ok(Self {
            port,
            listener,
            state,
            sweeper,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until `shutdown` resolves, then stop every browser session's
    /// auth listener.
    pub async fn run_until_stopped<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let sessions = self.state.sessions.clone();
        let router = build_router(self.state);

        let result = axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown)
            .await;

        self.sweeper.abort();
        sessions.shutdown();

        result.map_err(|e| {
            tracing::error!("HTTP server error: {}", e);
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
