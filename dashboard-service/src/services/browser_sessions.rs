//! Per-browser session state.
//!
//! Every browser, identified by a key kept in its cookie session, gets its
//! own auth client, session container and auth listener. Entries are opened
//! on first use and evicted once idle; eviction tears the listener down.

use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use super::auth_listener::AuthListener;
use super::metrics::record_browser_sessions;
use super::providers::{AuthBackend, AuthProvider};
use super::role_store::RoleStore;
use super::session::SessionContext;
use super::session_mirror::SessionMirror;
use crate::models::Session;

/// How long opening a new entry waits for the provider's first report, so
/// a client that is already settled is not shown the loading page.
pub const FIRST_SIGNAL_GRACE: Duration = Duration::from_millis(200);

pub struct BrowserSession {
    key: String,
    session: SessionContext,
    auth: Arc<dyn AuthProvider>,
    listener: AuthListener,
    /// Warm-start hint read from this browser's mirror file. Never
    /// consulted by guards.
    restored: Option<Session>,
    last_seen: Mutex<Instant>,
}

impl BrowserSession {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn auth(&self) -> &dyn AuthProvider {
        self.auth.as_ref()
    }

    pub fn restored(&self) -> Option<&Session> {
        self.restored.as_ref()
    }

    fn touch(&self) {
        if let Ok(mut last_seen) = self.last_seen.lock() {
            *last_seen = Instant::now();
        }
    }

    fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .map(|last_seen| last_seen.elapsed())
            .unwrap_or_default()
    }

    fn close(&self) {
        self.listener.teardown();
    }
}

pub struct SessionRegistry {
    backend: Arc<dyn AuthBackend>,
    roles: Arc<dyn RoleStore>,
    mirror_dir: Option<PathBuf>,
    sessions: DashMap<String, Arc<BrowserSession>>,
}

impl SessionRegistry {
    pub fn new(backend: Arc<dyn AuthBackend>, roles: Arc<dyn RoleStore>) -> Self {
        Self {
            backend,
            roles,
            mirror_dir: None,
            sessions: DashMap::new(),
        }
    }

    /// Mirror each browser's session to `<dir>/<key>.json`.
    pub fn with_mirror_dir(mut self, dir: PathBuf) -> Self {
        self.mirror_dir = Some(dir);
        self
    }

    pub fn backend(&self) -> &dyn AuthBackend {
        self.backend.as_ref()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<Arc<BrowserSession>> {
        self.sessions.get(key).map(|entry| {
            entry.touch();
            entry.value().clone()
        })
    }

    /// The entry for `key`, starting a fresh one if there is none.
    /// Must be called from within a Tokio runtime.
    pub async fn open(&self, key: &str) -> Arc<BrowserSession> {
        if let Some(existing) = self.get(key) {
            return existing;
        }

        let mirror = self.mirror_for(key);
        let restored = match &mirror {
            Some(mirror) => mirror.load().await,
            None => None,
        };

        let mut created = false;
        let browser = self
            .sessions
            .entry(key.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(self.start(key, restored, mirror))
            })
            .value()
            .clone();

        if created {
            record_browser_sessions(self.sessions.len());
            let settled = browser.session.wait_until(|session| !session.loading);
            if tokio::time::timeout(FIRST_SIGNAL_GRACE, settled).await.is_err() {
                tracing::debug!(key = %key, "Auth client has not reported yet");
            }
        }
        browser
    }

    fn start(
        &self,
        key: &str,
        restored: Option<Session>,
        mirror: Option<SessionMirror>,
    ) -> BrowserSession {
        let session = SessionContext::new();

        // Subscribe the mirror before the listener can publish anything.
        if let Some(mirror) = mirror {
            mirror.spawn(session.clone());
        }
        let auth = self.backend.connect();
        let listener = AuthListener::init(auth.clone(), self.roles.clone(), session.clone());

        tracing::info!(
            key = %key,
            restored = restored.is_some(),
            "Browser session opened"
        );

        BrowserSession {
            key: key.to_string(),
            session,
            auth,
            listener,
            restored,
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// Keys are minted by the cookie layer; anything else gets no file.
    fn mirror_for(&self, key: &str) -> Option<SessionMirror> {
        let dir = self.mirror_dir.as_ref()?;
        let safe = !key.is_empty()
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !safe {
            tracing::warn!(key = %key, "Not mirroring session with unexpected key");
            return None;
        }
        Some(SessionMirror::new(dir.join(format!("{}.json", key))))
    }

    /// Drop the entry for `key` and stop its listener.
    pub fn close(&self, key: &str) -> bool {
        match self.sessions.remove(key) {
            Some((_, browser)) => {
                browser.close();
                record_browser_sessions(self.sessions.len());
                tracing::info!(key = %key, "Browser session closed");
                true
            }
            None => false,
        }
    }

    /// Close every entry idle for longer than `max_idle`.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut evicted = 0;
        self.sessions.retain(|_, browser| {
            if browser.idle_for() <= max_idle {
                return true;
            }
            browser.close();
            evicted += 1;
            false
        });

        if evicted > 0 {
            record_browser_sessions(self.sessions.len());
            tracing::info!(
                evicted,
                remaining = self.sessions.len(),
                "Evicted idle browser sessions"
            );
        }
        evicted
    }

    /// Periodically evict entries idle for longer than `max_idle`.
    pub fn spawn_sweeper(self: Arc<Self>, max_idle: Duration) -> JoinHandle<()> {
        let period = max_idle.min(Duration::from_secs(60)).max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.evict_idle(max_idle);
            }
        })
    }

    /// Stop every listener. Used on server shutdown.
    pub fn shutdown(&self) {
        let count = self.sessions.len();
        self.sessions.retain(|_, browser| {
            browser.close();
            false
        });
        record_browser_sessions(0);
        tracing::info!(count, "Closed all browser sessions");
    }
}
