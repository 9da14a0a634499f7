pub mod config;
pub mod guards;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;

use config::DashboardConfig;
use services::{RoleStore, SessionRegistry};
use std::sync::Arc;
use tower_sessions::MemoryStore;

/// Shared application state handed to every handler and guard.
#[derive(Clone)]
pub struct AppState {
    /// Live session state, one entry per browser.
    pub sessions: Arc<SessionRegistry>,
    pub role_store: Arc<dyn RoleStore>,
    pub config: Arc<DashboardConfig>,
    /// Backing store for the cookie sessions that carry browser keys.
    pub cookie_store: MemoryStore,
}

impl AppState {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        role_store: Arc<dyn RoleStore>,
        config: Arc<DashboardConfig>,
    ) -> Self {
        Self {
            sessions,
            role_store,
            config,
            cookie_store: MemoryStore::default(),
        }
    }
}
