pub mod auth_listener;
pub mod browser_sessions;
pub mod database;
pub mod metrics;
pub mod providers;
pub mod role_store;
pub mod session;
pub mod session_mirror;

pub use auth_listener::AuthListener;
pub use browser_sessions::{BrowserSession, SessionRegistry};
pub use database::MongoRoleStore;
pub use providers::{
    AuthBackend, AuthProvider, AuthProviderError, AuthSignal, IdentityToolkitBackend,
    IdentityToolkitProvider, MemoryAuthBackend, MemoryAuthProvider,
};
pub use role_store::{MemoryRoleStore, RoleStore, RoleStoreError};
pub use session::{SessionChanges, SessionContext};
pub use session_mirror::SessionMirror;
