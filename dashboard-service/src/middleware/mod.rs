pub mod admin_key;
pub mod browser;
pub mod route_guard;

pub use admin_key::require_admin_api_key;
pub use browser::{Browser, BROWSER_KEY};
pub use route_guard::{require_admin, require_verified_user};
