pub mod identity;
pub mod role;
pub mod session;

pub use identity::Identity;
pub use role::{resolve_record, resolve_role, Role, RoleRecord};
pub use session::Session;
