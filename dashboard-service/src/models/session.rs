use serde::{Deserialize, Serialize};

use super::{Identity, Role};

/// In-memory session: who is signed in, with which role, and whether the
/// auth provider has reported anything yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub identity: Option<Identity>,
    pub role: Option<Role>,
    pub loading: bool,
}

impl Session {
    /// State before the first auth callback.
    pub fn initial() -> Self {
        Self {
            identity: None,
            role: None,
            loading: true,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        self.identity.is_some()
    }

    pub fn uid(&self) -> Option<&str> {
        self.identity.as_ref().map(|identity| identity.uid.as_str())
    }

    /// Identity is known but the role lookup has not completed yet.
    pub fn role_pending(&self) -> bool {
        self.identity.is_some() && self.role.is_none()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::initial()
    }
}
