//! Route guards.
//!
//! Pure decisions over a [`Session`] snapshot. The routing layer turns the
//! outcome into a loading page, a redirect, or the protected handler; see
//! `middleware::route_guard`.

use crate::models::{Role, Session};

pub const LOGIN_PATH: &str = "/login";
pub const VERIFY_EMAIL_PATH: &str = "/verify-email";
pub const UNAUTHORIZED_PATH: &str = "/unauthorized";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    Loading,
    RedirectToLogin,
    RedirectToVerifyEmail,
    RedirectToUnauthorized,
    Render,
}

impl GuardOutcome {
    pub fn redirect_target(&self) -> Option<&'static str> {
        match self {
            GuardOutcome::RedirectToLogin => Some(LOGIN_PATH),
            GuardOutcome::RedirectToVerifyEmail => Some(VERIFY_EMAIL_PATH),
            GuardOutcome::RedirectToUnauthorized => Some(UNAUTHORIZED_PATH),
            GuardOutcome::Loading | GuardOutcome::Render => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GuardOutcome::Loading => "loading",
            GuardOutcome::RedirectToLogin => "login",
            GuardOutcome::RedirectToVerifyEmail => "verify_email",
            GuardOutcome::RedirectToUnauthorized => "unauthorized",
            GuardOutcome::Render => "render",
        }
    }
}

/// Any signed-in identity with a verified email.
pub fn require_authenticated(session: &Session) -> GuardOutcome {
    if session.loading {
        return GuardOutcome::Loading;
    }

    match &session.identity {
        None => GuardOutcome::RedirectToLogin,
        Some(identity) if !identity.email_verified => GuardOutcome::RedirectToVerifyEmail,
        Some(_) => GuardOutcome::Render,
    }
}

/// As [`require_authenticated`], then an exact role match. A role that is
/// still being looked up does not match anything.
pub fn require_role(session: &Session, required: &Role) -> GuardOutcome {
    match require_authenticated(session) {
        GuardOutcome::Render if session.role.as_ref() == Some(required) => GuardOutcome::Render,
        GuardOutcome::Render => GuardOutcome::RedirectToUnauthorized,
        outcome => outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Identity;

    fn identity(verified: bool) -> Identity {
        Identity {
            uid: "123".to_string(),
            email: "test@example.com".to_string(),
            display_name: None,
            email_verified: verified,
            photo_url: None,
        }
    }

    fn session(identity: Option<Identity>, role: Option<Role>, loading: bool) -> Session {
        Session {
            identity,
            role,
            loading,
        }
    }

    fn every_role() -> Vec<Option<Role>> {
        vec![
            None,
            Some(Role::Admin),
            Some(Role::User),
            Some(Role::Other("bogus".to_string())),
        ]
    }

    fn every_identity() -> Vec<Option<Identity>> {
        vec![None, Some(identity(false)), Some(identity(true))]
    }

    #[test]
    fn loading_dominates_everything() {
        for id in every_identity() {
            for role in every_role() {
                let s = session(id.clone(), role.clone(), true);
                assert_eq!(require_authenticated(&s), GuardOutcome::Loading);
                assert_eq!(require_role(&s, &Role::Admin), GuardOutcome::Loading);
                assert_eq!(require_role(&s, &Role::User), GuardOutcome::Loading);
            }
        }
    }

    #[test]
    fn missing_identity_redirects_to_login() {
        for role in every_role() {
            let s = session(None, role, false);
            assert_eq!(require_authenticated(&s), GuardOutcome::RedirectToLogin);
            assert_eq!(require_role(&s, &Role::Admin), GuardOutcome::RedirectToLogin);
        }
    }

    #[test]
    fn unverified_email_wins_over_matching_role() {
        let s = session(Some(identity(false)), Some(Role::Admin), false);
        assert_eq!(require_authenticated(&s), GuardOutcome::RedirectToVerifyEmail);
        assert_eq!(require_role(&s, &Role::Admin), GuardOutcome::RedirectToVerifyEmail);
    }

    #[test]
    fn verified_identity_renders_without_role_requirement() {
        for role in every_role() {
            let s = session(Some(identity(true)), role, false);
            assert_eq!(require_authenticated(&s), GuardOutcome::Render);
        }
    }

    #[test]
    fn role_guard_renders_only_on_exact_match() {
        for required in [Role::Admin, Role::User] {
            for role in every_role() {
                let s = session(Some(identity(true)), role.clone(), false);
                let expected = if role.as_ref() == Some(&required) {
                    GuardOutcome::Render
                } else {
                    GuardOutcome::RedirectToUnauthorized
                };
                assert_eq!(require_role(&s, &required), expected, "role {:?}", role);
            }
        }
    }

    #[test]
    fn admin_does_not_satisfy_user_guard() {
        let s = session(Some(identity(true)), Some(Role::Admin), false);
        assert_eq!(
            require_role(&s, &Role::User),
            GuardOutcome::RedirectToUnauthorized
        );
    }

    #[test]
    fn redirect_targets() {
        assert_eq!(GuardOutcome::RedirectToLogin.redirect_target(), Some("/login"));
        assert_eq!(
            GuardOutcome::RedirectToVerifyEmail.redirect_target(),
            Some("/verify-email")
        );
        assert_eq!(
            GuardOutcome::RedirectToUnauthorized.redirect_target(),
            Some("/unauthorized")
        );
        assert_eq!(GuardOutcome::Loading.redirect_target(), None);
        assert_eq!(GuardOutcome::Render.redirect_target(), None);
    }
}
