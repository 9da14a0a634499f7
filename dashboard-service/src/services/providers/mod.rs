pub mod identity_toolkit;
pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

use crate::models::Identity;

pub use identity_toolkit::{IdentityToolkitBackend, IdentityToolkitProvider};
pub use memory::{MemoryAuthBackend, MemoryAuthProvider};

/// Identity-change notification from the auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthSignal {
    /// The provider has not decided yet (e.g. still restoring a session).
    Pending,
    SignedIn(Identity),
    /// No identity: explicit sign-out, never signed in, or a provider-side
    /// failure such as a rejected token.
    SignedOut,
}

impl AuthSignal {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            AuthSignal::SignedIn(identity) => Some(identity),
            AuthSignal::Pending | AuthSignal::SignedOut => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthProviderError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email address already in use")]
    EmailInUse,

    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Password too weak: {0}")]
    WeakPassword(String),

    #[error("User not found")]
    UserNotFound,

    #[error("No signed-in user")]
    NoCurrentUser,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider error: {0}")]
    Provider(String),
}

impl AuthProviderError {
    /// Message suitable for showing to the person at the keyboard.
    pub fn friendly_message(&self) -> &'static str {
        match self {
            AuthProviderError::InvalidCredentials => "Invalid email or password.",
            AuthProviderError::EmailInUse => "This email address is already in use.",
            AuthProviderError::InvalidEmail => "Invalid email address.",
            AuthProviderError::WeakPassword(_) => {
                "Password is too weak. Minimum 6 characters required."
            }
            AuthProviderError::UserNotFound => "No account found for that email address.",
            AuthProviderError::NoCurrentUser => "Please sign in first.",
            AuthProviderError::Network(_) => {
                "Network error. Please check your internet connection."
            }
            AuthProviderError::Provider(_) => "Something went wrong. Please try again.",
        }
    }
}

/// Source of auth clients: one per browser session, all talking to the
/// same accounts.
pub trait AuthBackend: Send + Sync {
    fn connect(&self) -> Arc<dyn AuthProvider>;

    fn provider_name(&self) -> &'static str;
}

/// One client of the hosted authentication provider, tracking at most one
/// signed-in identity.
///
/// `subscribe` is the identity-change stream the auth listener consumes;
/// the other operations are pass-throughs whose effect on the session
/// arrives through that stream.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn subscribe(&self) -> watch::Receiver<AuthSignal>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthProviderError>;

    async fn sign_out(&self) -> Result<(), AuthProviderError>;

    /// Create an account and sign it in.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Identity, AuthProviderError>;

    /// Send a verification email to the signed-in identity.
    async fn send_email_verification(&self) -> Result<(), AuthProviderError>;

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthProviderError>;

    /// Re-read the signed-in identity from the provider and re-announce it.
    async fn reload(&self) -> Result<(), AuthProviderError>;

    fn provider_name(&self) -> &'static str;
}
