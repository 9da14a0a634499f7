use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;
use uuid::Uuid;

use super::{AuthBackend, AuthProvider, AuthProviderError, AuthSignal};
use crate::models::Identity;

const MIN_PASSWORD_LEN: usize = 6;

struct Account {
    identity: Identity,
    password: String,
}

/// Accounts and outgoing mail shared by every client of one backend.
#[derive(Default)]
struct Directory {
    accounts: DashMap<String, Account>,
    verification_emails: Mutex<Vec<String>>,
    password_resets: Mutex<Vec<String>>,
    clients: Mutex<Vec<Weak<watch::Sender<AuthSignal>>>>,
}

impl Directory {
    fn register(&self, signal: &Arc<watch::Sender<AuthSignal>>) {
        if let Ok(mut clients) = self.clients.lock() {
            clients.retain(|client| client.strong_count() > 0);
            clients.push(Arc::downgrade(signal));
        }
    }

    fn each_client(&self, mut f: impl FnMut(&watch::Sender<AuthSignal>)) {
        let live: Vec<_> = match self.clients.lock() {
            Ok(clients) => clients.iter().filter_map(Weak::upgrade).collect(),
            Err(_) => return,
        };
        for signal in live {
            f(&signal);
        }
    }
}

/// In-process auth backend for local runs and tests.
///
/// Accounts live in memory, keyed by lowercase email. Outgoing emails are
/// recorded instead of sent. Every browser gets its own
/// [`MemoryAuthProvider`] client over the same accounts.
#[derive(Clone)]
pub struct MemoryAuthBackend {
    directory: Arc<Directory>,
    initial: AuthSignal,
}

impl MemoryAuthBackend {
    /// Clients start out settled on "nobody signed in".
    pub fn new() -> Self {
        Self {
            directory: Arc::new(Directory::default()),
            initial: AuthSignal::SignedOut,
        }
    }

    /// Clients start out pending until [`settle`] is called.
    ///
    /// [`settle`]: MemoryAuthBackend::settle
    pub fn pending() -> Self {
        Self {
            initial: AuthSignal::Pending,
            ..Self::new()
        }
    }

    /// A new client over this backend's accounts.
    pub fn client(&self) -> MemoryAuthProvider {
        let (signal, _) = watch::channel(self.initial.clone());
        let signal = Arc::new(signal);
        self.directory.register(&signal);
        MemoryAuthProvider {
            directory: self.directory.clone(),
            signal,
        }
    }

    /// Register an account without signing it in.
    pub fn add_account(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
        email_verified: bool,
    ) -> Identity {
        let identity = Identity {
            uid: Uuid::new_v4().simple().to_string(),
            email: email.to_string(),
            display_name: display_name.map(str::to_string),
            email_verified,
            photo_url: None,
        };
        self.directory.accounts.insert(
            email.to_lowercase(),
            Account {
                identity: identity.clone(),
                password: password.to_string(),
            },
        );
        identity
    }

    pub fn account(&self, email: &str) -> Option<Identity> {
        self.directory
            .accounts
            .get(&email.to_lowercase())
            .map(|account| account.identity.clone())
    }

    /// Flip the verified flag, as if the user followed the emailed link.
    /// Sessions only see it after [`AuthProvider::reload`] or a new sign-in.
    pub fn mark_email_verified(&self, email: &str) -> bool {
        match self.directory.accounts.get_mut(&email.to_lowercase()) {
            Some(mut account) => {
                account.identity.email_verified = true;
                true
            }
            None => false,
        }
    }

    /// Resolve every pending client to "signed out".
    pub fn settle(&self) {
        self.directory.each_client(settle_signal);
    }

    /// Sign `email` out of every client it is signed in on, as a
    /// provider-side token revocation would.
    pub fn revoke(&self, email: &str) -> usize {
        let mut revoked = 0;
        self.directory.each_client(|signal| {
            let signed_in = signal
                .borrow()
                .identity()
                .is_some_and(|identity| identity.email.eq_ignore_ascii_case(email));
            if signed_in {
                signal.send_replace(AuthSignal::SignedOut);
                revoked += 1;
            }
        });
        if revoked > 0 {
            tracing::warn!(email = %email, clients = revoked, "Revoked sessions");
        }
        revoked
    }

    pub fn verification_emails(&self) -> Vec<String> {
        self.directory
            .verification_emails
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    pub fn password_resets(&self) -> Vec<String> {
        self.directory
            .password_resets
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl Default for MemoryAuthBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthBackend for MemoryAuthBackend {
    fn connect(&self) -> Arc<dyn AuthProvider> {
        Arc::new(self.client())
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}

fn settle_signal(signal: &watch::Sender<AuthSignal>) {
    signal.send_if_modified(|signal| {
        if *signal == AuthSignal::Pending {
            *signal = AuthSignal::SignedOut;
            true
        } else {
            false
        }
    });
}

/// One client of a [`MemoryAuthBackend`]: tracks who is signed in on it.
pub struct MemoryAuthProvider {
    directory: Arc<Directory>,
    signal: Arc<watch::Sender<AuthSignal>>,
}

impl MemoryAuthProvider {
    /// Client of a fresh backend, settled on "nobody signed in".
    pub fn new() -> Self {
        MemoryAuthBackend::new().client()
    }

    /// Client of a fresh backend that has not reported anything yet.
    pub fn pending() -> Self {
        MemoryAuthBackend::pending().client()
    }

    /// Backend handle over the same accounts.
    pub fn backend(&self) -> MemoryAuthBackend {
        MemoryAuthBackend {
            directory: self.directory.clone(),
            initial: AuthSignal::SignedOut,
        }
    }

    pub fn add_account(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
        email_verified: bool,
    ) -> Identity {
        self.backend()
            .add_account(email, password, display_name, email_verified)
    }

    pub fn mark_email_verified(&self, email: &str) -> bool {
        self.backend().mark_email_verified(email)
    }

    /// Resolve a pending start to "signed out".
    pub fn settle(&self) {
        settle_signal(&self.signal);
    }

    /// Simulate a provider-side failure (e.g. a rejected token).
    pub fn fail_session(&self) {
        tracing::warn!("Simulated auth provider failure");
        self.signal.send_replace(AuthSignal::SignedOut);
    }

    pub fn current(&self) -> Option<Identity> {
        self.signal.borrow().identity().cloned()
    }

    pub fn verification_emails(&self) -> Vec<String> {
        self.backend().verification_emails()
    }

    pub fn password_resets(&self) -> Vec<String> {
        self.backend().password_resets()
    }

    fn announce(&self, identity: Identity) {
        self.signal.send_replace(AuthSignal::SignedIn(identity));
    }
}

impl Default for MemoryAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.starts_with('.')
                && domain.contains('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

#[async_trait]
impl AuthProvider for MemoryAuthProvider {
    fn subscribe(&self) -> watch::Receiver<AuthSignal> {
        self.signal.subscribe()
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthProviderError> {
        let identity = match self.directory.accounts.get(&email.to_lowercase()) {
            Some(account) if account.password == password => account.identity.clone(),
            _ => return Err(AuthProviderError::InvalidCredentials),
        };
        self.announce(identity.clone());
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthProviderError> {
        self.signal.send_replace(AuthSignal::SignedOut);
        Ok(())
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Identity, AuthProviderError> {
        if !looks_like_email(email) {
            return Err(AuthProviderError::InvalidEmail);
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthProviderError::WeakPassword(format!(
                "Password should be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        if self.directory.accounts.contains_key(&email.to_lowercase()) {
            return Err(AuthProviderError::EmailInUse);
        }

        let display_name = Some(display_name).filter(|name| !name.trim().is_empty());
        let identity = self.add_account(email, password, display_name, false);
        self.announce(identity.clone());
        Ok(identity)
    }

    async fn send_email_verification(&self) -> Result<(), AuthProviderError> {
        let identity = self.current().ok_or(AuthProviderError::NoCurrentUser)?;
        if identity.email_verified {
            return Ok(());
        }
        if let Ok(mut sent) = self.directory.verification_emails.lock() {
            sent.push(identity.email);
        }
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthProviderError> {
        if !self.directory.accounts.contains_key(&email.to_lowercase()) {
            return Err(AuthProviderError::UserNotFound);
        }
        if let Ok(mut sent) = self.directory.password_resets.lock() {
            sent.push(email.to_string());
        }
        Ok(())
    }

    async fn reload(&self) -> Result<(), AuthProviderError> {
        let current = self.current().ok_or(AuthProviderError::NoCurrentUser)?;
        let refreshed = self
            .directory
            .accounts
            .get(&current.email.to_lowercase())
            .map(|account| account.identity.clone());

        match refreshed {
            Some(identity) => {
                self.announce(identity);
                Ok(())
            }
            None => {
                // Account deleted on the provider side.
                self.signal.send_replace(AuthSignal::SignedOut);
                Err(AuthProviderError::UserNotFound)
            }
        }
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}
