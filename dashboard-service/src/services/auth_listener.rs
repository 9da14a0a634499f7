//! Bridges auth provider notifications into the session.
//!
//! One listener runs per browser session. For every identity it sees it
//! starts a single role lookup; a newer notification supersedes (and
//! aborts) the lookup in flight, and the session's generation check drops
//! any result that still manages to land late.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};

use super::metrics::{record_auth_event, record_role_lookup};
use super::providers::{AuthProvider, AuthSignal};
use super::role_store::RoleStore;
use super::session::SessionContext;
use crate::models::{resolve_record, Identity, Role};

type Inflight = Arc<Mutex<Option<AbortHandle>>>;

pub struct AuthListener {
    session: SessionContext,
    task: JoinHandle<()>,
    inflight: Inflight,
    detached: AtomicBool,
}

impl AuthListener {
    /// Subscribe to `provider` and start keeping `session` in sync with it.
    /// Must be called from within a Tokio runtime.
    pub fn init(
        provider: Arc<dyn AuthProvider>,
        roles: Arc<dyn RoleStore>,
        session: SessionContext,
    ) -> Self {
        let signals = provider.subscribe();
        let inflight: Inflight = Arc::new(Mutex::new(None));

        tracing::debug!(
            provider = provider.provider_name(),
            role_store = roles.store_name(),
            "Auth listener started"
        );

        let task = tokio::spawn(listen(signals, roles, session.clone(), inflight.clone()));

        Self {
            session,
            task,
            inflight,
            detached: AtomicBool::new(false),
        }
    }

    /// Stop listening. The session is detached first, so a notification
    /// the task is still handling cannot write anything; lookups in flight
    /// are cancelled and the session keeps its last value. Idempotent.
    pub fn teardown(&self) {
        if self.detached.swap(true, Ordering::SeqCst) {
            return;
        }
        self.session.detach();
        self.task.abort();
        abort_inflight(&self.inflight);
        tracing::debug!("Auth listener stopped");
    }
}

impl Drop for AuthListener {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn abort_inflight(inflight: &Inflight) {
    if let Ok(mut slot) = inflight.lock() {
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

async fn listen(
    mut signals: watch::Receiver<AuthSignal>,
    roles: Arc<dyn RoleStore>,
    session: SessionContext,
    inflight: Inflight,
) {
    loop {
        let signal = signals.borrow_and_update().clone();

        match signal {
            AuthSignal::Pending => {
                tracing::debug!("Auth provider has not settled yet");
            }
            AuthSignal::SignedOut => {
                abort_inflight(&inflight);
                if session.apply_identity(None).is_some() {
                    record_auth_event("signed_out");
                    tracing::info!("Session cleared");
                }
            }
            AuthSignal::SignedIn(identity) => {
                start_lookup(identity, &roles, &session, &inflight);
            }
        }

        if session.is_detached() {
            break;
        }
        if signals.changed().await.is_err() {
            tracing::warn!("Auth provider dropped its notification channel");
            break;
        }
    }
}

fn start_lookup(
    identity: Identity,
    roles: &Arc<dyn RoleStore>,
    session: &SessionContext,
    inflight: &Inflight,
) {
    let uid = identity.uid.clone();
    let Some(generation) = session.apply_identity(Some(identity)) else {
        tracing::debug!(uid = %uid, "Listener detached, ignoring identity change");
        return;
    };
    record_auth_event("signed_in");
    tracing::info!(uid = %uid, generation, "Identity changed, fetching role");

    let lookup = tokio::spawn(fetch_role(roles.clone(), session.clone(), uid, generation));

    if let Ok(mut slot) = inflight.lock() {
        if let Some(previous) = slot.replace(lookup.abort_handle()) {
            previous.abort();
        }
    }
}

async fn fetch_role(
    roles: Arc<dyn RoleStore>,
    session: SessionContext,
    uid: String,
    generation: u64,
) {
    let started = Instant::now();

    let (role, outcome) = match roles.find_role(&uid).await {
        Ok(record) => {
            let outcome = if record.is_some() { "found" } else { "missing" };
            (resolve_record(record.as_ref()), outcome)
        }
        Err(e) => {
            tracing::warn!(uid = %uid, error = %e, "Role lookup failed, defaulting to user");
            (Role::DEFAULT, "failed")
        }
    };

    if session.apply_role(generation, role.clone()) {
        tracing::info!(uid = %uid, role = %role, "Role resolved");
        record_role_lookup(outcome, started.elapsed());
    } else {
        tracing::debug!(uid = %uid, generation, "Discarding role for superseded identity");
        record_role_lookup("superseded", started.elapsed());
    }
}
