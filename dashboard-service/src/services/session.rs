//! Session state container.
//!
//! One `SessionContext` exists per browser session and is shared by that
//! browser's auth listener (the only writer) and the route guards (readers). Writes go
//! through a `watch` channel so they are serialized and observable.

use std::sync::Arc;
use tokio::sync::watch;

use crate::models::{Identity, Role, Session};

/// Session plus the subscription generation that produced it.
///
/// Every identity change and every detach bumps the generation; role
/// lookups carry the generation they were started under and are dropped
/// if it has moved on. Once `detached` is set no write lands again.
#[derive(Debug, Clone)]
struct Tracked {
    session: Session,
    generation: u64,
    detached: bool,
}

#[derive(Clone)]
pub struct SessionContext {
    state: Arc<watch::Sender<Tracked>>,
}

impl SessionContext {
    pub fn new() -> Self {
        let (state, _) = watch::channel(Tracked {
            session: Session::initial(),
            generation: 0,
            detached: false,
        });
        Self {
            state: Arc::new(state),
        }
    }

    /// Current session, cloned out of the container.
    pub fn snapshot(&self) -> Session {
        self.state.borrow().session.clone()
    }

    pub fn generation(&self) -> u64 {
        self.state.borrow().generation
    }

    /// Record an identity change reported by the auth provider.
    ///
    /// Always clears `loading`. A different (or absent) identity clears the
    /// role; a repeat notification for the same uid keeps it until the new
    /// lookup lands. Returns the generation role lookups must present, or
    /// `None` if the context has been detached and nothing was written.
    pub fn apply_identity(&self, identity: Option<Identity>) -> Option<u64> {
        let mut generation = None;
        self.state.send_if_modified(|tracked| {
            if tracked.detached {
                return false;
            }
            tracked.generation += 1;
            generation = Some(tracked.generation);

            let same_uid = match (&tracked.session.identity, &identity) {
                (Some(current), Some(next)) => current.uid == next.uid,
                _ => false,
            };
            if !same_uid {
                tracked.session.role = None;
            }
            tracked.session.identity = identity;
            tracked.session.loading = false;
            true
        });
        generation
    }

    /// Write a resolved role if `generation` is still current and an
    /// identity is present. Returns whether the write happened.
    pub fn apply_role(&self, generation: u64, role: Role) -> bool {
        let mut applied = false;
        self.state.send_if_modified(|tracked| {
            if tracked.detached
                || tracked.generation != generation
                || tracked.session.identity.is_none()
            {
                return false;
            }
            applied = true;
            if tracked.session.role.as_ref() == Some(&role) {
                return false;
            }
            tracked.session.role = Some(role);
            true
        });
        applied
    }

    /// Refuse every later write and invalidate outstanding role lookups
    /// without touching the session. Used on listener teardown.
    pub fn detach(&self) {
        self.state.send_if_modified(|tracked| {
            tracked.generation += 1;
            tracked.detached = true;
            false
        });
    }

    pub fn is_detached(&self) -> bool {
        self.state.borrow().detached
    }

    /// Stream of session snapshots, starting after the current one.
    pub fn changes(&self) -> SessionChanges {
        SessionChanges {
            receiver: self.state.subscribe(),
        }
    }

    /// Wait until the session satisfies `predicate` and return it.
    pub async fn wait_until<F>(&self, mut predicate: F) -> Session
    where
        F: FnMut(&Session) -> bool,
    {
        let mut receiver = self.state.subscribe();
        let session = match receiver.wait_for(|tracked| predicate(&tracked.session)).await {
            Ok(tracked) => tracked.session.clone(),
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => self.snapshot(),
        };
        session
    }

    /// Wait until the session has moved past `generation`, i.e. the
    /// listener has applied at least one newer notification.
    pub async fn wait_past(&self, generation: u64) -> Session {
        let mut receiver = self.state.subscribe();
        let session = match receiver.wait_for(|tracked| tracked.generation > generation).await {
            Ok(tracked) => tracked.session.clone(),
            Err(_) => self.snapshot(),
        };
        session
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SessionChanges {
    receiver: watch::Receiver<Tracked>,
}

impl SessionChanges {
    /// Next session value, or `None` once every context handle is gone.
    pub async fn next(&mut self) -> Option<Session> {
        self.receiver.changed().await.ok()?;
        let session = self.receiver.borrow_and_update().session.clone();
        Some(session)
    }
}
