//! Optional JSON mirror of the session for warm starts.
//!
//! The mirror is a hint only: what it restores is reported next to the live
//! session but never fed to the guards.

use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;

use super::session::SessionContext;
use crate::models::Session;

#[derive(Debug, Clone)]
pub struct SessionMirror {
    path: PathBuf,
}

impl SessionMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the last mirrored session. A missing or unreadable file yields
    /// `None`; the restored value never claims to be loading.
    pub async fn load(&self) -> Option<Session> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read session mirror");
                return None;
            }
        };

        match serde_json::from_slice::<Session>(&bytes) {
            Ok(mut session) => {
                session.loading = false;
                if session.identity.is_none() {
                    session.role = None;
                }
                Some(session)
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring malformed session mirror");
                None
            }
        }
    }

    pub async fn store(&self, session: &Session) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(session)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await
    }

    /// Write every session change to disk until the context goes away.
    pub fn spawn(self, session: SessionContext) -> JoinHandle<()> {
        let mut changes = session.changes();
        drop(session);

        tokio::spawn(async move {
            while let Some(snapshot) = changes.next().await {
                if snapshot.loading {
                    continue;
                }
                if let Err(e) = self.store(&snapshot).await {
                    tracing::warn!(path = %self.path.display(), error = %e, "Failed to write session mirror");
                }
            }
        })
    }
}
