//! Role record storage.
//!
//! The hosted document database is an external collaborator; this trait is
//! the seam. `MongoRoleStore` (see `database`) talks to the real thing,
//! `MemoryRoleStore` backs local runs and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::watch;

use crate::models::RoleRecord;

#[derive(Debug, Error)]
pub enum RoleStoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Role store unavailable")]
    Unavailable,
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Point read of `userRoles/{uid}`.
    async fn find_role(&self, uid: &str) -> Result<Option<RoleRecord>, RoleStoreError>;

    /// Create or replace `userRoles/{uid}` with the given role string.
    async fn set_role(&self, uid: &str, role: &str) -> Result<(), RoleStoreError>;

    /// Every stored record, ordered by uid.
    async fn list_roles(&self) -> Result<Vec<RoleRecord>, RoleStoreError>;

    async fn health_check(&self) -> Result<(), RoleStoreError>;

    fn store_name(&self) -> &'static str;
}

/// In-process role store with failure and latency injection.
pub struct MemoryRoleStore {
    records: DashMap<String, RoleRecord>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    reads_paused: watch::Sender<bool>,
    read_count: AtomicUsize,
}

impl MemoryRoleStore {
    pub fn new() -> Self {
        let (reads_paused, _) = watch::channel(false);
        Self {
            records: DashMap::new(),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            reads_paused,
            read_count: AtomicUsize::new(0),
        }
    }

    pub fn with_role(self, uid: &str, role: &str) -> Self {
        self.records
            .insert(uid.to_string(), RoleRecord::new(uid, role));
        self
    }

    /// Store a record as-is, including one without a role field.
    pub fn insert_record(&self, record: RoleRecord) {
        self.records.insert(record.uid.clone(), record);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Hold every lookup at its start until [`resume_reads`] is called.
    ///
    /// [`resume_reads`]: MemoryRoleStore::resume_reads
    pub fn pause_reads(&self) {
        self.reads_paused.send_replace(true);
    }

    pub fn resume_reads(&self) {
        self.reads_paused.send_replace(false);
    }

    /// Number of lookups started so far.
    pub fn read_count(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }

    pub fn get(&self, uid: &str) -> Option<RoleRecord> {
        self.records.get(uid).map(|entry| entry.value().clone())
    }
}

impl Default for MemoryRoleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoleStore for MemoryRoleStore {
    async fn find_role(&self, uid: &str) -> Result<Option<RoleRecord>, RoleStoreError> {
        self.read_count.fetch_add(1, Ordering::SeqCst);

        let mut paused = self.reads_paused.subscribe();
        // The sender is owned by `self`, so this only errors if the store is
        // being dropped mid-read.
        let _ = paused.wait_for(|paused| !*paused).await;

        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RoleStoreError::Unavailable);
        }
        Ok(self.get(uid))
    }

    async fn set_role(&self, uid: &str, role: &str) -> Result<(), RoleStoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RoleStoreError::Unavailable);
        }
        self.records
            .insert(uid.to_string(), RoleRecord::new(uid, role));
        Ok(())
    }

    async fn list_roles(&self) -> Result<Vec<RoleRecord>, RoleStoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RoleStoreError::Unavailable);
        }
        let mut records: Vec<RoleRecord> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.uid.cmp(&b.uid));
        Ok(records)
    }

    async fn health_check(&self) -> Result<(), RoleStoreError> {
        Ok(())
    }

    fn store_name(&self) -> &'static str {
        "memory"
    }
}
