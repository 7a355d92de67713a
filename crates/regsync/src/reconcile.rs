use chrono::NaiveDateTime;
use regsync_core::{local_now, ChatId, Snapshot, StateValue, SyncConfig, UserRecord};
use regsync_storage::{MergeError, MergeOutcome, RegistryStore, StorageError};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::lock::{LockError, SyncLock};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
    #[error("schema initialization failed: {0}")]
    SchemaInit(#[source] StorageError),
    #[error("failed to close store: {0}")]
    Close(#[source] StorageError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub users_inserted: usize,
    pub users_updated: usize,
    pub users_failed: usize,
    pub states_inserted: usize,
    pub states_updated: usize,
    pub states_failed: usize,
}

impl SyncReport {
    pub fn applied(&self) -> usize {
        self.users_inserted + self.users_updated + self.states_inserted + self.states_updated
    }

    pub fn failed(&self) -> usize {
        self.users_failed + self.states_failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another pass holds the lock; nothing was read or written.
    AlreadyRunning,
    /// Both snapshots were empty or absent; the store was not opened.
    NothingToSync,
    Completed(SyncReport),
}

/// One reconciliation pass over the users and states snapshots.
pub struct Reconciler {
    config: SyncConfig,
}

impl Reconciler {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn run(&self) -> Result<SyncOutcome, SyncError> {
        let Some(lock) =
            SyncLock::try_acquire(&self.config.lock_path, self.config.lock_stale_after)?
        else {
            info!(
                lock = %self.config.lock_path.display(),
                "another reconciliation pass is running; skipping"
            );
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let result = self.sync();
        let released = lock.release();

        match (result, released) {
            (Err(err), released) => {
                if let Err(release_err) = released {
                    warn!(error = %release_err, "failed to release lock after failed pass");
                }
                Err(err)
            }
            (Ok(_), Err(release_err)) => Err(release_err.into()),
            (Ok(outcome), Ok(())) => Ok(outcome),
        }
    }

    fn sync(&self) -> Result<SyncOutcome, SyncError> {
        let users = Snapshot::load(&self.config.users_path);
        let states = Snapshot::load(&self.config.states_path);
        debug!(users = users.len(), states = states.len(), "snapshots loaded");

        if users.is_empty() && states.is_empty() {
            debug!("both snapshots empty; store left untouched");
            return Ok(SyncOutcome::NothingToSync);
        }

        let mut store = RegistryStore::open(&self.config.db_path).map_err(SyncError::SchemaInit)?;
        let report = apply_snapshots(&mut store, &users, &states, local_now);
        store.close().map_err(SyncError::Close)?;

        info!(
            users_inserted = report.users_inserted,
            users_updated = report.users_updated,
            users_failed = report.users_failed,
            states_inserted = report.states_inserted,
            states_updated = report.states_updated,
            states_failed = report.states_failed,
            "reconciliation pass complete"
        );
        Ok(SyncOutcome::Completed(report))
    }
}

/// Applies every user entry, then every state entry, in document order.
/// A failing entry is logged and counted; it never stops the pass.
pub fn apply_snapshots(
    store: &mut RegistryStore,
    users: &Snapshot,
    states: &Snapshot,
    clock: impl Fn() -> NaiveDateTime,
) -> SyncReport {
    let mut report = SyncReport::default();

    for (key, value) in users.iter() {
        match sync_user_entry(store, key, value, clock()) {
            Ok(MergeOutcome::Inserted) => report.users_inserted += 1,
            Ok(MergeOutcome::Updated) => report.users_updated += 1,
            Err(err) => {
                warn!(chat_id = key, error = %err, "user record skipped");
                report.users_failed += 1;
            }
        }
    }

    for (key, value) in states.iter() {
        match sync_state_entry(store, key, value, clock()) {
            Ok(MergeOutcome::Inserted) => report.states_inserted += 1,
            Ok(MergeOutcome::Updated) => report.states_updated += 1,
            Err(err) => {
                warn!(chat_id = key, error = %err, "state record skipped");
                report.states_failed += 1;
            }
        }
    }

    report
}

pub fn sync_user_entry(
    store: &mut RegistryStore,
    key: &str,
    value: &Value,
    now: NaiveDateTime,
) -> Result<MergeOutcome, MergeError> {
    let chat_id: ChatId = key.parse()?;
    let record = UserRecord::from_value(value)?;
    store.merge_user(chat_id, &record, now)
}

pub fn sync_state_entry(
    store: &mut RegistryStore,
    key: &str,
    value: &Value,
    now: NaiveDateTime,
) -> Result<MergeOutcome, MergeError> {
    let chat_id: ChatId = key.parse()?;
    let state = StateValue::from_value(value)?;
    store.merge_state(chat_id, &state, now)
}
