//! # User Store
//!
//! Identity directory mapping emails to opaque user ids and back. Same
//! construction, locking, and snapshot discipline as the source store,
//! with a flat bidirectional map instead of nested collections.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use super::{load_snapshot, write_snapshot};
use crate::error::StoreError;

/// Snapshot shape: both directions are persisted.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Directory {
    emails: BTreeMap<String, String>,
    users: BTreeMap<String, String>,
}

/// Mutex-guarded user directory with lazy snapshot persistence.
pub struct UserStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    directory: Directory,
    dirty: bool,
}

impl UserStore {
    /// Open the store, loading the snapshot at `path` if one exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let directory = load_snapshot::<Directory>(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            inner: Mutex::new(Inner {
                directory,
                dirty: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("user store mutex poisoned")
    }

    /// Register `email` and return the generated user id.
    pub fn create_user(&self, email: &str) -> Result<String, StoreError> {
        let mut inner = self.lock();
        if inner.directory.emails.contains_key(email) {
            return Err(StoreError::AlreadyExists);
        }

        let id = Uuid::new_v4().to_string();
        inner
            .directory
            .emails
            .insert(email.to_string(), id.clone());
        inner.directory.users.insert(id.clone(), email.to_string());
        inner.dirty = true;
        Ok(id)
    }

    /// Resolve `email` to the registered user id.
    pub fn lookup(&self, email: &str) -> Result<String, StoreError> {
        let inner = self.lock();
        inner
            .directory
            .emails
            .get(email)
            .cloned()
            .ok_or(StoreError::UserNotFound)
    }

    /// Existence check consulted before any source operation.
    pub fn is_user(&self, user_id: &str) -> bool {
        self.lock().directory.users.contains_key(user_id)
    }

    /// Flush the directory to disk if anything changed since the last write.
    pub fn sync_once(&self) {
        let mut inner = self.lock();
        if !inner.dirty {
            return;
        }
        match write_snapshot(&self.path, &inner.directory) {
            Ok(()) => {
                inner.dirty = false;
                counter!("user_snapshot_writes_total").increment(1);
            }
            Err(error) => {
                tracing::warn!(
                    target: "store",
                    %error,
                    path = %self.path.display(),
                    "user snapshot write failed"
                );
            }
        }
    }

    /// Timer-driven persistence loop; exits cleanly when `shutdown` fires.
    pub async fn run_sync_loop(&self, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    tracing::info!(target: "store", "user sync loop stopped");
                    return;
                }
            }
            self.sync_once();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, UserStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let s = UserStore::open(dir.path().join("users.json")).expect("open");
        (dir, s)
    }

    #[test]
    fn create_then_lookup_round_trips() {
        let (_dir, s) = store();
        let id = s.create_user("test@example.com").unwrap();
        assert!(!id.is_empty());
        assert_eq!(s.lookup("test@example.com").unwrap(), id);
        assert!(s.is_user(&id));
    }

    #[test]
    fn duplicate_email_conflicts() {
        let (_dir, s) = store();
        s.create_user("test@example.com").unwrap();
        assert!(matches!(
            s.create_user("test@example.com").unwrap_err(),
            StoreError::AlreadyExists
        ));
    }

    #[test]
    fn unknown_email_and_id_miss() {
        let (_dir, s) = store();
        assert!(matches!(
            s.lookup("nobody@example.com").unwrap_err(),
            StoreError::UserNotFound
        ));
        assert!(!s.is_user("no-such-id"));
    }
}
