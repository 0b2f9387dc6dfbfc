//! # Source Store
//!
//! The authoritative collection of every user's reading sources, keyed
//! `user id → URL → Medium`. All operations serialize behind one mutex;
//! mutations flip a dirty flag and a background loop flushes the whole
//! collection to a JSON snapshot when the flag is set.
//!
//! Pagination walks the per-user map in URL order, which is deterministic
//! across calls. A scan that races a mutation may still skip or repeat
//! records relative to a frozen view; scans take no snapshot.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio::sync::watch;
use uuid::Uuid;

use super::{load_snapshot, write_snapshot, Medium, SourceRef};
use crate::error::StoreError;

type UserMedia = BTreeMap<String, BTreeMap<String, Medium>>;

/// Mutex-guarded source collection with lazy snapshot persistence.
pub struct SourceStore {
    path: PathBuf,
    page_size: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    media: UserMedia,
    dirty: bool,
}

impl SourceStore {
    /// Open the store, loading the snapshot at `path` if one exists.
    ///
    /// An absent snapshot starts the store empty; a present but unreadable
    /// or unparsable one is fatal.
    pub fn open(path: impl Into<PathBuf>, page_size: usize) -> Result<Self, StoreError> {
        let path = path.into();
        let media = load_snapshot::<UserMedia>(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            page_size,
            inner: Mutex::new(Inner {
                media,
                dirty: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("source store mutex poisoned")
    }

    /// Register a new source URL for `user_id` and return the created record.
    ///
    /// New records start with `hit = 0` and `multiplier = 1.0` so fresh
    /// sources compete on hits alone until a caller reweights them.
    pub fn add_source(&self, user_id: &str, url: &str) -> Result<Medium, StoreError> {
        let mut inner = self.lock();
        let set = inner.media.entry(user_id.to_string()).or_default();
        if set.contains_key(url) {
            return Err(StoreError::AlreadyExists);
        }

        let now = Utc::now();
        let record = Medium {
            url: url.to_string(),
            id: Uuid::new_v4().to_string(),
            hash: String::new(),
            multiplier: 1.0,
            created_date: now,
            modified_date: now,
            hit: 0,
            user_id: user_id.to_string(),
        };
        set.insert(url.to_string(), record.clone());
        inner.dirty = true;
        Ok(record)
    }

    /// One page of `{id, url}` projections for `user_id`.
    ///
    /// Returns an empty vec once `page` is past the end of the set.
    pub fn get_sources(&self, user_id: &str, page: usize) -> Result<Vec<SourceRef>, StoreError> {
        let inner = self.lock();
        let set = inner.media.get(user_id).ok_or(StoreError::UserNotFound)?;
        Ok(set
            .values()
            .skip(page * self.page_size)
            .take(self.page_size)
            .map(SourceRef::from)
            .collect())
    }

    /// One page of full records for `user_id`. Same contract as
    /// [`Self::get_sources`]; used by the picker, not exposed over HTTP.
    pub fn get_all_source_data(
        &self,
        user_id: &str,
        page: usize,
    ) -> Result<Vec<Medium>, StoreError> {
        let inner = self.lock();
        let set = inner.media.get(user_id).ok_or(StoreError::UserNotFound)?;
        Ok(set
            .values()
            .skip(page * self.page_size)
            .take(self.page_size)
            .cloned()
            .collect())
    }

    /// Fetch a single record by its stable id.
    pub fn get_source(&self, user_id: &str, source_id: &str) -> Result<Medium, StoreError> {
        let inner = self.lock();
        let set = inner.media.get(user_id).ok_or(StoreError::UserNotFound)?;
        set.values()
            .find(|m| m.id == source_id)
            .cloned()
            .ok_or(StoreError::RecordNotFound)
    }

    /// Replace the stored record matching `record.id` within `user_id`'s set.
    ///
    /// The stored copy's `modified_date` is set to now. If the URL changed,
    /// the record is re-keyed; a URL collision with another record fails
    /// with `AlreadyExists`.
    pub fn update_source(&self, user_id: &str, record: Medium) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let set = inner.media.get_mut(user_id).ok_or(StoreError::UserNotFound)?;
        let old_url = set
            .values()
            .find(|m| m.id == record.id)
            .map(|m| m.url.clone())
            .ok_or(StoreError::RecordNotFound)?;
        if record.url != old_url && set.contains_key(&record.url) {
            return Err(StoreError::AlreadyExists);
        }

        let mut stored = record;
        stored.modified_date = Utc::now();
        set.remove(&old_url);
        set.insert(stored.url.clone(), stored);
        inner.dirty = true;
        Ok(())
    }

    /// Remove the record matching `source_id` from `user_id`'s set.
    ///
    /// The user's (possibly now empty) set stays registered, so "no sources
    /// yet" remains distinguishable from "unknown user".
    pub fn delete_source(&self, user_id: &str, source_id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let set = inner.media.get_mut(user_id).ok_or(StoreError::UserNotFound)?;
        let url = set
            .values()
            .find(|m| m.id == source_id)
            .map(|m| m.url.clone())
            .ok_or(StoreError::RecordNotFound)?;
        set.remove(&url);
        inner.dirty = true;
        Ok(())
    }

    /// Flush the collection to disk if anything changed since the last write.
    ///
    /// A write failure is logged and leaves the dirty flag set; the next
    /// tick retries. In-memory state stays authoritative either way.
    pub fn sync_once(&self) {
        let mut inner = self.lock();
        if !inner.dirty {
            return;
        }
        match write_snapshot(&self.path, &inner.media) {
            Ok(()) => {
                inner.dirty = false;
                counter!("source_snapshot_writes_total").increment(1);
            }
            Err(error) => {
                tracing::warn!(
                    target: "store",
                    %error,
                    path = %self.path.display(),
                    "source snapshot write failed"
                );
            }
        }
    }

    /// Timer-driven persistence loop. Runs [`Self::sync_once`] on every tick
    /// and exits cleanly when `shutdown` fires.
    pub async fn run_sync_loop(&self, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    tracing::info!(target: "store", "source sync loop stopped");
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

    fn store() -> (tempfile::TempDir, SourceStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let s = SourceStore::open(dir.path().join("sources.json"), 5).expect("open");
        (dir, s)
    }

    #[test]
    fn add_twice_conflicts() {
        let (_dir, s) = store();
        s.add_source("u1", "https://example.com/a").unwrap();
        s.add_source("u1", "https://example.com/b").unwrap();
        let err = s.add_source("u1", "https://example.com/a").unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists));
    }

    #[test]
    fn new_record_defaults() {
        let (_dir, s) = store();
        let m = s.add_source("u1", "https://example.com/a").unwrap();
        assert_eq!(m.hit, 0);
        assert_eq!(m.multiplier, 1.0);
        assert_eq!(m.user_id, "u1");
        assert!(!m.id.is_empty());
    }

    #[test]
    fn read_reflects_unsynced_write() {
        let (_dir, s) = store();
        let added = s.add_source("u1", "https://example.com/a").unwrap();
        let page = s.get_sources("u1", 0).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, added.id);
    }

    #[test]
    fn unknown_user_is_an_error_empty_page_is_not() {
        let (_dir, s) = store();
        assert!(matches!(
            s.get_sources("nobody", 0).unwrap_err(),
            StoreError::UserNotFound
        ));

        s.add_source("u1", "https://example.com/a").unwrap();
        assert!(s.get_sources("u1", 3).unwrap().is_empty());
    }

    #[test]
    fn pagination_drains_every_record_once() {
        let (_dir, s) = store();
        for i in 0..20 {
            s.add_source("u1", &format!("https://example.com/{i}")).unwrap();
        }

        let mut got = Vec::new();
        let mut page = 0;
        loop {
            let batch = s.get_all_source_data("u1", page).unwrap();
            if batch.is_empty() {
                break;
            }
            got.extend(batch);
            page += 1;
        }

        assert_eq!(got.len(), 20);
        assert_eq!(page, 4);
        got.sort_by(|a, b| a.id.cmp(&b.id));
        got.dedup_by(|a, b| a.id == b.id);
        assert_eq!(got.len(), 20);
    }

    #[test]
    fn delete_then_scan_never_sees_the_id() {
        let (_dir, s) = store();
        let a = s.add_source("u1", "https://example.com/a").unwrap();
        s.add_source("u1", "https://example.com/b").unwrap();

        s.delete_source("u1", &a.id).unwrap();
        let left = s.get_all_source_data("u1", 0).unwrap();
        assert!(left.iter().all(|m| m.id != a.id));

        assert!(matches!(
            s.delete_source("u1", &a.id).unwrap_err(),
            StoreError::RecordNotFound
        ));
        assert!(matches!(
            s.delete_source("ghost", &a.id).unwrap_err(),
            StoreError::UserNotFound
        ));
    }

    #[test]
    fn update_replaces_and_touches_modified_date() {
        let (_dir, s) = store();
        let mut m = s.add_source("u1", "https://example.com/a").unwrap();
        let before = m.modified_date;

        m.hit = 7;
        m.multiplier = 0.5;
        s.update_source("u1", m.clone()).unwrap();

        let stored = s.get_source("u1", &m.id).unwrap();
        assert_eq!(stored.hit, 7);
        assert_eq!(stored.multiplier, 0.5);
        assert!(stored.modified_date >= before);

        m.id = "no-such-id".into();
        assert!(matches!(
            s.update_source("u1", m).unwrap_err(),
            StoreError::RecordNotFound
        ));
    }

    #[test]
    fn update_rejects_url_collision() {
        let (_dir, s) = store();
        let mut a = s.add_source("u1", "https://example.com/a").unwrap();
        s.add_source("u1", "https://example.com/b").unwrap();

        a.url = "https://example.com/b".into();
        assert!(matches!(
            s.update_source("u1", a).unwrap_err(),
            StoreError::AlreadyExists
        ));
    }
}
