//! # Stores
//!
//! In-memory, mutex-guarded collections with lazy periodic persistence.
//! Two instances exist per process: the user directory ([`users::UserStore`])
//! and the per-user source collection ([`sources::SourceStore`]). Each keeps
//! its authoritative state in memory, marks itself dirty on mutation, and
//! lets a background loop flush a JSON snapshot to disk on a timer.

pub mod sources;
pub mod users;

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use sources::SourceStore;
pub use users::UserStore;

/// One tracked URL and its selection metadata for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medium {
    pub url: String,
    pub id: String,
    /// Opaque content fingerprint, set by callers. The store never computes it.
    #[serde(default)]
    pub hash: String,
    /// Priority weight; scales the hit count in the pick score.
    pub multiplier: f32,
    pub created_date: DateTime<Utc>,
    pub modified_date: DateTime<Utc>,
    /// Times this record has been returned by a pick.
    pub hit: u64,
    pub user_id: String,
}

/// The `{id, url}` projection handed to API consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub id: String,
    pub url: String,
}

impl From<&Medium> for SourceRef {
    fn from(m: &Medium) -> Self {
        Self {
            id: m.id.clone(),
            url: m.url.clone(),
        }
    }
}

/// Load a JSON snapshot at `path`, if one exists.
///
/// A missing file is not an error (the store starts empty); a file that
/// cannot be read or parsed is, so a caller never starts on corrupt state.
pub(crate) fn load_snapshot<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| StoreError::SnapshotIo {
        path: path.to_path_buf(),
        source,
    })?;
    let data = serde_json::from_str(&raw).map_err(|source| StoreError::SnapshotParse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(data))
}

/// Serialize `data` to `path`. Best-effort: the caller logs failures and
/// leaves the dirty flag set so the next tick retries.
pub(crate) fn write_snapshot<T: Serialize>(path: &Path, data: &T) -> anyhow::Result<()> {
    let raw = serde_json::to_vec(data)?;
    fs::write(path, raw)?;
    Ok(())
}
