//! Error types for the stores and the picker.
//!
//! Store operations return `StoreError`; the picker wraps store failures in
//! `PickError` so callers can tell a bad request apart from a broken scan.

use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the user and source stores.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The key (a source URL, or an email) is already registered.
    #[error("already exists")]
    AlreadyExists,

    /// The addressed user has no record set.
    #[error("user not found")]
    UserNotFound,

    /// No record with the given id exists for the user.
    #[error("record not found")]
    RecordNotFound,

    /// A snapshot file exists but could not be opened or read.
    #[error("cannot read snapshot {}: {}", .path.display(), .source)]
    SnapshotIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A snapshot file exists but does not parse as the expected JSON shape.
    #[error("cannot parse snapshot {}: {}", .path.display(), .source)]
    SnapshotParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures raised by [`crate::picker::Picker::pick`].
#[derive(Error, Debug)]
pub enum PickError {
    /// The requested count was smaller than 1.
    #[error("count is smaller than 1")]
    InvalidCount,

    /// The paginated scan of the user's records failed.
    #[error("failed to retrieve source records")]
    Retrieval(#[source] StoreError),

    /// Writing a selected record's hit count back failed; the pick is
    /// aborted rather than silently losing the increment.
    #[error("failed to record the pick")]
    Update(#[source] StoreError),
}
