//! Error types for the store layer
//!
//! Integrity violations are fatal and always propagated; they indicate caller
//! logic errors and are never retried or swallowed. I/O and corruption errors
//! carry the offending path so callers can report something actionable.

use std::path::PathBuf;

/// Referential-integrity violations in the instance repository
///
/// Raised before any write takes effect; the store is unchanged whenever one
/// of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    /// `edit_of` and `edit_number` must be set together
    #[error("edit_of and edit_number must both be set or both be absent")]
    EditFieldsMismatch,

    /// `edit_of` names a row that does not exist
    #[error("edit_of {referent} does not reference an existing instance")]
    DanglingEditOf {
        /// The missing referent row id
        referent: i64,
    },

    /// An instance cannot be an edit of itself
    #[error("instance {db_id} cannot be an edit of itself")]
    SelfEdit {
        /// The offending row id
        db_id: i64,
    },

    /// A base instance cannot be hard-deleted while edits point at it
    #[error("instance {db_id} still has {edit_count} edit(s) pointing at it")]
    EditsExist {
        /// The row id that was asked to be deleted
        db_id: i64,
        /// How many rows reference it through `edit_of`
        edit_count: usize,
    },
}

/// Errors from [`InstanceStore`](crate::InstanceStore)
#[derive(Debug, thiserror::Error)]
pub enum InstanceStoreError {
    /// Referential-integrity violation; fatal, no partial write occurred
    #[error("integrity violation: {0}")]
    Integrity(#[from] IntegrityError),

    /// An update named a row id that is not in the store
    #[error("no instance row with id {db_id}")]
    RowNotFound {
        /// The unknown row id
        db_id: i64,
    },

    /// Filesystem failure while persisting the store or removing a directory
    #[error("i/o failure at {path}: {source}")]
    Io {
        /// Path the operation failed on
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The persisted store document could not be decoded
    #[error("store document corrupt at {path}: {source}")]
    Corrupt {
        /// Path of the unreadable document
        path: PathBuf,
        /// Underlying decode error
        source: serde_json::Error,
    },

    /// The store document could not be encoded for persistence
    #[error("store document encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors from [`SavepointStore`](crate::SavepointStore)
#[derive(Debug, thiserror::Error)]
pub enum SavepointError {
    /// Filesystem failure while persisting the registry or removing a file
    #[error("i/o failure at {path}: {source}")]
    Io {
        /// Path the operation failed on
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The persisted registry document could not be decoded
    #[error("savepoint registry corrupt at {path}: {source}")]
    Corrupt {
        /// Path of the unreadable document
        path: PathBuf,
        /// Underlying decode error
        source: serde_json::Error,
    },

    /// The registry document could not be encoded for persistence
    #[error("savepoint registry encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors from [`FormDefinitionCache`](crate::FormDefinitionCache)
///
/// Always recoverable: the cache is an optimization, and callers degrade to
/// parsing the definition fresh when one of these comes back.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Filesystem failure reading the source file or writing an artifact
    #[error("cache i/o failure at {path}: {source}")]
    Io {
        /// Path the operation failed on
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// A definition could not be encoded for the disk artifact
    #[error("cache artifact encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}
