//! Error types for the session layer

use fieldform_store::{CacheError, InstanceStoreError, SavepointError};
use std::path::PathBuf;

/// Failures inside the external form engine
///
/// The engine itself is out of scope; these carry its reported failure text
/// across the seam.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The form definition XML could not be parsed
    #[error("form definition could not be parsed: {0}")]
    Parse(String),

    /// A saved instance document could not be decoded
    #[error("saved instance could not be decoded: {0}")]
    Deserialize(String),

    /// Any other engine-side failure
    #[error("form engine failure: {0}")]
    Other(String),
}

/// Failure persisting an extracted entity
#[derive(Debug, thiserror::Error)]
#[error("entity save failed for dataset {dataset}: {message}")]
pub struct EntityError {
    /// Dataset the entity belongs to
    pub dataset: String,
    /// Collaborator-reported failure text
    pub message: String,
}

/// Errors from [`SessionPipeline`](crate::SessionPipeline)
///
/// Validation failure is deliberately *not* here: it is an expected outcome,
/// reported as data (`Invalid` status and `Ok(None)` from finalize).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The form engine failed to parse, merge, serialize, or finalize
    #[error("form engine error: {0}")]
    Engine(#[from] EngineError),

    /// The instance repository rejected or failed an operation
    #[error("instance store error: {0}")]
    Store(#[from] InstanceStoreError),

    /// The savepoint registry failed an operation
    #[error("savepoint store error: {0}")]
    Savepoints(#[from] SavepointError),

    /// The definition cache could not be set up
    ///
    /// Read/write failures during normal operation degrade to cache misses
    /// and never surface here; only construction propagates.
    #[error("definition cache error: {0}")]
    Cache(#[from] CacheError),

    /// An extracted entity could not be persisted
    #[error("entity sink error: {0}")]
    Entities(#[from] EntityError),

    /// A session-creating operation needed a definition that is unavailable
    #[error("no usable form definition for {form_id} version {version:?}")]
    FormUnavailable {
        /// Form identifier that failed to resolve
        form_id: String,
        /// Requested version
        version: Option<String>,
    },

    /// Finalize was called for an instance file with no draft row
    #[error("no draft row for instance file {path}")]
    DraftNotFound {
        /// The bound instance file path
        path: PathBuf,
    },

    /// Filesystem failure on a session-owned file
    #[error("i/o failure at {path}: {source}")]
    Io {
        /// Path the operation failed on
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
}
