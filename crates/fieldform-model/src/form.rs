//! Form definition references
//!
//! A [`FormRecord`] points at a form definition owned by the forms
//! collaborator. The core never parses or mutates the definition itself; it
//! only needs the source file, the media directory, and the auto-send flag.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Reference to an externally owned form definition
///
/// Identified by `(form_id, version)`. The referenced XML file and media
/// directory stay under the forms collaborator's control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormRecord {
    /// Row id in the forms repository
    db_id: i64,

    /// Stable form identifier
    form_id: String,

    /// Form version, if the definition declares one
    version: Option<String>,

    /// Path to the form definition XML
    form_file_path: PathBuf,

    /// Directory holding the form's media attachments
    form_media_path: PathBuf,

    /// Whether finalized instances should be sent automatically
    auto_send: Option<bool>,
}

impl FormRecord {
    /// Create a form reference
    #[inline]
    #[must_use]
    pub fn new(
        db_id: i64,
        form_id: impl Into<String>,
        version: Option<String>,
        form_file_path: impl Into<PathBuf>,
        form_media_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            db_id,
            form_id: form_id.into(),
            version,
            form_file_path: form_file_path.into(),
            form_media_path: form_media_path.into(),
            auto_send: None,
        }
    }

    /// Set the auto-send flag
    #[inline]
    #[must_use]
    pub fn with_auto_send(mut self, auto_send: bool) -> Self {
        self.auto_send = Some(auto_send);
        self
    }

    /// Row id in the forms repository
    #[inline]
    #[must_use]
    pub fn db_id(&self) -> i64 {
        self.db_id
    }

    /// Stable form identifier
    #[inline]
    #[must_use]
    pub fn form_id(&self) -> &str {
        &self.form_id
    }

    /// Declared version, if any
    #[inline]
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Path to the form definition XML
    #[inline]
    #[must_use]
    pub fn form_file_path(&self) -> &Path {
        &self.form_file_path
    }

    /// Directory holding the form's media attachments
    #[inline]
    #[must_use]
    pub fn form_media_path(&self) -> &Path {
        &self.form_media_path
    }

    /// Auto-send flag, if configured on the form
    #[inline]
    #[must_use]
    pub fn auto_send(&self) -> Option<bool> {
        self.auto_send
    }
}
