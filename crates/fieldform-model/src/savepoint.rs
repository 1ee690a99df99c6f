//! Savepoint records
//!
//! A [`Savepoint`] points at a snapshot file written during a session that is
//! newer than the last flush of the bound instance file. After abnormal
//! termination it is the evidence that unsaved work exists and where to find
//! it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Pointer to a recovery snapshot for one `(form, instance)` pair
///
/// At most one savepoint exists per `(form_db_id, instance_db_id)` key; the
/// store enforces first-writer-wins on that key. `instance_db_id` is absent
/// for sessions on a blank form that has never been saved as a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Savepoint {
    form_db_id: i64,
    instance_db_id: Option<i64>,
    savepoint_file_path: PathBuf,
    instance_file_path: PathBuf,
}

impl Savepoint {
    /// Create a savepoint record
    #[inline]
    #[must_use]
    pub fn new(
        form_db_id: i64,
        instance_db_id: Option<i64>,
        savepoint_file_path: impl Into<PathBuf>,
        instance_file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            form_db_id,
            instance_db_id,
            savepoint_file_path: savepoint_file_path.into(),
            instance_file_path: instance_file_path.into(),
        }
    }

    /// Row id of the form this savepoint belongs to
    #[inline]
    #[must_use]
    pub fn form_db_id(&self) -> i64 {
        self.form_db_id
    }

    /// Row id of the draft instance, if one was ever saved
    #[inline]
    #[must_use]
    pub fn instance_db_id(&self) -> Option<i64> {
        self.instance_db_id
    }

    /// Path to the snapshot file
    #[inline]
    #[must_use]
    pub fn savepoint_file_path(&self) -> &Path {
        &self.savepoint_file_path
    }

    /// Path to the instance file the snapshot shadows
    #[inline]
    #[must_use]
    pub fn instance_file_path(&self) -> &Path {
        &self.instance_file_path
    }

    /// Key identifying this savepoint's session
    #[inline]
    #[must_use]
    pub fn key(&self) -> (i64, Option<i64>) {
        (self.form_db_id, self.instance_db_id)
    }
}
