//! Instance repository
//!
//! [`InstanceStore`] is the authoritative record of form-filling sessions:
//! status, lifecycle timestamps, edit-chain linkage, soft deletion. Rows live
//! in an ordered map behind a [`parking_lot::RwLock`] and every mutation
//! rewrites the backing JSON document atomically, so the disk copy is always
//! a complete, decodable snapshot.
//!
//! # Invariants
//! - `edit_of` and `edit_number` are both set or both absent on every row
//! - a non-null `edit_of` references an existing row and never the row itself
//! - a row cannot be hard-deleted while other rows reference it as their base
//! - `finalization_date` is stamped at most once per row
//!
//! All invariant checks run before any state (in memory or on disk) is
//! touched, and a failed persist rolls the in-memory change back, so callers
//! never observe a half-applied save.

use fieldform_model::{Clock, Instance, InstanceStatus};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{InstanceStoreError, IntegrityError};
use crate::fsutil;

/// How a row should be deleted
///
/// One tagged operation instead of two look-alike methods, so call sites
/// spell out whether the row survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Remove the row and its instance directory
    Hard,

    /// Tombstone the row (set `deleted_date`, clear geometry) and remove the
    /// instance directory; the row stays for auditability
    Soft,
}

/// Persisted shape of the store
#[derive(Debug, Serialize, Deserialize)]
struct Document {
    next_id: i64,
    rows: BTreeMap<i64, Instance>,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            next_id: 1,
            rows: BTreeMap::new(),
        }
    }
}

/// Embedded repository of [`Instance`] rows
///
/// Thread-safe; different instances may be mutated concurrently. The
/// single-writer-per-instance contract (no two sessions mutating the same
/// row and files at once) belongs to the caller.
pub struct InstanceStore {
    db_path: PathBuf,
    clock: Arc<dyn Clock>,
    inner: RwLock<Document>,
}

impl std::fmt::Debug for InstanceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl InstanceStore {
    /// Open the store at `db_path`, reloading any previously persisted rows.
    ///
    /// A missing document means a fresh store; an unreadable one is an error
    /// rather than silent data loss.
    ///
    /// # Errors
    /// Returns [`InstanceStoreError::Io`] on filesystem failure or
    /// [`InstanceStoreError::Corrupt`] when the document cannot be decoded.
    pub fn open(db_path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, InstanceStoreError> {
        let db_path = db_path.into();
        let doc = match fs::read(&db_path) {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|source| InstanceStoreError::Corrupt {
                    path: db_path.clone(),
                    source,
                })?
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Document::default(),
            Err(source) => {
                return Err(InstanceStoreError::Io {
                    path: db_path,
                    source,
                })
            }
        };

        Ok(Self {
            db_path,
            clock,
            inner: RwLock::new(doc),
        })
    }

    /// Insert or update a row.
    ///
    /// Absent `db_id` inserts and assigns a fresh id; present `db_id` updates
    /// the existing row in place. Absent status becomes
    /// [`InstanceStatus::Incomplete`]. `last_status_change_date` is stamped
    /// from the clock unless the update differs from the stored row only in
    /// `deleted_date` (a pure soft-delete is not a status change).
    /// `finalization_date` is stamped the first time status lands in the
    /// finalized set and never overwritten afterwards.
    ///
    /// # Errors
    /// [`InstanceStoreError::Integrity`] when the edit-chain invariants are
    /// violated (nothing is written), [`InstanceStoreError::RowNotFound`]
    /// when updating an unknown id, or an I/O error from persisting.
    pub fn save(&self, instance: &Instance) -> Result<Instance, InstanceStoreError> {
        let mut doc = self.inner.write();

        if instance.edit_of().is_some() != instance.edit_number().is_some() {
            return Err(IntegrityError::EditFieldsMismatch.into());
        }
        if let Some(referent) = instance.edit_of() {
            if instance.db_id() == Some(referent) {
                return Err(IntegrityError::SelfEdit { db_id: referent }.into());
            }
            if !doc.rows.contains_key(&referent) {
                return Err(IntegrityError::DanglingEditOf { referent }.into());
            }
        }

        let existing = match instance.db_id() {
            Some(id) => {
                let Some(row) = doc.rows.get(&id) else {
                    return Err(InstanceStoreError::RowNotFound { db_id: id });
                };
                Some(row.clone())
            }
            None => None,
        };
        let db_id = instance.db_id().unwrap_or(doc.next_id);

        let status = instance.status().unwrap_or(InstanceStatus::Incomplete);
        let now = self.clock.now();

        let candidate = instance
            .to_builder()
            .db_id(db_id)
            .status(Some(status))
            .build();

        let change_date = match &existing {
            Some(old) if differs_only_in_deleted_date(old, &candidate) => {
                old.last_status_change_date()
            }
            _ => Some(now),
        };

        let finalization_date = candidate
            .finalization_date()
            .or_else(|| existing.as_ref().and_then(Instance::finalization_date))
            .or_else(|| status.is_finalized().then_some(now));

        let row = candidate
            .to_builder()
            .last_status_change_date(change_date)
            .finalization_date(finalization_date)
            .build();

        let prev_next = doc.next_id;
        let prev = doc.rows.insert(db_id, row.clone());
        if existing.is_none() {
            doc.next_id = db_id + 1;
        }

        if let Err(err) = self.persist(&doc) {
            match prev {
                Some(old) => {
                    doc.rows.insert(db_id, old);
                }
                None => {
                    doc.rows.remove(&db_id);
                }
            }
            doc.next_id = prev_next;
            return Err(err);
        }

        tracing::debug!(db_id, status = ?status, "instance row saved");
        Ok(row)
    }

    /// Look up a row by id
    #[must_use]
    pub fn get(&self, db_id: i64) -> Option<Instance> {
        self.inner.read().rows.get(&db_id).cloned()
    }

    /// Look up the row bound to an instance file path
    ///
    /// Instance directories are exclusively owned, so at most one row can
    /// match.
    #[must_use]
    pub fn get_by_path(&self, instance_file_path: &Path) -> Option<Instance> {
        self.inner
            .read()
            .rows
            .values()
            .find(|row| row.instance_file_path() == instance_file_path)
            .cloned()
    }

    /// Every row, deleted or not, in id order
    #[must_use]
    pub fn get_all(&self) -> Vec<Instance> {
        self.inner.read().rows.values().cloned().collect()
    }

    /// Rows whose status is one of `statuses`
    #[must_use]
    pub fn get_all_by_status(&self, statuses: &[InstanceStatus]) -> Vec<Instance> {
        self.inner
            .read()
            .rows
            .values()
            .filter(|row| row.status().is_some_and(|s| statuses.contains(&s)))
            .cloned()
            .collect()
    }

    /// Count of rows whose status is one of `statuses`
    #[must_use]
    pub fn count_by_status(&self, statuses: &[InstanceStatus]) -> usize {
        self.inner
            .read()
            .rows
            .values()
            .filter(|row| row.status().is_some_and(|s| statuses.contains(&s)))
            .count()
    }

    /// Rows filled against `form_id`, any version, including deleted ones
    #[must_use]
    pub fn get_all_by_form_id(&self, form_id: &str) -> Vec<Instance> {
        self.inner
            .read()
            .rows
            .values()
            .filter(|row| row.form_id() == form_id)
            .cloned()
            .collect()
    }

    /// Live rows filled against exactly `(form_id, version)`
    #[must_use]
    pub fn get_all_not_deleted_by_form_id_and_version(
        &self,
        form_id: &str,
        version: Option<&str>,
    ) -> Vec<Instance> {
        self.inner
            .read()
            .rows
            .values()
            .filter(|row| {
                !row.is_deleted() && row.form_id() == form_id && row.form_version() == version
            })
            .cloned()
            .collect()
    }

    /// Every row without a soft-delete tombstone
    #[must_use]
    pub fn all_not_deleted(&self) -> Vec<Instance> {
        self.inner
            .read()
            .rows
            .values()
            .filter(|row| !row.is_deleted())
            .cloned()
            .collect()
    }

    /// Delete a row.
    ///
    /// [`DeleteMode::Hard`] removes the row and its instance directory;
    /// blocked while any other row references it through `edit_of`.
    /// [`DeleteMode::Soft`] tombstones the row, clears its geometry, and
    /// removes the instance directory; `last_status_change_date` is left
    /// exactly as it was.
    ///
    /// # Errors
    /// [`InstanceStoreError::Integrity`] when a hard delete is blocked by
    /// surviving edits, [`InstanceStoreError::RowNotFound`] for an unknown
    /// id, or an I/O error.
    pub fn delete(&self, db_id: i64, mode: DeleteMode) -> Result<(), InstanceStoreError> {
        let mut doc = self.inner.write();

        let Some(row) = doc.rows.get(&db_id).cloned() else {
            return Err(InstanceStoreError::RowNotFound { db_id });
        };

        match mode {
            DeleteMode::Hard => {
                let edit_count = doc
                    .rows
                    .values()
                    .filter(|other| other.db_id() != Some(db_id) && other.edit_of() == Some(db_id))
                    .count();
                if edit_count > 0 {
                    return Err(IntegrityError::EditsExist { db_id, edit_count }.into());
                }

                remove_instance_dir(&row)?;

                let prev = doc.rows.remove(&db_id);
                if let Err(err) = self.persist(&doc) {
                    if let Some(old) = prev {
                        doc.rows.insert(db_id, old);
                    }
                    return Err(err);
                }
                tracing::info!(db_id, "instance row hard-deleted");
            }
            DeleteMode::Soft => {
                remove_instance_dir(&row)?;

                let tombstoned = row
                    .to_builder()
                    .deleted_date(Some(self.clock.now()))
                    .geometry(None, None)
                    .build();

                let prev = doc.rows.insert(db_id, tombstoned);
                if let Err(err) = self.persist(&doc) {
                    if let Some(old) = prev {
                        doc.rows.insert(db_id, old);
                    }
                    return Err(err);
                }
                tracing::info!(db_id, "instance row soft-deleted");
            }
        }

        Ok(())
    }

    /// Hard-delete every row and every instance directory.
    ///
    /// # Errors
    /// Returns the first I/O failure; rows removed before the failure stay
    /// removed on disk.
    pub fn delete_all(&self) -> Result<(), InstanceStoreError> {
        let mut doc = self.inner.write();

        for row in doc.rows.values() {
            remove_instance_dir(row)?;
        }

        doc.rows.clear();
        self.persist(&doc)?;
        tracing::info!("instance store cleared");
        Ok(())
    }

    fn persist(&self, doc: &Document) -> Result<(), InstanceStoreError> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        fsutil::write_atomic(&self.db_path, &bytes).map_err(|source| InstanceStoreError::Io {
            path: self.db_path.clone(),
            source,
        })
    }
}

/// A pure soft-delete: identical rows except for `deleted_date`.
///
/// `last_status_change_date` is excluded from the comparison because it is
/// store-maintained, not caller-supplied.
fn differs_only_in_deleted_date(old: &Instance, new: &Instance) -> bool {
    if old.deleted_date() == new.deleted_date() {
        return false;
    }
    strip_store_dates(old) == strip_store_dates(new)
}

fn strip_store_dates(instance: &Instance) -> Instance {
    instance
        .to_builder()
        .deleted_date(None)
        .last_status_change_date(None)
        .build()
}

fn remove_instance_dir(row: &Instance) -> Result<(), InstanceStoreError> {
    let Some(dir) = row.instance_file_path().parent() else {
        return Ok(());
    };
    fsutil::remove_dir_if_exists(dir).map_err(|source| InstanceStoreError::Io {
        path: dir.to_path_buf(),
        source,
    })
}
