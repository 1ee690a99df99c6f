//! Savepoint registry
//!
//! [`SavepointStore`] tracks, per `(form, instance)` pair, the location of a
//! snapshot file that is newer than the last flush of the instance file.
//! Registration is first-writer-wins: once a session has claimed the key, a
//! stale concurrent writer must not be able to repoint it mid-session.

use fieldform_model::Savepoint;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;

use crate::error::SavepointError;
use crate::fsutil;

/// Persisted shape of the registry
#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    savepoints: Vec<Savepoint>,
}

/// Registry of recovery snapshots
///
/// At most one [`Savepoint`] per `(form_db_id, instance_db_id)` key. Backed
/// by a JSON document replaced atomically on every mutation.
pub struct SavepointStore {
    db_path: PathBuf,
    inner: RwLock<Document>,
}

impl std::fmt::Debug for SavepointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SavepointStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl SavepointStore {
    /// Open the registry at `db_path`, reloading any persisted rows.
    ///
    /// # Errors
    /// Returns [`SavepointError::Io`] on filesystem failure or
    /// [`SavepointError::Corrupt`] when the document cannot be decoded.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, SavepointError> {
        let db_path = db_path.into();
        let doc = match fs::read(&db_path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| SavepointError::Corrupt {
                path: db_path.clone(),
                source,
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Document::default(),
            Err(source) => {
                return Err(SavepointError::Io {
                    path: db_path,
                    source,
                })
            }
        };

        Ok(Self {
            db_path,
            inner: RwLock::new(doc),
        })
    }

    /// Exact-match lookup on `(form_db_id, instance_db_id)`
    ///
    /// An absent `instance_db_id` only matches rows that were saved without
    /// one.
    #[must_use]
    pub fn get(&self, form_db_id: i64, instance_db_id: Option<i64>) -> Option<Savepoint> {
        self.inner
            .read()
            .savepoints
            .iter()
            .find(|row| row.key() == (form_db_id, instance_db_id))
            .cloned()
    }

    /// Register a savepoint; a no-op when the key is already claimed.
    ///
    /// First writer wins: the stored file pointer is never replaced for the
    /// lifetime of the row.
    ///
    /// # Errors
    /// Returns an I/O error from persisting the registry.
    pub fn save(&self, savepoint: &Savepoint) -> Result<(), SavepointError> {
        let mut doc = self.inner.write();

        if doc.savepoints.iter().any(|row| row.key() == savepoint.key()) {
            tracing::debug!(
                form_db_id = savepoint.form_db_id(),
                instance_db_id = ?savepoint.instance_db_id(),
                "savepoint key already claimed; keeping first writer"
            );
            return Ok(());
        }

        doc.savepoints.push(savepoint.clone());
        if let Err(err) = self.persist(&doc) {
            doc.savepoints.pop();
            return Err(err);
        }

        tracing::debug!(
            form_db_id = savepoint.form_db_id(),
            instance_db_id = ?savepoint.instance_db_id(),
            "savepoint registered"
        );
        Ok(())
    }

    /// Remove the row for `(form_db_id, instance_db_id)` and delete its
    /// snapshot file.
    ///
    /// Absence of the row or of the file is not an error; a session that
    /// completed cleanly may race cache-clearing maintenance.
    ///
    /// # Errors
    /// Returns an I/O error from deleting the file or persisting the
    /// registry.
    pub fn delete(&self, form_db_id: i64, instance_db_id: Option<i64>) -> Result<(), SavepointError> {
        let mut doc = self.inner.write();

        let Some(position) = doc
            .savepoints
            .iter()
            .position(|row| row.key() == (form_db_id, instance_db_id))
        else {
            return Ok(());
        };

        let row = doc.savepoints.remove(position);
        if let Err(err) = self.persist(&doc) {
            doc.savepoints.insert(position, row);
            return Err(err);
        }

        fsutil::remove_file_if_exists(row.savepoint_file_path()).map_err(|source| {
            SavepointError::Io {
                path: row.savepoint_file_path().to_path_buf(),
                source,
            }
        })?;

        tracing::debug!(form_db_id, instance_db_id = ?instance_db_id, "savepoint released");
        Ok(())
    }

    /// Every registered savepoint
    #[must_use]
    pub fn get_all(&self) -> Vec<Savepoint> {
        self.inner.read().savepoints.clone()
    }

    /// Remove every row and every snapshot file.
    ///
    /// # Errors
    /// Returns the first I/O failure encountered.
    pub fn delete_all(&self) -> Result<(), SavepointError> {
        let mut doc = self.inner.write();

        for row in &doc.savepoints {
            fsutil::remove_file_if_exists(row.savepoint_file_path()).map_err(|source| {
                SavepointError::Io {
                    path: row.savepoint_file_path().to_path_buf(),
                    source,
                }
            })?;
        }

        doc.savepoints.clear();
        self.persist(&doc)?;
        tracing::info!("savepoint registry cleared");
        Ok(())
    }

    fn persist(&self, doc: &Document) -> Result<(), SavepointError> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        fsutil::write_atomic(&self.db_path, &bytes).map_err(|source| SavepointError::Io {
            path: self.db_path.clone(),
            source,
        })
    }
}
