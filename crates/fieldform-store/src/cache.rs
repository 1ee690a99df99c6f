//! Parsed form-definition cache
//!
//! Parsing a form definition is the most expensive step of opening a session,
//! so [`FormDefinitionCache`] memoizes the parsed artifact keyed by the
//! blake3 hash of the source file's bytes. Content addressing gives staleness
//! detection for free: an edited form hashes differently and simply misses,
//! while a byte-identical copy at another path still hits.
//!
//! Caching is an optimization, never required for correctness. Readers treat
//! a corrupt disk artifact as a miss, and callers are expected to tolerate
//! any [`CacheError`] by parsing fresh.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::CacheError;
use crate::fsutil;

const ARTIFACT_SUFFIX: &str = ".formdef.json";
const MEMORY_CAPACITY: u64 = 64;

/// Two-level cache of parsed form definitions
///
/// Memory layer first (a bounded [`moka::sync::Cache`]), then JSON artifacts
/// on disk under the cache directory. `D` is the engine's parsed-definition
/// type.
pub struct FormDefinitionCache<D> {
    cache_dir: PathBuf,
    mem: moka::sync::Cache<String, Arc<D>>,
}

impl<D> std::fmt::Debug for FormDefinitionCache<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormDefinitionCache")
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

impl<D> FormDefinitionCache<D>
where
    D: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a cache rooted at `cache_dir`, creating the directory if
    /// needed.
    ///
    /// # Errors
    /// Returns [`CacheError::Io`] when the directory cannot be created.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir).map_err(|source| CacheError::Io {
            path: cache_dir.clone(),
            source,
        })?;

        Ok(Self {
            cache_dir,
            mem: moka::sync::Cache::new(MEMORY_CAPACITY),
        })
    }

    /// Look up the parsed definition for `source_file`.
    ///
    /// Returns `Ok(None)` when no artifact exists for the file's current
    /// content; a corrupt disk artifact is treated as a miss (and removed
    /// best-effort), never an error.
    ///
    /// # Errors
    /// Returns [`CacheError::Io`] when the source file or an existing
    /// artifact cannot be read. Callers degrade to parsing fresh.
    pub fn read(&self, source_file: &Path) -> Result<Option<Arc<D>>, CacheError> {
        let key = content_key(source_file)?;

        if let Some(hit) = self.mem.get(&key) {
            tracing::debug!(source = %source_file.display(), "form definition memory-cache hit");
            return Ok(Some(hit));
        }

        let artifact = self.artifact_path(&key);
        let bytes = match fs::read(&artifact) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CacheError::Io {
                    path: artifact,
                    source,
                })
            }
        };

        match serde_json::from_slice::<D>(&bytes) {
            Ok(definition) => {
                let definition = Arc::new(definition);
                self.mem.insert(key, Arc::clone(&definition));
                tracing::debug!(source = %source_file.display(), "form definition disk-cache hit");
                Ok(Some(definition))
            }
            Err(err) => {
                tracing::warn!(
                    artifact = %artifact.display(),
                    error = %err,
                    "corrupt form definition artifact; treating as cache miss"
                );
                let _ = fs::remove_file(&artifact);
                Ok(None)
            }
        }
    }

    /// Store the parsed definition for `source_file`.
    ///
    /// # Errors
    /// Returns [`CacheError::Io`] or [`CacheError::Encode`]; callers may
    /// ignore either, since a failed write only costs a re-parse later.
    pub fn write(&self, definition: D, source_file: &Path) -> Result<(), CacheError> {
        let key = content_key(source_file)?;
        let bytes = serde_json::to_vec(&definition)?;

        let artifact = self.artifact_path(&key);
        fsutil::write_atomic(&artifact, &bytes).map_err(|source| CacheError::Io {
            path: artifact.clone(),
            source,
        })?;

        self.mem.insert(key, Arc::new(definition));
        tracing::debug!(source = %source_file.display(), "form definition cached");
        Ok(())
    }

    /// Remove every cached artifact and empty the memory layer.
    ///
    /// # Errors
    /// Returns [`CacheError::Io`] on the first filesystem failure.
    pub fn clear(&self) -> Result<(), CacheError> {
        let entries = fs::read_dir(&self.cache_dir).map_err(|source| CacheError::Io {
            path: self.cache_dir.clone(),
            source,
        })?;

        for entry in entries {
            let entry = entry.map_err(|source| CacheError::Io {
                path: self.cache_dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().ends_with(ARTIFACT_SUFFIX))
            {
                fsutil::remove_file_if_exists(&path).map_err(|source| CacheError::Io {
                    path: path.clone(),
                    source,
                })?;
            }
        }

        self.mem.invalidate_all();
        tracing::info!("form definition cache cleared");
        Ok(())
    }

    fn artifact_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{key}{ARTIFACT_SUFFIX}"))
    }
}

/// Content-address `source_file`: hex blake3 of its bytes.
fn content_key(source_file: &Path) -> Result<String, CacheError> {
    let bytes = fs::read(source_file).map_err(|source| CacheError::Io {
        path: source_file.to_path_buf(),
        source,
    })?;
    Ok(hex::encode(blake3::hash(&bytes).as_bytes()))
}
