//! Atomic filesystem helpers
//!
//! All durable state in this workspace goes through [`write_atomic`]: write
//! to a uniquely named temporary sibling, fsync, rename over the target, then
//! fsync the parent directory. A crash at any point leaves either the old
//! file or the new file, never a partial one.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Atomically replace `path` with `contents`.
///
/// The parent directory is created if missing. The write is durable: the
/// temporary file is synced before the rename and the parent directory is
/// synced after it.
///
/// # Errors
/// Returns the underlying I/O error; the temporary file is cleaned up on
/// failure.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Err(io::Error::other("path has no parent"));
    };
    let Some(file_name) = path.file_name() else {
        return Err(io::Error::other("path has no file name"));
    };

    fs::create_dir_all(parent)?;

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let tmp_path = parent.join(format!(".fieldform.tmp.{}.{nanos}", file_name.to_string_lossy()));

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp_path)?;

    let write_result = file
        .write_all(contents)
        .and_then(|()| file.sync_all());
    drop(file);

    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }

    if let Err(err) = rename_overwrite(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }

    #[cfg(unix)]
    {
        let dir = fs::File::open(parent)?;
        dir.sync_all()?;
    }

    Ok(())
}

/// Remove a file, treating absence as success.
///
/// # Errors
/// Returns any I/O error other than `NotFound`.
pub fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Remove a directory tree, treating absence as success.
///
/// # Errors
/// Returns any I/O error other than `NotFound`.
pub fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn rename_overwrite(from: &Path, to: &Path) -> io::Result<()> {
    #[cfg(windows)]
    {
        match fs::rename(from, to) {
            Ok(()) => Ok(()),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::AlreadyExists | io::ErrorKind::PermissionDenied
                ) =>
            {
                let _ = fs::remove_file(to);
                fs::rename(from, to)
            }
            Err(err) => Err(err),
        }
    }

    #[cfg(not(windows))]
    {
        fs::rename(from, to)
    }
}
