//! # jotdb Storage
//!
//! Crash-safe filesystem primitives for jotdb.
//!
//! The datastore owns exactly one data file; this crate provides the
//! path-level operations it needs: durable appends, whole-file rewrites
//! through a temp-file + rename protocol, and the side-file
//! reconciliation that makes those rewrites safe to interrupt at any
//! point.
//!
//! The side file of `<name>` is `<name>~`. In a clean state the side
//! file never exists; [`ensure_datafile_integrity`] restores a clean
//! state before the data file is read.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;

pub use error::{StorageError, StorageResult};

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Returns the transient side-file path for a data file: `<name>~`.
#[must_use]
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push("~");
    PathBuf::from(name)
}

/// Creates a directory (and its parents) if it does not exist. Idempotent.
pub fn ensure_dir_exists(path: &Path) -> StorageResult<()> {
    fs::create_dir_all(path).map_err(|e| StorageError::path_io(path, e))
}

/// Removes a file if it exists.
pub fn ensure_file_doesnt_exist(path: &Path) -> StorageResult<()> {
    if path.exists() {
        fs::remove_file(path).map_err(|e| StorageError::path_io(path, e))?;
    }
    Ok(())
}

/// Returns true when the path exists.
#[must_use]
pub fn exists(path: &Path) -> bool {
    path.exists()
}

/// Reads the whole data file as UTF-8 text.
pub fn read_to_string(path: &Path) -> StorageResult<String> {
    fs::read_to_string(path).map_err(|e| StorageError::path_io(path, e))
}

/// Reconciles the data file and its side file before a load.
///
/// - only the data file exists: nothing to do;
/// - only the side file exists: a crash happened after the rewrite was
///   flushed but before the rename, so the side file holds the complete
///   new state and is renamed into place;
/// - both exist: a crash happened while the side file was being written,
///   its contents are untrusted and it is deleted;
/// - neither exists: an empty data file is created.
pub fn ensure_datafile_integrity(path: &Path) -> StorageResult<()> {
    let side = sidecar_path(path);

    if path.exists() {
        if side.exists() {
            ensure_file_doesnt_exist(&side)?;
        }
        return Ok(());
    }

    if side.exists() {
        return fs::rename(&side, path).map_err(|e| StorageError::path_io(&side, e));
    }

    let file = File::create(path).map_err(|e| StorageError::path_io(path, e))?;
    file.sync_all().map_err(|e| StorageError::path_io(path, e))?;
    Ok(())
}

/// Appends text to the data file with durability: the file is opened in
/// append mode, written, synced to disk and closed.
pub fn append(path: &Path, data: &str) -> StorageResult<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StorageError::path_io(path, e))?;
    file.write_all(data.as_bytes())
        .map_err(|e| StorageError::path_io(path, e))?;
    file.sync_all().map_err(|e| StorageError::path_io(path, e))?;
    Ok(())
}

/// Atomically replaces the data file with new contents.
///
/// The contents are written to the side file, synced, then renamed over
/// the data file. A crash before the rename leaves the old file intact;
/// a crash after it leaves the new one. The parent directory is synced
/// on a best-effort basis so the rename itself is durable.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
///
/// jotdb_storage::write_and_replace(Path::new("app.db"), "one record per line\n").unwrap();
/// ```
pub fn write_and_replace(path: &Path, contents: &str) -> StorageResult<()> {
    let side = sidecar_path(path);
    ensure_file_doesnt_exist(&side)?;

    {
        let mut file = File::create(&side).map_err(|e| StorageError::path_io(&side, e))?;
        file.write_all(contents.as_bytes())
            .map_err(|e| StorageError::path_io(&side, e))?;
        file.sync_all().map_err(|e| StorageError::path_io(&side, e))?;
    }

    fs::rename(&side, path).map_err(|e| StorageError::path_io(path, e))?;

    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sidecar_naming() {
        assert_eq!(
            sidecar_path(Path::new("/tmp/data.db")),
            PathBuf::from("/tmp/data.db~")
        );
    }

    #[test]
    fn ensure_dir_is_idempotent() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_dir_exists(&nested).unwrap();
        ensure_dir_exists(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn remove_if_present() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        ensure_file_doesnt_exist(&path).unwrap();
        fs::write(&path, "x").unwrap();
        ensure_file_doesnt_exist(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn append_accumulates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        append(&path, "one\n").unwrap();
        append(&path, "two\n").unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn write_and_replace_swaps_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        fs::write(&path, "old").unwrap();

        write_and_replace(&path, "new contents\n").unwrap();

        assert_eq!(read_to_string(&path).unwrap(), "new contents\n");
        assert!(!sidecar_path(&path).exists());
    }

    #[test]
    fn integrity_normal_case_keeps_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        fs::write(&path, "keep me").unwrap();

        ensure_datafile_integrity(&path).unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "keep me");
    }

    #[test]
    fn integrity_promotes_lone_side_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        fs::write(sidecar_path(&path), "from side").unwrap();

        ensure_datafile_integrity(&path).unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "from side");
        assert!(!sidecar_path(&path).exists());
    }

    #[test]
    fn integrity_trusts_primary_over_side() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        fs::write(&path, "primary").unwrap();
        fs::write(sidecar_path(&path), "untrusted").unwrap();

        ensure_datafile_integrity(&path).unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "primary");
        assert!(!sidecar_path(&path).exists());
    }

    #[test]
    fn integrity_creates_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");

        ensure_datafile_integrity(&path).unwrap();
        assert!(path.exists());
        assert_eq!(read_to_string(&path).unwrap(), "");
    }
}
