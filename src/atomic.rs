// src/atomic.rs

//! Atomic file replacement
//!
//! Content is written to a temporary file in the target's directory, synced,
//! and renamed over the target. Readers see either the old file or the new
//! one, never a partial write.

use crate::error::{Error, Result};
use std::fs::{self, Permissions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Fully written replacement waiting to be renamed into place
///
/// Dropping it without [`commit`](StagedFile::commit) discards the temporary
/// file and leaves the target untouched.
pub struct StagedFile {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedFile {
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Rename the staged content over the target
    pub fn commit(self) -> Result<()> {
        let target = self.target;
        self.temp.persist(&target).map_err(|e| {
            Error::IoError(format!("Failed to replace {}: {}", target.display(), e.error))
        })?;
        Ok(())
    }
}

/// Write `data` next to `path` without touching `path` yet
pub fn stage(path: &Path, data: &[u8], mode: u32) -> Result<StagedFile> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| {
        Error::IoError(format!("Failed to create directory {}: {}", parent.display(), e))
    })?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    fs::set_permissions(temp.path(), Permissions::from_mode(mode))?;

    Ok(StagedFile {
        temp,
        target: path.to_path_buf(),
    })
}

/// Atomically replace `path` with `data`
pub fn write_atomic(path: &Path, data: &[u8], mode: u32) -> Result<()> {
    stage(path, data, mode)?.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_creates_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub/file.txt");

        write_atomic(&path, b"one", 0o644).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"one");
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o644);

        write_atomic(&path, b"two", 0o600).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
    }

    #[test]
    fn test_dropped_stage_leaves_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        write_atomic(&path, b"original", 0o644).unwrap();

        let staged = stage(&path, b"replacement", 0o644).unwrap();
        assert_eq!(staged.target(), path.as_path());
        drop(staged);

        assert_eq!(fs::read(&path).unwrap(), b"original");
        // Only the target remains in the directory
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
