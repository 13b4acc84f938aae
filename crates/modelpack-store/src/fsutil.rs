//! Atomic file writes shared by the blob store, the index and exports

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Result of committing a file that must not be overwritten
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The file was written by this call
    Written,
    /// Another writer got there first; the existing file is kept
    AlreadyExists,
}

/// Stage `data` in `staging_dir`, then link it to `dest` only if `dest`
/// does not exist yet
pub fn commit_if_absent(staging_dir: &Path, dest: &Path, data: &[u8]) -> io::Result<CommitOutcome> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = stage(staging_dir, data)?;
    match tmp.persist_noclobber(dest) {
        Ok(_) => {
            sync_parent(dest);
            Ok(CommitOutcome::Written)
        }
        // The staged file is removed when the returned handle drops.
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            Ok(CommitOutcome::AlreadyExists)
        }
        Err(e) => Err(e.error),
    }
}

/// Replace `dest` with `data` via a sibling temp file and a rename, so
/// readers see either the old or the new content
pub fn replace(dest: &Path, data: &[u8]) -> io::Result<()> {
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let tmp = stage(dir, data)?;
    tmp.persist(dest).map_err(|e| e.error)?;
    sync_parent(dest);
    Ok(())
}

fn stage(dir: &Path, data: &[u8]) -> io::Result<NamedTempFile> {
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}
