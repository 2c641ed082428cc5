//! Scratch directory handling.
//!
//! The build tool marks parts of its output base read-only, so a plain
//! `remove_dir_all` fails on them. Removal clears the read-only bit on the
//! whole tree and retries.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info};

use crate::errors::{HarnessError, HarnessResult};

/// Remove `path` if present and create it empty.
pub fn recreate(path: &Path) -> HarnessResult<()> {
    force_remove(path)?;
    fs::create_dir_all(path)
        .map_err(|e| HarnessError::io(format!("creating {}", path.display()), e))?;
    info!(path = %path.display(), "Created working directory");
    Ok(())
}

/// Remove `path` and everything below it, including read-only entries.
/// A missing path is not an error.
pub fn force_remove(path: &Path) -> HarnessResult<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => debug!(path = %path.display(), "First removal attempt failed: {e}"),
    }

    clear_readonly(path)
        .map_err(|e| HarnessError::io(format!("clearing read-only bits under {}", path.display()), e))?;
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HarnessError::io(format!("removing {}", path.display()), e)),
    }
}

fn clear_readonly(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Ok(());
    }
    let mut perms = meta.permissions();
    if perms.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        fs::set_permissions(path, perms)?;
    }
    if meta.is_dir() {
        for entry in fs::read_dir(path)? {
            clear_readonly(&entry?.path())?;
        }
    }
    Ok(())
}
