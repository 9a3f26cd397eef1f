//! Stale build-cache removal.

use std::io;
use std::path::Path;
use tracing::debug;

/// Remove a cache directory and everything under it.
///
/// Returns whether anything was removed. A missing directory is not an
/// error, so running this twice leaves the same clean state.
pub fn remove_stale_dir(path: &Path) -> io::Result<bool> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {
            debug!("Removed stale cache {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
