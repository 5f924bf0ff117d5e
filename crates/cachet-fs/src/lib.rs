//! Staged files that are swapped into place atomically.
//!
//! A [`StagedFile`] writes next to its final path under a timestamped name and
//! either renames onto the final path ([`StagedFile::commit`]) or deletes the
//! staged bytes ([`StagedFile::abort`]). Dropping an unfinished file aborts it,
//! so a reader of the final path only ever sees complete content.

mod error;
mod staged;

pub use error::{Error, Result};
pub use staged::StagedFile;

use std::path::Path;

/// Create `dir` and its parents, failing if the path exists as something else.
pub fn ensure_dir(dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    if dir.is_dir() {
        return Ok(());
    }
    if dir.exists() {
        return Err(Error::NotADirectory(dir.to_path_buf()));
    }
    std::fs::create_dir_all(dir).map_err(|e| Error::Write {
        path:   dir.to_path_buf(),
        source: e,
    })
}

/// Remove a file, treating an already missing file as success.
///
/// Returns whether a file was actually removed.
pub fn remove_file_if_exists(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::Remove {
            path:   path.to_path_buf(),
            source: e,
        }),
    }
}
