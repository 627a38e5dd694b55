//! Path Resolver
//!
//! Turns the possibly-relative directories named in a run (input sources,
//! output directory) into absolute paths anchored at the executor's working
//! directory.

use std::path::{Path, PathBuf};

/// Resolve `path` against `root`
///
/// Absolute paths are returned unchanged, so resolving twice is the same as
/// resolving once.
pub fn resolve_dir(root: &Path, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
