//! Destination path validation for extraction.

use std::path::{Component, Path, PathBuf};

use crate::error::{ArchiveError, Result};

/// Joins an archive entry name onto the destination root, normalizing it
/// lexically. Fails if the resulting path would not be a strict descendant
/// of the root.
pub(crate) fn safe_join(dest: &Path, name: &str) -> Result<PathBuf> {
    let mut path = dest.to_path_buf();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if path == dest || !path.pop() {
                    return Err(ArchiveError::PathTraversal(name.to_string()));
                }
            }
            // Absolute entry names and drive prefixes never stay inside dest
            Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::PathTraversal(name.to_string()));
            }
        }
    }
    if path == dest || !path.starts_with(dest) {
        return Err(ArchiveError::PathTraversal(name.to_string()));
    }
    Ok(path)
}

/// Lexical normalization of `.` and `..` components, without touching the
/// filesystem. Used when following symlink chains recorded in an archive.
pub(crate) fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}
