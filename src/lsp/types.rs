//! Path and URI helpers shared by the registry and the lifecycle handlers.

use std::path::{Component, Path, PathBuf};

use lsp_types::Url;

/// Normalizes a path for use as a registry key.
///
/// Existing paths are canonicalized so symlinked workspace roots compare
/// equal to the documents below them. Paths that do not exist are
/// normalized lexically instead.
pub fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

/// Converts a document URI to a filesystem path.
///
/// Returns `None` for virtual buffers (notebook cells, untitled editors,
/// anything that is not `file:`).
pub fn uri_to_path(uri: &Url) -> Option<PathBuf> {
    if uri.scheme() != "file" {
        return None;
    }
    uri.to_file_path().ok()
}
