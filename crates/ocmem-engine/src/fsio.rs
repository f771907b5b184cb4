//! Filesystem helpers for the memory Markdown corpus.

use std::path::Path;

use ocmem_core::Result;

/// Write `content` to `path` atomically: temp file in the same directory,
/// then rename. A cancelled or crashed writer can never leave a torn file.
pub fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let tmp = tempfile::NamedTempFile::new_in(parent)?;
    std::fs::write(tmp.path(), content)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Normalize a path relative to `root` into a forward-slash URI.
pub fn uri_for(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Top-level folder of a URI (`"user/preferences.md"` → `"user"`), empty
/// for root-level files.
pub fn parent_dir(uri: &str) -> &str {
    match uri.split_once('/') {
        Some((dir, _)) => dir,
        None => "",
    }
}
