//! Debounced filesystem watching for memory sync.
//!
//! Events are debounced per path with a 1.5 s quiescence window; the last
//! event within the window wins. Create/modify dispatches a re-index,
//! delete removes the file's chunks. `PRIMER.md` and `TASKS.md` are
//! ignored outright (the primer regenerates them, watching them would
//! loop).

use std::path::PathBuf;
use std::time::Duration;

use notify_debouncer_full::{
    new_debouncer, notify::EventKind, notify::RecursiveMode, DebounceEventResult, Debouncer,
    RecommendedCache,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use ocmem_core::{MemoryError, Result, Scope};

use crate::indexer::EXCLUDED_FILES;

const DEBOUNCE: Duration = Duration::from_millis(1500);

/// A debounced, filtered filesystem event.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// File created or modified: re-index it.
    Upsert(Scope, PathBuf),
    /// File deleted: drop its chunks.
    Remove(Scope, PathBuf),
}

/// Watches one scope root for Markdown changes.
///
/// Keep the returned watcher alive; dropping it stops the stream.
pub struct ScopeWatcher {
    _debouncer: Debouncer<notify_debouncer_full::notify::RecommendedWatcher, RecommendedCache>,
}

impl ScopeWatcher {
    pub fn start(
        scope: Scope,
        root: PathBuf,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WatchEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watch_root = root.clone();

        let mut debouncer = new_debouncer(DEBOUNCE, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events {
                        let removed = matches!(event.event.kind, EventKind::Remove(_));
                        for path in &event.paths {
                            if !tracked(&watch_root, path) {
                                continue;
                            }
                            // A rename can report Remove for a path that is
                            // back on disk already; trust the filesystem.
                            let msg = if removed && !path.exists() {
                                WatchEvent::Remove(scope, path.clone())
                            } else if path.exists() {
                                WatchEvent::Upsert(scope, path.clone())
                            } else {
                                WatchEvent::Remove(scope, path.clone())
                            };
                            debug!(?msg, "watch event");
                            if tx.send(msg).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "file watcher error");
                    }
                }
            }
        })
        .map_err(|e| MemoryError::Other(anyhow_from(e)))?;

        debouncer
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| MemoryError::Other(anyhow_from(e)))?;

        debug!(%scope, root = %root.display(), "watching scope root");
        Ok((Self { _debouncer: debouncer }, rx))
    }
}

fn anyhow_from(e: notify_debouncer_full::notify::Error) -> anyhow::Error {
    anyhow::anyhow!("watcher: {e}")
}

/// Markdown files only, minus hidden paths (below the watched root) and
/// the derived files.
fn tracked(root: &std::path::Path, path: &std::path::Path) -> bool {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if ext != "md" && ext != "markdown" {
        return false;
    }
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if EXCLUDED_FILES.contains(&name) {
        return false;
    }
    // The root itself may be a dot-directory (~/.openclaw_memory); only
    // components below it disqualify a path as hidden.
    let rel = path.strip_prefix(root).unwrap_or(path);
    !rel.components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn tracked_filters() {
        let root = Path::new("/home/u/.openclaw_memory");
        assert!(tracked(root, Path::new("/home/u/.openclaw_memory/user/preferences.md")));
        assert!(tracked(root, Path::new("/home/u/.openclaw_memory/journal/2026-08-02.md")));
        assert!(!tracked(root, Path::new("/home/u/.openclaw_memory/PRIMER.md")));
        assert!(!tracked(root, Path::new("/home/u/.openclaw_memory/TASKS.md")));
        assert!(!tracked(root, Path::new("/home/u/.openclaw_memory/index.db")));
        assert!(!tracked(root, Path::new("/home/u/.openclaw_memory/.cache/notes.md")));
    }
}
