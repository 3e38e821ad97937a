use std::path::{Path, PathBuf};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::SlaveError;

/// Keeps the notify backend alive for as long as the session runs.
pub struct CacheWatcher {
    _watcher: RecommendedWatcher,
}

/// Watch the cache paths, forwarding each relevant change as one unit
/// on `tx`. Paths that do not exist yet are skipped.
pub fn watch_cache_paths(
    paths: &[PathBuf],
    tx: UnboundedSender<()>,
) -> Result<CacheWatcher, SlaveError> {
    let mut watcher = recommended_watcher(move |event: notify::Result<Event>| match event {
        Ok(event) if is_cache_change(&event) => {
            let _ = tx.send(());
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(error = %err, "watcher event error"),
    })?;

    for path in paths {
        if !path.exists() {
            continue;
        }
        watcher.watch(path, RecursiveMode::NonRecursive)?;
        tracing::debug!(path = %path.display(), "watching cache path");
    }

    Ok(CacheWatcher { _watcher: watcher })
}

fn is_cache_change(event: &Event) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }
    // The engine touches its advisory lock file constantly; that never
    // means the cache contents changed.
    event.paths.iter().any(|path| !is_lock_file(path))
}

fn is_lock_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name == "lock")
        .unwrap_or(false)
}
