//! File Watcher: notifies callers when a collection file changes on disk
//! outside of this process.
//!
//! Built on `notify` + `notify-debouncer-mini`, the same pairing used
//! elsewhere in the retrieved corpus for coalescing filesystem churn into a
//! handful of debounced events. Dispatch happens on a dedicated background
//! thread and never while any collection lock is held — listeners are free
//! to call back into the store from their callback.

use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::thread;
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind};

use crate::CollectionName;

/// A debounced change to one collection file, translated from a raw path
/// event into the collection name it affects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Modified(CollectionName),
    Added(CollectionName),
    Deleted(CollectionName),
}

/// Watches a database directory for externally-made changes to collection
/// files and dispatches debounced [`FileEvent`]s to a callback.
///
/// If the underlying OS watch cannot be established (missing directory,
/// exhausted inotify instances, sandboxed environment, ...), construction
/// degrades gracefully: a warning is logged and the store runs on with file
/// watching disabled rather than refusing to start.
pub struct Watcher {
    _handle: Option<thread::JoinHandle<()>>,
}

impl Watcher {
    /// Start watching `dir` for collection file changes. `on_event` is
    /// invoked on a background thread for every debounced event.
    pub fn spawn(
        dir: &Path,
        debounce: Duration,
        on_event: impl Fn(FileEvent) + Send + 'static,
    ) -> Self {
        let (tx, rx) = channel();
        let debouncer = new_debouncer(debounce, tx);
        let mut debouncer = match debouncer {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, dir = %dir.display(), "failed to initialize file watcher; running without external-change notifications");
                return Self { _handle: None };
            }
        };

        if let Err(e) = debouncer.watcher().watch(dir, RecursiveMode::NonRecursive) {
            tracing::warn!(error = %e, dir = %dir.display(), "failed to watch database directory; running without external-change notifications");
            return Self { _handle: None };
        }

        let handle = thread::spawn(move || {
            // Keep the debouncer alive for the lifetime of this thread; it
            // is dropped (and the OS watch torn down) when the loop below
            // exits, which only happens once the sender side is dropped.
            let _debouncer = debouncer;
            for result in rx {
                dispatch(result, &on_event);
            }
        });

        Self {
            _handle: Some(handle),
        }
    }
}

fn dispatch(result: DebounceEventResult, on_event: &(impl Fn(FileEvent) + Send + 'static)) {
    let events = match result {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!(error = ?e, "file watcher reported an error");
            return;
        }
    };
    for event in events {
        let Some(collection) = collection_name_for(&event.path) else {
            continue;
        };
        let file_event = match event.kind {
            DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous => {
                if event.path.is_file() {
                    FileEvent::Modified(collection)
                } else {
                    FileEvent::Deleted(collection)
                }
            }
        };
        on_event(file_event);
    }
}

/// Map a watched path to the collection it represents: the file stem of
/// any `<collection>.json` file directly inside the watched directory.
fn collection_name_for(path: &PathBuf) -> Option<CollectionName> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.starts_with('.') {
        return None;
    }
    Some(stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_name_maps_from_json_file() {
        assert_eq!(
            collection_name_for(&PathBuf::from("/db/sites.json")),
            Some("sites".to_string())
        );
    }

    #[test]
    fn non_json_files_are_ignored() {
        assert_eq!(collection_name_for(&PathBuf::from("/db/sites.txt")), None);
    }

    #[test]
    fn temp_rewrite_files_are_ignored() {
        assert_eq!(
            collection_name_for(&PathBuf::from("/db/.sites-abc123.tmp")),
            None
        );
    }

    #[test]
    fn watcher_degrades_gracefully_on_missing_directory() {
        let missing = PathBuf::from("/nonexistent/path/for/parchment/tests");
        let watcher = Watcher::spawn(&missing, Duration::from_millis(50), |_| {});
        assert!(watcher._handle.is_none());
    }
}
