//! Schema file watching.
//!
//! Watches the directory holding the schema file (editors often replace the
//! file instead of writing in place, which a watch on the file itself would
//! miss) and forwards changes to that one file name over a channel.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use rapidapi_core::{Error, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Change notification for the watched schema file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChange {
    pub path: PathBuf,
}

/// Active watch on one schema file. Dropping it stops the watch.
pub struct SchemaWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl SchemaWatcher {
    /// Start watching `path`, sending a [`SchemaChange`] for every write.
    pub fn new(path: &Path, changes: mpsc::UnboundedSender<SchemaChange>) -> Result<Self> {
        let path = std::path::absolute(path)?;
        let directory = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::InvalidInput(format!("cannot watch {}", path.display())))?;
        let file_name: OsString = path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| Error::InvalidInput(format!("cannot watch {}", path.display())))?;

        let reported = path.clone();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    if is_content_change(&event.kind)
                        && event
                            .paths
                            .iter()
                            .any(|p| p.file_name() == Some(file_name.as_os_str()))
                    {
                        let _ = changes.send(SchemaChange {
                            path: reported.clone(),
                        });
                    }
                }
                Err(e) => warn!(error = %e, "Watch error"),
            }
        })
        .map_err(|e| Error::Runtime(format!("failed to create file watcher: {}", e)))?;

        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .map_err(|e| {
                Error::Runtime(format!(
                    "failed to watch {}: {}",
                    directory.display(),
                    e
                ))
            })?;

        debug!(path = %path.display(), "Watching schema file");
        Ok(Self {
            _watcher: watcher,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Modify(_) | EventKind::Create(_))
}
