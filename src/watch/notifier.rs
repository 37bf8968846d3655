//! Debounced directory watcher backed by `notify`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{Change, ChangeBatch, ChangeKind, ChangeSource};
use crate::constants::{DEFAULT_DEBOUNCE_MS, DEFAULT_IGNORE_DIRS};
use crate::error::WatchError;

/// Tuning for [`NotifyWatcher`].
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Events arriving within this window of the first one share a batch.
    pub debounce: Duration,
    /// Directory names whose contents are never reported.
    pub ignore_dirs: Vec<String>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            ignore_dirs: DEFAULT_IGNORE_DIRS.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Recursive watcher over one directory tree.
///
/// The sequence ends once `stop` is cancelled.
pub struct NotifyWatcher {
    // Dropping the watcher unregisters it.
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    root: PathBuf,
    options: WatchOptions,
    stop: CancellationToken,
}

impl NotifyWatcher {
    /// Start watching `root` recursively.
    pub fn watch(
        root: impl AsRef<Path>,
        options: WatchOptions,
        stop: CancellationToken,
    ) -> Result<Self, WatchError> {
        let root = root.as_ref();
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());

        let (tx, events) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // Receiver gone means the watcher is being torn down.
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Register {
                path: root.clone(),
                source,
            })?;

        debug!(root = %root.display(), debounce_ms = u64::try_from(options.debounce.as_millis()).unwrap_or(u64::MAX), "Watching for changes");

        Ok(Self {
            _watcher: watcher,
            events,
            root,
            options,
            stop,
        })
    }

    /// Directory being watched.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collect(&self, event: Event, batch: &mut ChangeBatch) {
        let count = event.paths.len();
        for (index, path) in event.paths.into_iter().enumerate() {
            let Some(kind) = change_kind(&event.kind, index, count) else {
                continue;
            };
            if self.is_ignored(&path) {
                trace!(path = %path.display(), "Ignoring change");
                continue;
            }
            batch.push(Change::new(kind, path));
        }
    }

    fn is_ignored(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative.components().any(|component| {
            let name = component.as_os_str().to_string_lossy();
            self.options.ignore_dirs.iter().any(|dir| *dir == name)
        })
    }
}

/// Map a notify event kind to a change kind. `index` is the position of the
/// path within the event, which matters for renames reporting both ends.
fn change_kind(kind: &EventKind, index: usize, count: usize) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Added),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(ChangeKind::Added),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if count == 2 => {
            Some(if index == 0 { ChangeKind::Deleted } else { ChangeKind::Added })
        },
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

#[async_trait]
impl ChangeSource for NotifyWatcher {
    async fn next_batch(&mut self) -> Option<Result<ChangeBatch, WatchError>> {
        let mut batch = ChangeBatch::new();

        while batch.is_empty() {
            tokio::select! {
                biased;
                () = self.stop.cancelled() => return None,
                event = self.events.recv() => match event {
                    Some(Ok(event)) => self.collect(event, &mut batch),
                    Some(Err(e)) => return Some(Err(WatchError::Backend(e))),
                    None => return Some(Err(WatchError::Disconnected)),
                },
            }
        }

        let deadline = Instant::now() + self.options.debounce;
        loop {
            tokio::select! {
                biased;
                () = self.stop.cancelled() => return None,
                () = tokio::time::sleep_until(deadline) => break,
                event = self.events.recv() => match event {
                    Some(Ok(event)) => self.collect(event, &mut batch),
                    Some(Err(e)) => return Some(Err(WatchError::Backend(e))),
                    None => break,
                },
            }
        }

        debug!(changes = batch.len(), "Change batch ready");
        Some(Ok(batch))
    }
}
