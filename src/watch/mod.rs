//! File change batches and the sources that produce them.
//!
//! The supervisor consumes any [`ChangeSource`]. The default source is
//! [`NotifyWatcher`], a debounced adapter over the `notify` crate. Tests and
//! embedders can feed batches through a plain `tokio::sync::mpsc` channel.

mod notifier;


use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::WatchError;

pub use self::notifier::{NotifyWatcher, WatchOptions};

/// Kind of file-system mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// One changed path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Change {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

impl Change {
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Ordered set of changes observed since the previous batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    changes: Vec<Change>,
}

impl ChangeBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a change unless the same (kind, path) pair is already present.
    pub fn push(&mut self, change: Change) {
        if !self.changes.contains(&change) {
            self.changes.push(change);
        }
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }

    /// Returns true if any changed path ends with one of `suffixes`.
    pub fn touches_source<S: AsRef<str>>(&self, suffixes: &[S]) -> bool {
        self.changes
            .iter()
            .any(|change| is_source_path(&change.path, suffixes))
    }
}

impl FromIterator<Change> for ChangeBatch {
    fn from_iter<I: IntoIterator<Item = Change>>(iter: I) -> Self {
        let mut batch = Self::new();
        for change in iter {
            batch.push(change);
        }
        batch
    }
}

impl<'a> IntoIterator for &'a ChangeBatch {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Suffix match on the full path string.
pub fn is_source_path<S: AsRef<str>>(path: &Path, suffixes: &[S]) -> bool {
    let path = path.to_string_lossy();
    suffixes
        .iter()
        .any(|suffix| !suffix.as_ref().is_empty() && path.ends_with(suffix.as_ref()))
}

/// Asynchronous sequence of change batches.
///
/// `None` ends the sequence: the source was stopped. An `Err` is a backend
/// failure and is fatal to the supervisor.
#[async_trait]
pub trait ChangeSource: Send + 'static {
    async fn next_batch(&mut self) -> Option<Result<ChangeBatch, WatchError>>;
}

#[async_trait]
impl ChangeSource for mpsc::Receiver<Result<ChangeBatch, WatchError>> {
    async fn next_batch(&mut self) -> Option<Result<ChangeBatch, WatchError>> {
        self.recv().await
    }
}
