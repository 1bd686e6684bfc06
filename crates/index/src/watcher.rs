//! OS-level file watching under the active docs root.

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum WatchError {
  #[error("Notify error: {0}")]
  Notify(#[from] notify::Error),
  #[error("Channel receive error")]
  ChannelRecv,
}

/// Kinds of change the pipeline understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEventKind {
  Created,
  Changed,
  Deleted,
  /// Rename preserves the old path so the indexer can delete it first.
  Renamed { old_path: PathBuf },
}

/// A change to a single file.
#[derive(Debug, Clone)]
pub struct FileEvent {
  pub path: PathBuf,
  pub kind: FileEventKind,
}

/// Wrapper over the OS watcher producing normalized events.
pub struct FileWatcher {
  _watcher: RecommendedWatcher,
  receiver: Receiver<Result<Event, notify::Error>>,
  root: PathBuf,
}

impl FileWatcher {
  pub fn new(root: &Path) -> Result<Self, WatchError> {
    let (tx, rx) = channel();

    let mut watcher = RecommendedWatcher::new(
      move |res| {
        let _ = tx.send(res);
      },
      notify::Config::default(),
    )?;

    watcher.watch(root, RecursiveMode::Recursive)?;

    Ok(Self {
      _watcher: watcher,
      receiver: rx,
      root: root.to_path_buf(),
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Drain every pending OS event (non-blocking).
  pub fn poll(&self) -> Vec<FileEvent> {
    let mut events = Vec::new();
    while let Ok(result) = self.receiver.try_recv() {
      match result {
        Ok(event) => events.extend(self.normalize(event)),
        Err(e) => warn!(error = %e, "Watch error"),
      }
    }
    events
  }

  fn normalize(&self, event: Event) -> Vec<FileEvent> {
    match event.kind {
      EventKind::Create(_) => event
        .paths
        .into_iter()
        .filter(|p| !p.is_dir())
        .map(|path| FileEvent {
          path,
          kind: FileEventKind::Created,
        })
        .collect(),
      EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
        let old_path = event.paths[0].clone();
        let new_path = event.paths[1].clone();
        vec![FileEvent {
          path: new_path,
          kind: FileEventKind::Renamed { old_path },
        }]
      }
      EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
        .paths
        .into_iter()
        .map(|path| FileEvent {
          path,
          kind: FileEventKind::Deleted,
        })
        .collect(),
      EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
        .paths
        .into_iter()
        .filter(|p| !p.is_dir())
        .map(|path| FileEvent {
          path,
          kind: FileEventKind::Created,
        })
        .collect(),
      EventKind::Modify(_) => event
        .paths
        .into_iter()
        .filter(|p| !p.is_dir())
        .map(|path| FileEvent {
          path,
          kind: FileEventKind::Changed,
        })
        .collect(),
      EventKind::Remove(_) => event
        .paths
        .into_iter()
        .map(|path| FileEvent {
          path,
          kind: FileEventKind::Deleted,
        })
        .collect(),
      other => {
        debug!(kind = ?other, "Ignoring watch event kind");
        Vec::new()
      }
    }
  }
}
