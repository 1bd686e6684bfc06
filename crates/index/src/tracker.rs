//! Failed-files tracker: paths the indexer could not finish.
//!
//! Pending entries are retryable service failures waiting for the embedding
//! host to recover; failed entries are permanent and only clear when the
//! file changes again. Nothing here survives a restart; activation-time
//! reconciliation supersedes the map.

use crate::watcher::FileEventKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone)]
pub enum TrackedState {
  Pending {
    event: FileEventKind,
    retry_count: u32,
    queued_at: DateTime<Utc>,
  },
  Failed {
    error: String,
  },
}

/// Diagnostic counts for the `status` surface.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TrackerStatus {
  pub pending: usize,
  pub failed: usize,
}

#[derive(Default)]
pub struct FailedFilesTracker {
  inner: RwLock<HashMap<String, TrackedState>>,
}

impl FailedFilesTracker {
  pub fn new() -> Self {
    Self::default()
  }

  /// Mark a path pending retry. Re-marking an already-pending path bumps
  /// its retry count.
  pub fn mark_pending(&self, relative_path: &str, event: FileEventKind) {
    let mut map = self.inner.write().expect("tracker lock poisoned");
    let retry_count = match map.get(relative_path) {
      Some(TrackedState::Pending { retry_count, .. }) => retry_count + 1,
      _ => 0,
    };
    map.insert(
      relative_path.to_string(),
      TrackedState::Pending {
        event,
        retry_count,
        queued_at: Utc::now(),
      },
    );
  }

  pub fn mark_failed(&self, relative_path: &str, error: &str) {
    let mut map = self.inner.write().expect("tracker lock poisoned");
    map.insert(
      relative_path.to_string(),
      TrackedState::Failed {
        error: error.to_string(),
      },
    );
  }

  pub fn remove(&self, relative_path: &str) {
    let mut map = self.inner.write().expect("tracker lock poisoned");
    map.remove(relative_path);
  }

  pub fn clear(&self) {
    self.inner.write().expect("tracker lock poisoned").clear();
  }

  pub fn get(&self, relative_path: &str) -> Option<TrackedState> {
    self.inner.read().expect("tracker lock poisoned").get(relative_path).cloned()
  }

  pub fn status(&self) -> TrackerStatus {
    let map = self.inner.read().expect("tracker lock poisoned");
    let pending = map.values().filter(|s| matches!(s, TrackedState::Pending { .. })).count();
    TrackerStatus {
      pending,
      failed: map.len() - pending,
    }
  }

  /// Every pending path with its original event kind, for the reconciler
  /// to drain.
  pub fn pending_list(&self) -> Vec<(String, FileEventKind)> {
    let map = self.inner.read().expect("tracker lock poisoned");
    let mut list: Vec<(String, FileEventKind)> = map
      .iter()
      .filter_map(|(path, state)| match state {
        TrackedState::Pending { event, .. } => Some((path.clone(), event.clone())),
        TrackedState::Failed { .. } => None,
      })
      .collect();
    list.sort_by(|a, b| a.0.cmp(&b.0));
    list
  }
}
