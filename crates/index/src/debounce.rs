//! Per-path debouncing and the bounded delivery queue.
//!
//! Raw OS events land in a per-path table; each new event re-arms that
//! path's timer and coalesces with the pending kind. When a timer fires the
//! entry is delivered exactly once into a bounded queue drained by the
//! single indexer worker. A full queue drops its oldest entry; the
//! reconciler recovers anything dropped.

use crate::watcher::{FileEvent, FileEventKind};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, warn};

pub const EVENT_QUEUE_CAPACITY: usize = 1000;

#[derive(Debug)]
struct PendingEvent {
  kind: FileEventKind,
  deadline: Instant,
}

/// Per-path coalescing table.
pub struct Debouncer {
  window: Duration,
  pending: HashMap<PathBuf, PendingEvent>,
}

impl Debouncer {
  pub fn new(window: Duration) -> Self {
    Self {
      window,
      pending: HashMap::new(),
    }
  }

  pub fn pending_count(&self) -> usize {
    self.pending.len()
  }

  /// Record a raw event, coalescing with any pending one for the path and
  /// re-arming its timer.
  pub fn observe(&mut self, event: FileEvent) {
    self.observe_at(event, Instant::now());
  }

  fn observe_at(&mut self, event: FileEvent, now: Instant) {
    let deadline = now + self.window;

    match self.pending.remove(&event.path) {
      None => {
        self.pending.insert(event.path, PendingEvent { kind: event.kind, deadline });
      }
      Some(existing) => {
        let coalesced = coalesce(existing.kind, event.kind);
        match coalesced {
          None => {
            // Created then deleted inside the window: nothing happened
            debug!(path = ?event.path, "Coalesced to nothing, dropping");
          }
          Some(kind) => {
            self.pending.insert(event.path, PendingEvent { kind, deadline });
          }
        }
      }
    }
  }

  /// Remove and return every entry whose timer has fired.
  pub fn collect_ready(&mut self) -> Vec<FileEvent> {
    self.collect_ready_at(Instant::now())
  }

  fn collect_ready_at(&mut self, now: Instant) -> Vec<FileEvent> {
    let ready_paths: Vec<PathBuf> = self
      .pending
      .iter()
      .filter(|(_, p)| now >= p.deadline)
      .map(|(path, _)| path.clone())
      .collect();

    let mut ready = Vec::with_capacity(ready_paths.len());
    for path in ready_paths {
      if let Some(pending) = self.pending.remove(&path) {
        ready.push(FileEvent {
          path,
          kind: pending.kind,
        });
      }
    }
    ready
  }

  /// Drop all pending state without delivering (deactivation).
  pub fn clear(&mut self) {
    self.pending.clear();
  }
}

/// Coalescing matrix: (existing, incoming) -> result. None cancels the
/// entry entirely.
fn coalesce(existing: FileEventKind, incoming: FileEventKind) -> Option<FileEventKind> {
  use FileEventKind::*;

  match (existing, incoming) {
    (Created, Changed) => Some(Created),
    (Created, Deleted) => None,
    (Changed, Changed) => Some(Changed),
    (Changed, Deleted) => Some(Deleted),
    (Renamed { old_path }, Changed) => Some(Renamed { old_path }),
    (Renamed { .. }, Deleted) => Some(Deleted),
    (Deleted, Created) => Some(Created),
    (_, incoming) => Some(incoming),
  }
}

/// Bounded single-reader queue between the debouncer and the indexer
/// worker. Drop-oldest on overflow.
pub struct DeliveryQueue {
  inner: Mutex<VecDeque<FileEvent>>,
  notify: Notify,
  capacity: usize,
}

impl Default for DeliveryQueue {
  fn default() -> Self {
    Self::with_capacity(EVENT_QUEUE_CAPACITY)
  }
}

impl DeliveryQueue {
  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      inner: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
      notify: Notify::new(),
      capacity,
    }
  }

  pub fn push(&self, event: FileEvent) {
    {
      let mut queue = self.inner.lock().expect("queue lock poisoned");
      if queue.len() >= self.capacity {
        let dropped = queue.pop_front();
        warn!(path = ?dropped.map(|e| e.path), "Event queue full, dropping oldest");
      }
      queue.push_back(event);
    }
    self.notify.notify_one();
  }

  /// Await the next event. Single reader.
  pub async fn pop(&self) -> FileEvent {
    loop {
      {
        let mut queue = self.inner.lock().expect("queue lock poisoned");
        if let Some(event) = queue.pop_front() {
          return event;
        }
      }
      self.notify.notified().await;
    }
  }

  pub fn try_pop(&self) -> Option<FileEvent> {
    self.inner.lock().expect("queue lock poisoned").pop_front()
  }

  pub fn len(&self) -> usize {
    self.inner.lock().expect("queue lock poisoned").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn clear(&self) {
    self.inner.lock().expect("queue lock poisoned").clear();
  }
}
