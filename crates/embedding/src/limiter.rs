//! Bounded concurrency for outbound model-host calls.
//!
//! A semaphore caps in-flight calls; a waiter counter caps the FIFO queue
//! behind it. Callers past both bounds fail immediately as rate-limited.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct LimiterConfig {
  pub max_parallelism: usize,
  pub max_queue: usize,
}

impl Default for LimiterConfig {
  fn default() -> Self {
    Self {
      max_parallelism: 2,
      max_queue: 10,
    }
  }
}

pub struct ConcurrencyLimiter {
  semaphore: Arc<Semaphore>,
  waiting: AtomicUsize,
  config: LimiterConfig,
}

/// Held for the duration of one outbound call.
pub struct Permit {
  _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
  pub fn new(config: LimiterConfig) -> Self {
    Self {
      semaphore: Arc::new(Semaphore::new(config.max_parallelism.max(1))),
      waiting: AtomicUsize::new(0),
      config,
    }
  }

  /// Acquire a call slot, waiting in FIFO order behind up to `max_queue`
  /// other callers. Returns None when the wait queue is full.
  pub async fn acquire(&self) -> Option<Permit> {
    if self.semaphore.available_permits() == 0 {
      let waiting = self.waiting.fetch_add(1, Ordering::SeqCst);
      if waiting >= self.config.max_queue {
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        return None;
      }

      let permit = Arc::clone(&self.semaphore).acquire_owned().await;
      self.waiting.fetch_sub(1, Ordering::SeqCst);
      return permit.ok().map(|p| Permit { _permit: p });
    }

    Arc::clone(&self.semaphore)
      .acquire_owned()
      .await
      .ok()
      .map(|p| Permit { _permit: p })
  }

  pub fn in_flight(&self) -> usize {
    self.config.max_parallelism.saturating_sub(self.semaphore.available_permits())
  }

  pub fn waiting(&self) -> usize {
    self.waiting.load(Ordering::SeqCst)
  }
}
