//! Switchable view of the active project's configuration.
//!
//! Consumers read the current config per call instead of caching derived
//! state; anything that does materialize options subscribes to the change
//! channel and re-derives when the generation ticks.

use compound_core::ProjectConfig;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

pub struct ConfigProvider {
  current: RwLock<Option<Arc<ProjectConfig>>>,
  generation: watch::Sender<u64>,
}

impl Default for ConfigProvider {
  fn default() -> Self {
    Self::new()
  }
}

impl ConfigProvider {
  pub fn new() -> Self {
    let (generation, _) = watch::channel(0);
    Self {
      current: RwLock::new(None),
      generation,
    }
  }

  /// Atomically switch to a new project config, invalidating every
  /// subscriber's derived state.
  pub fn switch_to(&self, config: ProjectConfig) {
    {
      let mut guard = self.current.write().expect("config lock poisoned");
      *guard = Some(Arc::new(config));
    }
    self.generation.send_modify(|g| *g += 1);
  }

  /// Clear on deactivation.
  pub fn clear(&self) {
    {
      let mut guard = self.current.write().expect("config lock poisoned");
      *guard = None;
    }
    self.generation.send_modify(|g| *g += 1);
  }

  pub fn current(&self) -> Option<Arc<ProjectConfig>> {
    self.current.read().expect("config lock poisoned").clone()
  }

  /// Change notifications: the value is a generation counter that bumps on
  /// every switch or clear.
  pub fn subscribe(&self) -> watch::Receiver<u64> {
    self.generation.subscribe()
  }
}
