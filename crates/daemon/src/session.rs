//! Process-wide session state: either inactive or exactly one active
//! project. Only the activation orchestrator writes; every tool call reads.

use chrono::{DateTime, Utc};
use compound_core::TenantKey;
use std::path::PathBuf;
use std::sync::RwLock;

#[derive(Debug, Clone)]
pub struct ActiveSession {
  pub config_path: PathBuf,
  pub repo_root: PathBuf,
  pub docs_root: PathBuf,
  pub tenant: TenantKey,
  pub activated_at: DateTime<Utc>,
}

/// Single-valued session holder behind a reader-preferred lock. Readers
/// never observe a torn value; writes happen only during activation and
/// deactivation.
#[derive(Default)]
pub struct SessionState {
  inner: RwLock<Option<ActiveSession>>,
}

impl SessionState {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get_active(&self) -> Option<ActiveSession> {
    self.inner.read().expect("session lock poisoned").clone()
  }

  pub fn is_active(&self) -> bool {
    self.inner.read().expect("session lock poisoned").is_some()
  }

  pub fn set_active(&self, session: ActiveSession) {
    let mut guard = self.inner.write().expect("session lock poisoned");
    *guard = Some(session);
  }

  pub fn clear_active(&self) -> Option<ActiveSession> {
    let mut guard = self.inner.write().expect("session lock poisoned");
    guard.take()
  }
}
