//! Retry policy for transient model-host failures.
//!
//! Exponential delays of 1s/2s/4s by default, with jitter drawn from
//! [0, 0.2 x delay] so synchronized clients fan out.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
  /// Total attempts including the first call.
  pub max_attempts: u32,
  pub initial_delay: Duration,
  pub multiplier: f64,
  /// Upper bound of the jitter window as a fraction of the delay.
  pub jitter: f64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      initial_delay: Duration::from_secs(1),
      multiplier: 2.0,
      jitter: 0.2,
    }
  }
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
    Self {
      max_attempts,
      initial_delay,
      ..Default::default()
    }
  }

  /// Delay before retry number `retry` (0-based), jitter included.
  pub fn delay_for(&self, retry: u32) -> Duration {
    let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(retry as i32);
    let jittered = base * (1.0 + jitter_fraction() * self.jitter);
    Duration::from_secs_f64(jittered)
  }

  /// Delay without jitter, for deterministic assertions.
  pub fn base_delay_for(&self, retry: u32) -> Duration {
    Duration::from_secs_f64(self.initial_delay.as_secs_f64() * self.multiplier.powi(retry as i32))
  }
}

/// A cheap pseudo-random fraction in [0, 1) for jitter (no RNG dependency).
pub fn jitter_fraction() -> f64 {
  use std::time::{SystemTime, UNIX_EPOCH};

  let nanos = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .subsec_nanos();

  (nanos as f64 / u32::MAX as f64).fract()
}
