//! Sliding-window circuit breaker for a failing remote host.
//!
//! Closed: calls flow, outcomes recorded in a time window. When the window
//! holds at least `minimum_throughput` samples and the failure ratio reaches
//! `failure_ratio`, the circuit opens for `break_duration`. The first caller
//! after expiry becomes the half-open probe; its success closes the circuit,
//! its failure re-opens it.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct BreakerConfig {
  pub sampling_duration: Duration,
  pub minimum_throughput: usize,
  pub failure_ratio: f64,
  pub break_duration: Duration,
}

impl Default for BreakerConfig {
  fn default() -> Self {
    Self {
      sampling_duration: Duration::from_secs(30),
      minimum_throughput: 5,
      failure_ratio: 0.5,
      break_duration: Duration::from_secs(30),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
  Closed,
  Open,
  HalfOpen,
}

impl CircuitState {
  pub fn as_str(&self) -> &'static str {
    match self {
      CircuitState::Closed => "closed",
      CircuitState::Open => "open",
      CircuitState::HalfOpen => "half_open",
    }
  }
}

#[derive(Debug)]
enum Phase {
  Closed,
  Open { until: Instant },
  HalfOpen { probe_in_flight: bool },
}

#[derive(Debug)]
struct Inner {
  phase: Phase,
  /// (timestamp, success) outcomes inside the sampling window.
  window: VecDeque<(Instant, bool)>,
  last_failure: Option<String>,
  total_calls: u64,
  failed_calls: u64,
}

pub struct CircuitBreaker {
  config: BreakerConfig,
  inner: Mutex<Inner>,
}

impl CircuitBreaker {
  pub fn new(config: BreakerConfig) -> Self {
    Self {
      config,
      inner: Mutex::new(Inner {
        phase: Phase::Closed,
        window: VecDeque::new(),
        last_failure: None,
        total_calls: 0,
        failed_calls: 0,
      }),
    }
  }

  /// Admission check. `Ok(())` admits the call (possibly as the half-open
  /// probe); `Err(retry_after)` fast-fails it.
  pub fn check(&self) -> Result<(), Duration> {
    let mut inner = self.inner.lock().expect("breaker lock poisoned");
    match inner.phase {
      Phase::Closed => Ok(()),
      Phase::Open { until } => {
        let now = Instant::now();
        if now >= until {
          info!("Circuit break expired, admitting half-open probe");
          inner.phase = Phase::HalfOpen { probe_in_flight: true };
          Ok(())
        } else {
          Err(until - now)
        }
      }
      Phase::HalfOpen { probe_in_flight } => {
        if probe_in_flight {
          // Only a single probe is admitted at a time
          Err(self.config.break_duration)
        } else {
          inner.phase = Phase::HalfOpen { probe_in_flight: true };
          Ok(())
        }
      }
    }
  }

  pub fn record_success(&self) {
    let mut inner = self.inner.lock().expect("breaker lock poisoned");
    inner.total_calls += 1;

    if matches!(inner.phase, Phase::HalfOpen { .. }) {
      info!("Half-open probe succeeded, closing circuit");
      inner.phase = Phase::Closed;
      inner.window.clear();
      return;
    }

    let now = Instant::now();
    inner.window.push_back((now, true));
    Self::prune(&mut inner.window, now, self.config.sampling_duration);
  }

  pub fn record_failure(&self, description: &str) {
    let mut inner = self.inner.lock().expect("breaker lock poisoned");
    inner.total_calls += 1;
    inner.failed_calls += 1;
    inner.last_failure = Some(description.to_string());

    if matches!(inner.phase, Phase::HalfOpen { .. }) {
      warn!("Half-open probe failed, re-opening circuit");
      inner.phase = Phase::Open {
        until: Instant::now() + self.config.break_duration,
      };
      inner.window.clear();
      return;
    }

    let now = Instant::now();
    inner.window.push_back((now, false));
    Self::prune(&mut inner.window, now, self.config.sampling_duration);

    let total = inner.window.len();
    let failures = inner.window.iter().filter(|(_, ok)| !ok).count();
    if total >= self.config.minimum_throughput && (failures as f64 / total as f64) >= self.config.failure_ratio {
      warn!(
        failures = failures,
        total = total,
        break_secs = self.config.break_duration.as_secs(),
        "Failure ratio reached, opening circuit"
      );
      inner.phase = Phase::Open {
        until: now + self.config.break_duration,
      };
      inner.window.clear();
    }
  }

  pub fn state(&self) -> CircuitState {
    let mut inner = self.inner.lock().expect("breaker lock poisoned");
    match inner.phase {
      Phase::Closed => CircuitState::Closed,
      Phase::Open { until } => {
        // An expired break is observable as half-open even before a probe
        if Instant::now() >= until {
          inner.phase = Phase::HalfOpen { probe_in_flight: false };
          CircuitState::HalfOpen
        } else {
          CircuitState::Open
        }
      }
      Phase::HalfOpen { .. } => CircuitState::HalfOpen,
    }
  }

  /// Seconds until the next admission while open; None otherwise.
  pub fn retry_after(&self) -> Option<Duration> {
    let inner = self.inner.lock().expect("breaker lock poisoned");
    match inner.phase {
      Phase::Open { until } => {
        let now = Instant::now();
        if until > now { Some(until - now) } else { None }
      }
      _ => None,
    }
  }

  pub fn last_failure(&self) -> Option<String> {
    self.inner.lock().expect("breaker lock poisoned").last_failure.clone()
  }

  /// (total, failed) call counts since construction.
  pub fn call_counts(&self) -> (u64, u64) {
    let inner = self.inner.lock().expect("breaker lock poisoned");
    (inner.total_calls, inner.failed_calls)
  }

  fn prune(window: &mut VecDeque<(Instant, bool)>, now: Instant, sampling: Duration) {
    while let Some(&(ts, _)) = window.front() {
      if now.duration_since(ts) > sampling {
        window.pop_front();
      } else {
        break;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fast_config() -> BreakerConfig {
    BreakerConfig {
      sampling_duration: Duration::from_secs(30),
      minimum_throughput: 5,
      failure_ratio: 0.5,
      break_duration: Duration::from_millis(50),
    }
  }

  #[test]
  fn test_starts_closed() {
    let breaker = CircuitBreaker::new(fast_config());
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(breaker.check().is_ok());
  }

  #[test]
  fn test_opens_at_failure_ratio() {
    let breaker = CircuitBreaker::new(fast_config());

    // Five samples with four failures crosses the 0.5 ratio
    breaker.record_failure("503");
    breaker.record_failure("503");
    breaker.record_failure("503");
    assert_eq!(breaker.state(), CircuitState::Closed); // below min throughput
    breaker.record_success();
    assert_eq!(breaker.state(), CircuitState::Closed);
    breaker.record_failure("503");

    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(breaker.check().is_err());
    assert!(breaker.retry_after().is_some());
  }

  #[test]
  fn test_below_min_throughput_never_opens() {
    let breaker = CircuitBreaker::new(fast_config());
    breaker.record_failure("x");
    breaker.record_failure("x");
    breaker.record_failure("x");
    breaker.record_failure("x");
    assert_eq!(breaker.state(), CircuitState::Closed);
  }

  #[test]
  fn test_half_open_probe_then_close() {
    let breaker = CircuitBreaker::new(fast_config());
    for _ in 0..5 {
      breaker.record_failure("503");
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    std::thread::sleep(Duration::from_millis(60));

    // First caller after expiry is the probe
    assert!(breaker.check().is_ok());
    // Second caller is rejected while the probe is in flight
    assert!(breaker.check().is_err());

    breaker.record_success();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(breaker.check().is_ok());
  }

  #[test]
  fn test_half_open_probe_failure_reopens() {
    let breaker = CircuitBreaker::new(fast_config());
    for _ in 0..5 {
      breaker.record_failure("503");
    }
    std::thread::sleep(Duration::from_millis(60));
    assert!(breaker.check().is_ok());

    breaker.record_failure("still down");
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(breaker.check().is_err());
  }

  #[test]
  fn test_mixed_outcomes_open_then_recover() {
    // 503 for the first three of five requests opens the circuit on the fifth
    let breaker = CircuitBreaker::new(fast_config());

    for i in 0..5 {
      if breaker.check().is_ok() {
        if i < 3 {
          breaker.record_failure("503");
        } else {
          breaker.record_success();
        }
      }
    }

    // Window holds 3 failures and 2 successes: ratio 0.6 at min throughput
    assert_eq!(breaker.state(), CircuitState::Open);

    std::thread::sleep(Duration::from_millis(60));
    assert!(breaker.check().is_ok()); // half-open probe admitted
    breaker.record_success();
    assert_eq!(breaker.state(), CircuitState::Closed);
  }

  #[test]
  fn test_last_failure_recorded() {
    let breaker = CircuitBreaker::new(fast_config());
    breaker.record_failure("connection refused");
    assert_eq!(breaker.last_failure().as_deref(), Some("connection refused"));
    let (total, failed) = breaker.call_counts();
    assert_eq!(total, 1);
    assert_eq!(failed, 1);
  }
}
