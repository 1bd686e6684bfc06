use crate::breaker::{CircuitBreaker, CircuitState};
use serde::Serialize;

/// Point-in-time view of the resilience pipeline for the `health` tool.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
  pub circuit_state: String,
  pub retry_after_seconds: Option<u64>,
  pub last_failure: Option<String>,
  pub total_calls: u64,
  pub failed_calls: u64,
  /// Fraction of calls that succeeded over the process lifetime.
  pub availability: f64,
}

impl HealthSnapshot {
  pub fn from_breaker(breaker: &CircuitBreaker) -> Self {
    let (total, failed) = breaker.call_counts();
    let availability = if total == 0 {
      1.0
    } else {
      (total - failed) as f64 / total as f64
    };

    Self {
      circuit_state: breaker.state().as_str().to_string(),
      retry_after_seconds: breaker.retry_after().map(|d| d.as_secs().max(1)),
      last_failure: breaker.last_failure(),
      total_calls: total,
      failed_calls: failed,
      availability,
    }
  }

  pub fn is_open(&self) -> bool {
    self.circuit_state == CircuitState::Open.as_str()
  }
}
