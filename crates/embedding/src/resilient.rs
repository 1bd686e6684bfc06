//! Composition of the outbound-call protections, outside-in:
//! concurrency limiter, then retry, then circuit breaker.
//!
//! The pipeline is generic over the call's error type so the embedding and
//! chat clients share one implementation.

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::health::HealthSnapshot;
use crate::limiter::{ConcurrencyLimiter, LimiterConfig};
use crate::provider::{EmbeddingError, EmbeddingProvider};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Errors transient enough to retry; they also count toward the circuit
/// window.
pub trait Transient {
  fn is_transient(&self) -> bool;
  fn describe(&self) -> String;
}

impl Transient for EmbeddingError {
  fn is_transient(&self) -> bool {
    EmbeddingError::is_transient(self)
  }

  fn describe(&self) -> String {
    self.to_string()
  }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError<E> {
  #[error("Rate limited: concurrency queue is full")]
  RateLimited,
  #[error("Circuit open, retry after {retry_after:?}")]
  CircuitOpen { retry_after: Duration },
  #[error("Call timed out after {0:?}")]
  Timeout(Duration),
  #[error(transparent)]
  Inner(E),
}

impl<E> PipelineError<E> {
  pub fn circuit_state(&self) -> Option<&'static str> {
    match self {
      PipelineError::CircuitOpen { .. } => Some("open"),
      _ => None,
    }
  }
}

struct PipelineParts {
  limiter: Arc<ConcurrencyLimiter>,
  breaker: Arc<CircuitBreaker>,
  retry: RetryPolicy,
  call_timeout: Duration,
}

/// Shared resilience wrapper around any outbound HTTP call.
///
/// Reconfigurable at project switch: new limits and a fresh (closed)
/// circuit are swapped in atomically; calls already in flight finish under
/// the parts they started with.
pub struct ResiliencePipeline {
  parts: std::sync::RwLock<PipelineParts>,
}

impl ResiliencePipeline {
  pub fn new(limiter: LimiterConfig, breaker: BreakerConfig, retry: RetryPolicy, call_timeout: Duration) -> Self {
    Self {
      parts: std::sync::RwLock::new(PipelineParts {
        limiter: Arc::new(ConcurrencyLimiter::new(limiter)),
        breaker: Arc::new(CircuitBreaker::new(breaker)),
        retry,
        call_timeout,
      }),
    }
  }

  pub fn with_defaults(call_timeout: Duration) -> Self {
    Self::new(
      LimiterConfig::default(),
      BreakerConfig::default(),
      RetryPolicy::default(),
      call_timeout,
    )
  }

  /// Replace limits and reset the circuit, e.g. when a project with its
  /// own resilience settings activates.
  pub fn reconfigure(&self, limiter: LimiterConfig, breaker: BreakerConfig, retry: RetryPolicy) {
    let mut parts = self.parts.write().expect("pipeline lock poisoned");
    parts.limiter = Arc::new(ConcurrencyLimiter::new(limiter));
    parts.breaker = Arc::new(CircuitBreaker::new(breaker));
    parts.retry = retry;
  }

  pub fn breaker(&self) -> Arc<CircuitBreaker> {
    self.parts.read().expect("pipeline lock poisoned").breaker.clone()
  }

  pub fn health(&self) -> HealthSnapshot {
    HealthSnapshot::from_breaker(&self.breaker())
  }

  /// Run one logical call through limiter, retry, and breaker.
  pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, PipelineError<E>>
  where
    E: Transient,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    let (limiter, breaker, retry, call_timeout) = {
      let parts = self.parts.read().expect("pipeline lock poisoned");
      (
        parts.limiter.clone(),
        parts.breaker.clone(),
        parts.retry.clone(),
        parts.call_timeout,
      )
    };

    let _permit = match limiter.acquire().await {
      Some(p) => p,
      None => {
        warn!("Concurrency queue full, failing call as rate-limited");
        return Err(PipelineError::RateLimited);
      }
    };

    let mut last_error: Option<PipelineError<E>> = None;

    for attempt in 0..retry.max_attempts {
      if attempt > 0 {
        let delay = retry.delay_for(attempt - 1);
        debug!(attempt_number = attempt + 1, delay_ms = delay.as_millis() as u64, "Retrying call");
        sleep(delay).await;
      }

      if let Err(retry_after) = breaker.check() {
        // No retry when the circuit rejects the attempt
        return Err(PipelineError::CircuitOpen { retry_after });
      }

      match timeout(call_timeout, operation()).await {
        Ok(Ok(value)) => {
          breaker.record_success();
          return Ok(value);
        }
        Ok(Err(e)) => {
          if e.is_transient() {
            breaker.record_failure(&e.describe());
            warn!(attempt_number = attempt + 1, error = %e.describe(), "Transient call failure");
            last_error = Some(PipelineError::Inner(e));
            continue;
          }
          // Content errors do not trip the breaker and are not retried
          return Err(PipelineError::Inner(e));
        }
        Err(_) => {
          breaker.record_failure("timeout");
          warn!(
            attempt_number = attempt + 1,
            timeout_ms = call_timeout.as_millis() as u64,
            "Call timed out"
          );
          last_error = Some(PipelineError::Timeout(call_timeout));
          continue;
        }
      }
    }

    Err(last_error.unwrap_or(PipelineError::RateLimited))
  }
}

/// An embedding provider protected by the resilience pipeline.
pub struct ResilientEmbedding<P: EmbeddingProvider> {
  inner: P,
  pipeline: Arc<ResiliencePipeline>,
}

impl<P: EmbeddingProvider> ResilientEmbedding<P> {
  pub fn new(inner: P, pipeline: Arc<ResiliencePipeline>) -> Self {
    Self { inner, pipeline }
  }

  pub fn pipeline(&self) -> &Arc<ResiliencePipeline> {
    &self.pipeline
  }

  pub fn health(&self) -> HealthSnapshot {
    self.pipeline.health()
  }

  pub async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError<EmbeddingError>> {
    self.pipeline.execute(|| self.inner.embed(text)).await
  }

  pub fn dimensions(&self) -> usize {
    self.inner.dimensions()
  }

  pub fn model_id(&self) -> &str {
    self.inner.model_id()
  }

  pub async fn is_available(&self) -> bool {
    self.inner.is_available().await
  }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for ResilientEmbedding<P> {
  fn name(&self) -> &str {
    self.inner.name()
  }

  fn model_id(&self) -> &str {
    self.inner.model_id()
  }

  fn dimensions(&self) -> usize {
    self.inner.dimensions()
  }

  async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    match self.pipeline.execute(|| self.inner.embed(text)).await {
      Ok(v) => Ok(v),
      Err(PipelineError::Inner(e)) => Err(e),
      Err(PipelineError::Timeout(_)) => Err(EmbeddingError::Timeout),
      Err(PipelineError::RateLimited) => Err(EmbeddingError::Network("rate limited".to_string())),
      Err(PipelineError::CircuitOpen { .. }) => Err(EmbeddingError::NotAvailable),
    }
  }

  async fn is_available(&self) -> bool {
    self.inner.is_available().await
  }
}
