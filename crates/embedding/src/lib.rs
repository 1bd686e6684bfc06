pub mod breaker;
pub mod client;
pub mod health;
pub mod limiter;
pub mod provider;
pub mod resilient;
pub mod retry;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use client::HttpEmbeddingClient;
pub use health::HealthSnapshot;
pub use limiter::{ConcurrencyLimiter, LimiterConfig};
pub use provider::{EmbeddingError, EmbeddingProvider};
pub use resilient::{PipelineError, ResiliencePipeline, ResilientEmbedding, Transient};
pub use retry::{jitter_fraction, RetryPolicy};
