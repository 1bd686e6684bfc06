use async_trait::async_trait;

/// A single-text embedding source with a fixed output dimensionality.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
  fn name(&self) -> &str;
  fn model_id(&self) -> &str;
  fn dimensions(&self) -> usize;

  async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
  async fn is_available(&self) -> bool;
}

#[async_trait]
impl EmbeddingProvider for Box<dyn EmbeddingProvider> {
  fn name(&self) -> &str {
    (**self).name()
  }

  fn model_id(&self) -> &str {
    (**self).model_id()
  }

  fn dimensions(&self) -> usize {
    (**self).dimensions()
  }

  async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    (**self).embed(text).await
  }

  async fn is_available(&self) -> bool {
    (**self).is_available().await
  }
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
  #[error("Provider not available")]
  NotAvailable,
  #[error("Request failed: {0}")]
  Request(#[from] reqwest::Error),
  #[error("Provider error (status {status}): {message}")]
  Provider { status: u16, message: String },
  #[error("Network error: {0}")]
  Network(String),
  #[error("Model not found: {0}")]
  ModelNotFound(String),
  #[error("Request timed out")]
  Timeout,
}

impl EmbeddingError {
  /// Transient errors are worth retrying and count toward the circuit window.
  pub fn is_transient(&self) -> bool {
    match self {
      EmbeddingError::Network(_) | EmbeddingError::Timeout => true,
      EmbeddingError::Request(e) => e.is_timeout() || e.is_connect(),
      EmbeddingError::Provider { status, .. } => *status >= 500,
      EmbeddingError::NotAvailable | EmbeddingError::ModelNotFound(_) => false,
    }
  }
}
