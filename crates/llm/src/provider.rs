use async_trait::async_trait;
use embedding::{PipelineError, ResiliencePipeline, Transient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
  System,
  User,
  Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
  pub role: ChatRole,
  pub content: String,
}

impl ChatMessage {
  pub fn system(content: impl Into<String>) -> Self {
    Self {
      role: ChatRole::System,
      content: content.into(),
    }
  }

  pub fn user(content: impl Into<String>) -> Self {
    Self {
      role: ChatRole::User,
      content: content.into(),
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
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

impl Transient for ChatError {
  fn is_transient(&self) -> bool {
    match self {
      ChatError::Network(_) | ChatError::Timeout => true,
      ChatError::Request(e) => e.is_timeout() || e.is_connect(),
      ChatError::Provider { status, .. } => *status >= 500,
      ChatError::ModelNotFound(_) => false,
    }
  }

  fn describe(&self) -> String {
    self.to_string()
  }
}

/// A chat-completion host.
#[async_trait]
pub trait ChatProvider: Send + Sync {
  fn model_id(&self) -> &str;
  async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError>;
  async fn is_available(&self) -> bool;
}

#[async_trait]
impl ChatProvider for Box<dyn ChatProvider> {
  fn model_id(&self) -> &str {
    (**self).model_id()
  }

  async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
    (**self).complete(messages).await
  }

  async fn is_available(&self) -> bool {
    (**self).is_available().await
  }
}

/// A chat provider protected by the shared resilience pipeline.
pub struct ResilientChat<P: ChatProvider> {
  inner: P,
  pipeline: Arc<ResiliencePipeline>,
}

impl<P: ChatProvider> ResilientChat<P> {
  pub fn new(inner: P, pipeline: Arc<ResiliencePipeline>) -> Self {
    Self { inner, pipeline }
  }

  pub fn pipeline(&self) -> &Arc<ResiliencePipeline> {
    &self.pipeline
  }

  pub fn model_id(&self) -> &str {
    self.inner.model_id()
  }

  pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, PipelineError<ChatError>> {
    self.pipeline.execute(|| self.inner.complete(messages)).await
  }

  pub async fn is_available(&self) -> bool {
    self.inner.is_available().await
  }
}
