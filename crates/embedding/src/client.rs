use crate::{EmbeddingError, EmbeddingProvider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DEFAULT_EMBEDDING_URL: &str = "http://127.0.0.1:11435";
const DEFAULT_MODEL: &str = "mxbai-embed-large";
const DEFAULT_DIMENSIONS: usize = 1024;

/// HTTP client for the embedding host.
#[derive(Debug, Clone)]
pub struct HttpEmbeddingClient {
  client: reqwest::Client,
  base_url: String,
  model: String,
  dimensions: usize,
}

impl Default for HttpEmbeddingClient {
  fn default() -> Self {
    Self::new()
  }
}

impl HttpEmbeddingClient {
  pub fn new() -> Self {
    Self {
      client: reqwest::Client::new(),
      base_url: DEFAULT_EMBEDDING_URL.to_string(),
      model: DEFAULT_MODEL.to_string(),
      dimensions: DEFAULT_DIMENSIONS,
    }
  }

  pub fn with_host(mut self, host: &str, port: u16) -> Self {
    self.base_url = format!("http://{}:{}", host, port);
    self
  }

  pub fn with_url(mut self, url: impl Into<String>) -> Self {
    self.base_url = url.into();
    self
  }

  pub fn with_model(mut self, model: impl Into<String>, dimensions: usize) -> Self {
    self.model = model.into();
    self.dimensions = dimensions;
    self
  }

  fn embeddings_url(&self) -> String {
    format!("{}/api/embeddings", self.base_url)
  }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
  model: &'a str,
  prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
  embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
  fn name(&self) -> &str {
    "http"
  }

  fn model_id(&self) -> &str {
    &self.model
  }

  fn dimensions(&self) -> usize {
    self.dimensions
  }

  async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    let request = EmbeddingRequest {
      model: &self.model,
      prompt: text,
    };

    debug!(chars = text.len(), model = %self.model, "Requesting embedding");

    let response = self
      .client
      .post(self.embeddings_url())
      .json(&request)
      .send()
      .await
      .map_err(|e| {
        if e.is_connect() {
          EmbeddingError::Network(e.to_string())
        } else {
          EmbeddingError::Request(e)
        }
      })?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      warn!(status = status.as_u16(), "Embedding request failed");
      if status.as_u16() == 404 && body.contains("model") {
        return Err(EmbeddingError::ModelNotFound(self.model.clone()));
      }
      return Err(EmbeddingError::Provider {
        status: status.as_u16(),
        message: body,
      });
    }

    let result: EmbeddingResponse = response.json().await?;

    if result.embedding.len() != self.dimensions {
      warn!(
        got = result.embedding.len(),
        expected = self.dimensions,
        "Unexpected embedding dimensions"
      );
    }

    Ok(result.embedding)
  }

  async fn is_available(&self) -> bool {
    match self
      .client
      .get(&self.base_url)
      .timeout(std::time::Duration::from_secs(5))
      .send()
      .await
    {
      Ok(response) => response.status().is_success(),
      Err(_) => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_client_defaults() {
    let client = HttpEmbeddingClient::new();
    assert_eq!(client.model_id(), DEFAULT_MODEL);
    assert_eq!(client.dimensions(), DEFAULT_DIMENSIONS);
    assert_eq!(client.embeddings_url(), "http://127.0.0.1:11435/api/embeddings");
  }

  #[test]
  fn test_client_customization() {
    let client = HttpEmbeddingClient::new()
      .with_host("embedder.local", 9999)
      .with_model("custom-model", 768);
    assert_eq!(client.base_url, "http://embedder.local:9999");
    assert_eq!(client.model_id(), "custom-model");
    assert_eq!(client.dimensions(), 768);
  }

  // Integration test requires a live embedding host
  #[tokio::test]
  async fn test_embed_live() {
    let client = HttpEmbeddingClient::new();
    if !client.is_available().await {
      eprintln!("Embedding host not available, skipping test");
      return;
    }

    let embedding = client.embed("Hello, world!").await.unwrap();
    assert_eq!(embedding.len(), client.dimensions());
  }
}
