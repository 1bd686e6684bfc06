use crate::provider::{ChatError, ChatMessage, ChatProvider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DEFAULT_CHAT_URL: &str = "http://127.0.0.1:11435";
const DEFAULT_MODEL: &str = "llama3.1";

/// HTTP client for the chat-completion host.
#[derive(Debug, Clone)]
pub struct HttpChatClient {
  client: reqwest::Client,
  base_url: String,
  model: String,
}

impl Default for HttpChatClient {
  fn default() -> Self {
    Self::new()
  }
}

impl HttpChatClient {
  pub fn new() -> Self {
    Self {
      client: reqwest::Client::new(),
      base_url: DEFAULT_CHAT_URL.to_string(),
      model: DEFAULT_MODEL.to_string(),
    }
  }

  pub fn with_host(mut self, host: &str, port: u16) -> Self {
    self.base_url = format!("http://{}:{}", host, port);
    self
  }

  pub fn with_model(mut self, model: impl Into<String>) -> Self {
    self.model = model.into();
    self
  }

  fn chat_url(&self) -> String {
    format!("{}/api/chat", self.base_url)
  }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
  model: &'a str,
  messages: &'a [ChatMessage],
  stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
  message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
  content: String,
}

#[async_trait]
impl ChatProvider for HttpChatClient {
  fn model_id(&self) -> &str {
    &self.model
  }

  async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
    let request = ChatRequest {
      model: &self.model,
      messages,
      stream: false,
    };

    debug!(model = %self.model, messages = messages.len(), "Requesting chat completion");

    let response = self.client.post(self.chat_url()).json(&request).send().await.map_err(|e| {
      if e.is_connect() {
        ChatError::Network(e.to_string())
      } else {
        ChatError::Request(e)
      }
    })?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      warn!(status = status.as_u16(), "Chat request failed");
      if status.as_u16() == 404 && body.contains("model") {
        return Err(ChatError::ModelNotFound(self.model.clone()));
      }
      return Err(ChatError::Provider {
        status: status.as_u16(),
        message: body,
      });
    }

    let result: ChatResponse = response.json().await?;
    Ok(result.message.content)
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
