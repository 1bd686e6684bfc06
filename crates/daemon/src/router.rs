//! JSON-RPC framing types and method dispatch.

use crate::engine::Engine;
use crate::tools::ToolHandler;
use compound_core::{EngineError, ErrorCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// JSON-RPC style request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
  #[serde(default)]
  pub id: Option<serde_json::Value>,
  pub method: String,
  #[serde(default)]
  pub params: serde_json::Value,
}

/// JSON-RPC style response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<serde_json::Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub result: Option<serde_json::Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
  pub code: i32,
  pub message: String,
  /// Structured detail: always carries `error_code`, plus fields like
  /// `circuit_state` and `retry_after_seconds` where they apply.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data: Option<serde_json::Value>,
}

impl Response {
  pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
    Self {
      id,
      result: Some(result),
      error: None,
    }
  }

  pub fn error(id: Option<serde_json::Value>, code: i32, message: &str) -> Self {
    Self {
      id,
      result: None,
      error: Some(RpcError {
        code,
        message: message.to_string(),
        data: None,
      }),
    }
  }

  pub fn error_coded(id: Option<serde_json::Value>, error_code: ErrorCode, message: &str) -> Self {
    Self::error_with_data(id, error_code, message, serde_json::Map::new())
  }

  pub fn error_with_data(
    id: Option<serde_json::Value>,
    error_code: ErrorCode,
    message: &str,
    mut data: serde_json::Map<String, serde_json::Value>,
  ) -> Self {
    data.insert("error_code".to_string(), serde_json::json!(error_code.as_str()));
    Self {
      id,
      result: None,
      error: Some(RpcError {
        code: -32000,
        message: message.to_string(),
        data: Some(serde_json::Value::Object(data)),
      }),
    }
  }

  /// Map an engine error to its wire shape. Messages stay short and never
  /// carry document content.
  pub fn from_engine_error(id: Option<serde_json::Value>, error: &EngineError) -> Self {
    let mut data = serde_json::Map::new();
    match error {
      EngineError::EmbeddingService {
        circuit_state,
        retry_after_seconds,
        ..
      } => {
        if let Some(state) = circuit_state {
          data.insert("circuit_state".to_string(), serde_json::json!(state));
        }
        if let Some(secs) = retry_after_seconds {
          data.insert("retry_after_seconds".to_string(), serde_json::json!(secs));
        }
      }
      EngineError::SchemaValidationFailed { fields } => {
        data.insert("fields".to_string(), serde_json::json!(fields));
      }
      EngineError::Internal { correlation_id, .. } => {
        data.insert("correlation_id".to_string(), serde_json::json!(correlation_id));
      }
      _ => {}
    }
    Self::error_with_data(id, error.code(), &error.to_string(), data)
  }
}

/// Request router: method name to handler.
pub struct Router {
  engine: Arc<Engine>,
  tools: ToolHandler,
  shutdown_tx: broadcast::Sender<()>,
}

impl Router {
  pub fn new(engine: Arc<Engine>) -> Self {
    let (shutdown_tx, _) = broadcast::channel(1);
    Self {
      tools: ToolHandler::new(engine.clone()),
      engine,
      shutdown_tx,
    }
  }

  pub fn engine(&self) -> &Arc<Engine> {
    &self.engine
  }

  /// Receiver that fires when a `shutdown` request arrives.
  pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
    self.shutdown_tx.subscribe()
  }

  pub async fn handle(&self, request: Request) -> Response {
    debug!(tool_name = %request.method, "Handling request");

    match request.method.as_str() {
      "ping" => Response::success(request.id, serde_json::json!("pong")),
      "status" => self.tools.status(request).await,
      "shutdown" => {
        let _ = self.shutdown_tx.send(());
        Response::success(request.id, serde_json::json!({ "status": "shutting_down" }))
      }

      "activate_project" => self.tools.activate_project(request).await,
      "deactivate_project" => self.tools.deactivate_project(request).await,

      "search" => self.tools.search(request).await,
      "rag_query" => self.tools.rag_query(request).await,
      "search_external_docs" => self.tools.search_external_docs(request).await,
      "rag_query_external" => self.tools.rag_query_external(request).await,

      "update_promotion_level" => self.tools.update_promotion_level(request).await,
      "list_doc_types" => self.tools.list_doc_types(request).await,
      "health" => self.tools.health(request).await,

      other => {
        warn!(tool_name = %other, "Unknown method");
        Response::error(request.id, -32601, &format!("Method not found: {}", other))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_response_success() {
    let response = Response::success(Some(serde_json::json!(1)), serde_json::json!("ok"));
    assert!(response.result.is_some());
    assert!(response.error.is_none());
  }

  #[test]
  fn test_error_carries_code() {
    let response = Response::error_coded(Some(serde_json::json!(1)), ErrorCode::ProjectNotActivated, "no project");
    let error = response.error.unwrap();
    assert_eq!(error.data.unwrap()["error_code"], "PROJECT_NOT_ACTIVATED");
  }

  #[test]
  fn test_embedding_error_includes_circuit_info() {
    let engine_error = EngineError::EmbeddingService {
      message: "circuit open".into(),
      circuit_state: Some("open".into()),
      retry_after_seconds: Some(30),
    };
    let response = Response::from_engine_error(Some(serde_json::json!(1)), &engine_error);
    let data = response.error.unwrap().data.unwrap();
    assert_eq!(data["error_code"], "EMBEDDING_SERVICE_ERROR");
    assert_eq!(data["circuit_state"], "open");
    assert_eq!(data["retry_after_seconds"], 30);
  }
}
