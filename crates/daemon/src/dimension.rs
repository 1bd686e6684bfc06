//! Startup dimension validation: the embedder's declared output size, a
//! live probe embedding, and every existing vector column must agree.
//! Any mismatch is fatal for the activation.

use compound_core::EngineError;
use db::{Collection, Store};
use embedding::PipelineError;
use index::SharedEmbedder;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Validate embedder and store dimensionality, bounded by `timeout`.
pub async fn validate_dimensions(store: &Store, embedder: &SharedEmbedder, timeout: Duration) -> Result<(), EngineError> {
  match tokio::time::timeout(timeout, run_validation(store, embedder)).await {
    Ok(result) => result,
    Err(_) => Err(EngineError::DimensionMismatch(format!(
      "dimension validation timed out after {}s; check that the embedding host and store are reachable",
      timeout.as_secs()
    ))),
  }
}

async fn run_validation(store: &Store, embedder: &SharedEmbedder) -> Result<(), EngineError> {
  let expected = embedder.dimensions();

  let probe = embedder.embed("dimension validation probe").await.map_err(|e| match e {
    PipelineError::Inner(inner) => EngineError::EmbeddingService {
      message: format!("dimension probe failed: {}", inner),
      circuit_state: None,
      retry_after_seconds: None,
    },
    other => EngineError::EmbeddingService {
      message: format!("dimension probe failed: {}", other),
      circuit_state: other.circuit_state().map(String::from),
      retry_after_seconds: None,
    },
  })?;

  if probe.len() != expected {
    return Err(EngineError::DimensionMismatch(format!(
      "embedding model produced {} dimensions but {} are configured; update the configured dimensions or switch models",
      probe.len(),
      expected
    )));
  }

  for collection in Collection::ALL {
    let stored = db::schema::vector_column_dim(store.pool(), collection)
      .await
      .map_err(|e| EngineError::Database(e.to_string()))?;

    match stored {
      None => {
        // Collection not created yet; it will be created at the
        // configured dimension.
      }
      Some(dim) if dim == expected => {}
      Some(dim) => {
        return Err(EngineError::DimensionMismatch(format!(
          "store collection '{}' has vector dimension {} but the embedder produces {}; re-create the collection or \
           re-embed with a matching model",
          collection.table_name(),
          dim,
          expected
        )));
      }
    }
  }

  info!(dimensions = expected, "Dimension validation passed");
  Ok(())
}

/// Log the prominent warning for a configured skip.
pub fn warn_validation_skipped() {
  warn!("DIMENSION VALIDATION SKIPPED by configuration; mismatched embeddings will corrupt search results");
}
