//! The indexer: brings the store into agreement with a single file.
//!
//! One event in, one committed outcome out. Single-file faults never stop
//! the pipeline; they land in the failed-files tracker as pending (service
//! faults, retried on drain) or failed (permanent and content faults).

use crate::chunker::Chunker;
use crate::links::LinkGraph;
use crate::parser::{parse_markdown, resolve_internal, LinkTarget, ParseError, ParsedDocument};
use crate::scanner::{read_with_retry, ScannedFile, Scanner};
use crate::tracker::FailedFilesTracker;
use crate::watcher::{FileEvent, FileEventKind};
use compound_core::{
  content_hash, validate_frontmatter, ChunkId, DocumentId, EngineError, PromotionLevel, TenantKey,
};
use db::{ChunkRecord, DbError, DocumentRecord, ExternalChunkRecord, ExternalDocumentRecord, Store, TenantFilter};
use embedding::{jitter_fraction, EmbeddingProvider, PipelineError, ResilientEmbedding};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type SharedEmbedder = Arc<ResilientEmbedding<Box<dyn EmbeddingProvider>>>;

#[derive(Error, Debug)]
pub enum IndexError {
  #[error("Transient failure: {0}")]
  Transient(String),
  #[error("Permanent failure: {0}")]
  Permanent(String),
  #[error("Content failure: {0}")]
  Content(String),
  #[error("Service failure: {message}")]
  Service {
    message: String,
    circuit_state: Option<String>,
    retry_after_seconds: Option<u64>,
  },
  #[error("Document not found: {0}")]
  NotFound(String),
  #[error(transparent)]
  Database(#[from] DbError),
}

/// What the indexer did with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
  Indexed { chunks: usize },
  Unchanged,
  Deleted,
  /// Service fault; the path is parked in the tracker for a later drain.
  Pending,
  /// Content or permanent fault, or a path outside the configured globs.
  Skipped,
}

/// Everything tenant-scoped the indexer needs for one project.
pub struct IndexContext {
  pub tenant: TenantKey,
  pub docs_root: PathBuf,
  pub scanner: Arc<Scanner>,
}

impl IndexContext {
  pub fn filter(&self) -> TenantFilter {
    TenantFilter::new(&self.tenant)
  }

  /// Docs-root-relative `/`-separated path for an absolute path.
  pub fn relative_path(&self, absolute: &Path) -> Option<String> {
    absolute
      .strip_prefix(&self.docs_root)
      .ok()
      .map(|p| p.to_string_lossy().replace('\\', "/"))
  }
}

pub struct Indexer {
  store: Store,
  embedder: SharedEmbedder,
  graph: Arc<LinkGraph>,
  tracker: Arc<FailedFilesTracker>,
  chunker: Chunker,
}

impl Indexer {
  pub fn new(store: Store, embedder: SharedEmbedder, graph: Arc<LinkGraph>, tracker: Arc<FailedFilesTracker>) -> Self {
    Self {
      store,
      embedder,
      graph,
      tracker,
      chunker: Chunker::default(),
    }
  }

  pub fn tracker(&self) -> &Arc<FailedFilesTracker> {
    &self.tracker
  }

  pub fn graph(&self) -> &Arc<LinkGraph> {
    &self.graph
  }

  /// Process one debounced event. Faults are absorbed: classified, logged,
  /// and recorded in the tracker. The pipeline always moves on.
  pub async fn handle_event(&self, ctx: &IndexContext, event: &FileEvent) -> IndexOutcome {
    let relative = match ctx.relative_path(&event.path) {
      Some(r) => r,
      None => {
        debug!(path = ?event.path, "Event outside docs root, skipping");
        return IndexOutcome::Skipped;
      }
    };
    if !ctx.scanner.matches(&relative) {
      debug!(document_path = %relative, "Event outside configured globs, skipping");
      return IndexOutcome::Skipped;
    }

    let result = match &event.kind {
      FileEventKind::Deleted => self.delete_document(ctx, &relative).await,
      FileEventKind::Renamed { old_path } => {
        if let Some(old_relative) = ctx.relative_path(old_path) {
          if let Err(e) = self.delete_document(ctx, &old_relative).await {
            warn!(document_path = %old_relative, error = %e, "Failed to delete renamed-away path");
          }
        }
        self.index_file(ctx, &relative, &event.path).await
      }
      FileEventKind::Created | FileEventKind::Changed => self.index_file(ctx, &relative, &event.path).await,
    };

    match result {
      Ok(outcome) => {
        self.tracker.remove(&relative);
        outcome
      }
      Err(IndexError::Service {
        message,
        circuit_state,
        ..
      }) => {
        info!(
          document_path = %relative,
          error_code = "EMBEDDING_SERVICE_ERROR",
          circuit_state = circuit_state.as_deref().unwrap_or("closed"),
          "Service unavailable, parking file for retry: {}", message
        );
        self.tracker.mark_pending(&relative, event.kind.clone());
        IndexOutcome::Pending
      }
      Err(IndexError::Content(message)) => {
        warn!(document_path = %relative, error_code = "SCHEMA_VALIDATION_FAILED", "Skipping file: {}", message);
        self.tracker.mark_failed(&relative, &message);
        IndexOutcome::Skipped
      }
      Err(IndexError::Permanent(message)) => {
        warn!(document_path = %relative, error_code = "FILE_SYSTEM_ERROR", "Skipping file: {}", message);
        self.tracker.mark_failed(&relative, &message);
        IndexOutcome::Skipped
      }
      Err(e) => {
        warn!(document_path = %relative, error = %e, "Indexing failed");
        self.tracker.mark_failed(&relative, &e.to_string());
        IndexOutcome::Skipped
      }
    }
  }

  async fn delete_document(&self, ctx: &IndexContext, relative: &str) -> Result<IndexOutcome, IndexError> {
    let filter = ctx.filter();
    let deleted = with_db_retry(|| self.store.delete_document_by_path(&filter, relative)).await?;

    self.graph.remove(relative);
    self.tracker.remove(relative);

    if deleted.is_some() {
      info!(document_path = %relative, event_type = "deleted", "Document removed from store");
      Ok(IndexOutcome::Deleted)
    } else {
      debug!(document_path = %relative, "Delete for unindexed path, nothing to do");
      Ok(IndexOutcome::Deleted)
    }
  }

  async fn index_file(&self, ctx: &IndexContext, relative: &str, absolute: &Path) -> Result<IndexOutcome, IndexError> {
    let bytes = match read_with_retry(absolute) {
      Ok(b) => b,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        // The file vanished between the event and the read
        debug!(document_path = %relative, "File gone after event, treating as delete");
        return self.delete_document(ctx, relative).await;
      }
      Err(e) => return Err(classify_io(&e)),
    };

    let hash = content_hash(&bytes);
    let filter = ctx.filter();

    let existing = with_db_retry(|| self.store.get_document_by_path(&filter, relative)).await?;
    if let Some(ref doc) = existing {
      if doc.content_hash == hash {
        debug!(document_path = %relative, "Content hash unchanged, no-op");
        return Ok(IndexOutcome::Unchanged);
      }
    }

    let parsed = parse_markdown(&bytes).map_err(|e| match e {
      ParseError::InvalidEncoding => IndexError::Permanent(e.to_string()),
      ParseError::Frontmatter(_) => IndexError::Content(e.to_string()),
    })?;

    let raw_frontmatter = parsed
      .frontmatter
      .clone()
      .ok_or_else(|| IndexError::Content("document has no frontmatter".to_string()))?;
    let frontmatter = validate_frontmatter(&raw_frontmatter).map_err(|e| match e {
      EngineError::SchemaValidationFailed { fields } => IndexError::Content(format!("frontmatter: {}", fields.join("; "))),
      other => IndexError::Content(other.to_string()),
    })?;

    // Embed everything before writing anything, so a service fault leaves
    // the store untouched and reconciliation can retry the whole file.
    let body_vector = self.embed(&parsed.body).await?;

    let pieces = self.chunker.chunk(&parsed);
    let mut chunk_records = Vec::with_capacity(pieces.len());
    for piece in &pieces {
      let vector = self.embed(&piece.content).await?;
      chunk_records.push(ChunkRecord {
        id: ChunkId::new().as_uuid(),
        document_id: Uuid::nil(), // bound to the stored document id at write time
        tenant: ctx.tenant.clone(),
        chunk_index: piece.index as i32,
        header_path: piece.header_path.clone(),
        content: piece.content.clone(),
        promotion_level: frontmatter.promotion_level,
        embedding: Some(vector),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
      });
    }

    let record = DocumentRecord {
      id: existing.map(|d| d.id).unwrap_or_else(|| DocumentId::new().as_uuid()),
      tenant: ctx.tenant.clone(),
      relative_path: relative.to_string(),
      title: frontmatter.title.clone(),
      summary: Some(frontmatter.summary.clone()),
      doc_type: frontmatter.doc_type.as_str().to_string(),
      promotion_level: frontmatter.promotion_level,
      content_hash: hash,
      char_count: parsed.body.len() as i32,
      content: parsed.body.clone(),
      frontmatter: Some(frontmatter.raw.clone()),
      embedding: Some(body_vector),
      created_at: chrono::Utc::now(),
      updated_at: chrono::Utc::now(),
    };

    // Document row and chunk set commit in one transaction scope
    with_db_retry(|| self.store.upsert_document_with_chunks(&record, &chunk_records)).await?;

    self.update_link_graph(ctx, relative, &parsed);

    info!(
      document_path = %relative,
      event_type = "indexed",
      chunk_count = chunk_records.len(),
      "Document indexed"
    );
    Ok(IndexOutcome::Indexed {
      chunks: chunk_records.len(),
    })
  }

  /// Index one file from the external docs root. External documents skip
  /// frontmatter schema validation; whatever frontmatter exists is stored
  /// as-is.
  pub async fn index_external(&self, ctx: &IndexContext, scanned: &ScannedFile) -> Result<IndexOutcome, IndexError> {
    let bytes = read_with_retry(&scanned.absolute_path).map_err(|e| classify_io(&e))?;
    let hash = content_hash(&bytes);

    let parsed = parse_markdown(&bytes).map_err(|e| match e {
      ParseError::InvalidEncoding => IndexError::Permanent(e.to_string()),
      ParseError::Frontmatter(_) => IndexError::Content(e.to_string()),
    })?;

    let title = parsed
      .frontmatter
      .as_ref()
      .and_then(|fm| fm.get("title"))
      .and_then(|t| t.as_str())
      .map(String::from)
      .or_else(|| parsed.first_heading.clone())
      .unwrap_or_else(|| file_stem(&scanned.relative_path));

    let body_vector = self.embed(&parsed.body).await?;

    let pieces = self.chunker.chunk(&parsed);
    let mut chunk_records = Vec::with_capacity(pieces.len());
    for piece in &pieces {
      let vector = self.embed(&piece.content).await?;
      chunk_records.push(ExternalChunkRecord {
        id: ChunkId::new().as_uuid(),
        document_id: Uuid::nil(),
        tenant: ctx.tenant.clone(),
        chunk_index: piece.index as i32,
        header_path: piece.header_path.clone(),
        content: piece.content.clone(),
        embedding: Some(vector),
      });
    }

    let record = ExternalDocumentRecord {
      id: DocumentId::new().as_uuid(),
      tenant: ctx.tenant.clone(),
      relative_path: scanned.relative_path.clone(),
      title,
      summary: None,
      doc_type: "reference".to_string(),
      content_hash: hash,
      char_count: parsed.body.len() as i32,
      content: parsed.body.clone(),
      frontmatter: parsed.frontmatter.clone(),
      embedding: Some(body_vector),
      created_at: chrono::Utc::now(),
      updated_at: chrono::Utc::now(),
    };

    // External document row and chunk set commit in one transaction scope
    with_db_retry(|| self.store.upsert_external_document_with_chunks(&record, &chunk_records)).await?;

    Ok(IndexOutcome::Indexed {
      chunks: chunk_records.len(),
    })
  }

  /// Promotion update: document row and every chunk move together in one
  /// store transaction, then the file's frontmatter field is rewritten.
  pub async fn update_promotion(
    &self,
    ctx: &IndexContext,
    relative: &str,
    level: PromotionLevel,
  ) -> Result<(), IndexError> {
    let filter = ctx.filter();
    let document = with_db_retry(|| self.store.get_document_by_path(&filter, relative))
      .await?
      .ok_or_else(|| IndexError::NotFound(relative.to_string()))?;

    with_db_retry(|| self.store.update_promotion(document.id, level)).await?;

    let absolute = ctx.docs_root.join(relative);
    rewrite_promotion_frontmatter(&absolute, level).map_err(|e| classify_io(&e))?;

    info!(document_path = %relative, promotion_level = level.as_str(), "Promotion level updated");
    Ok(())
  }

  fn update_link_graph(&self, ctx: &IndexContext, relative: &str, parsed: &ParsedDocument) {
    let mut targets = Vec::new();
    for link in &parsed.links {
      let internal = matches!(
        link.target,
        LinkTarget::InternalDocument | LinkTarget::InternalDocumentWithAnchor
      );
      if !internal {
        continue;
      }
      let Some(ref path) = link.path else { continue };
      let Some(resolved) = resolve_internal(relative, path) else {
        continue;
      };
      // Keep only targets that exist (or are expected) under the docs root
      if ctx.docs_root.join(&resolved).exists() || self.graph.get_outgoing(&resolved).len() > 0 {
        targets.push(resolved);
      }
    }
    self.graph.replace_outgoing(relative, targets);
  }

  async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
    match self.embedder.embed(text).await {
      Ok(vector) => Ok(vector),
      Err(PipelineError::CircuitOpen { retry_after }) => Err(IndexError::Service {
        message: "embedding circuit open".to_string(),
        circuit_state: Some("open".to_string()),
        retry_after_seconds: Some(retry_after.as_secs().max(1)),
      }),
      Err(PipelineError::RateLimited) => Err(IndexError::Service {
        message: "embedding host rate limited".to_string(),
        circuit_state: None,
        retry_after_seconds: None,
      }),
      Err(PipelineError::Timeout(d)) => Err(IndexError::Service {
        message: format!("embedding call timed out after {:?}", d),
        circuit_state: None,
        retry_after_seconds: None,
      }),
      Err(PipelineError::Inner(e)) if e.is_transient() => Err(IndexError::Service {
        message: e.to_string(),
        circuit_state: None,
        retry_after_seconds: None,
      }),
      Err(PipelineError::Inner(e)) => Err(IndexError::Content(format!("embedding rejected content: {}", e))),
    }
  }
}

fn file_stem(relative: &str) -> String {
  relative
    .rsplit('/')
    .next()
    .unwrap_or(relative)
    .trim_end_matches(".md")
    .to_string()
}

fn classify_io(error: &std::io::Error) -> IndexError {
  use std::io::ErrorKind;
  match error.kind() {
    ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::PermissionDenied => {
      IndexError::Transient(error.to_string())
    }
    ErrorKind::InvalidData => IndexError::Permanent(error.to_string()),
    _ => IndexError::Permanent(error.to_string()),
  }
}

/// Retry transient store failures in-process: three attempts at
/// 100/200/400ms plus jitter.
pub async fn with_db_retry<T, F, Fut>(operation: F) -> Result<T, DbError>
where
  F: Fn() -> Fut,
  Fut: std::future::Future<Output = Result<T, DbError>>,
{
  let mut last = None;
  for attempt in 0..3u32 {
    if attempt > 0 {
      let base = 100u64 * (1 << (attempt - 1));
      let delay = base as f64 * (1.0 + jitter_fraction() * 0.2);
      tokio::time::sleep(Duration::from_millis(delay as u64)).await;
    }
    match operation().await {
      Ok(value) => return Ok(value),
      Err(e) if e.is_transient() => {
        debug!(attempt_number = attempt + 1, error = %e, "Transient store error, retrying");
        last = Some(e);
      }
      Err(e) => return Err(e),
    }
  }
  Err(last.expect("retry loop always records an error"))
}

/// Rewrite the `promotion_level` field inside a file's frontmatter block,
/// inserting it when absent.
fn rewrite_promotion_frontmatter(path: &Path, level: PromotionLevel) -> std::io::Result<()> {
  let content = std::fs::read_to_string(path)?;
  let mut lines: Vec<&str> = content.lines().collect();

  if lines.first().map(|l| l.trim_end()) != Some("---") {
    return Ok(()); // no frontmatter to rewrite
  }

  let close = lines
    .iter()
    .enumerate()
    .skip(1)
    .find(|(_, l)| l.trim_end() == "---")
    .map(|(i, _)| i);
  let Some(close) = close else {
    return Ok(());
  };

  let replacement = format!("promotion_level: {}", level.as_str());
  let existing = lines[1..close]
    .iter()
    .position(|l| l.trim_start().starts_with("promotion_level:"));

  match existing {
    Some(offset) => lines[1 + offset] = &replacement,
    None => lines.insert(close, &replacement),
  }

  let mut updated = lines.join("\n");
  if content.ends_with('\n') {
    updated.push('\n');
  }
  std::fs::write(path, updated)
}
