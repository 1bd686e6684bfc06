//! The retrieval planner: query embedding, tenant-filtered vector search,
//! promotion-aware ordering, and BFS link expansion with relevance decay.

use compound_core::PromotionLevel;
use db::{DbError, DocumentRecord, Store, TenantFilter};
use embedding::PipelineError;
use index::{LinkGraph, SharedEmbedder};
use std::cmp::Ordering;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum RetrievalError {
  #[error("Embedding service unavailable: {message}")]
  EmbeddingUnavailable {
    message: String,
    circuit_state: Option<String>,
    retry_after_seconds: Option<u64>,
  },
  #[error(transparent)]
  Database(#[from] DbError),
}

#[derive(Debug, Clone)]
pub struct RetrieveParams {
  pub top_k: usize,
  pub min_relevance: f32,
  pub max_depth: usize,
  pub max_linked_docs: usize,
  pub doc_type: Option<String>,
  pub promotion: Option<PromotionLevel>,
}

impl Default for RetrieveParams {
  fn default() -> Self {
    Self {
      top_k: 10,
      min_relevance: 0.7,
      max_depth: 2,
      max_linked_docs: 5,
      doc_type: None,
      promotion: None,
    }
  }
}

#[derive(Debug, Clone)]
pub struct PrimaryResult {
  pub record: DocumentRecord,
  pub similarity: f32,
}

#[derive(Debug, Clone)]
pub struct LinkedResult {
  pub record: DocumentRecord,
  pub linked_from: String,
  pub link_depth: usize,
  pub score: f32,
}

pub struct RetrievalPlanner {
  store: Store,
  embedder: SharedEmbedder,
  graph: Arc<LinkGraph>,
}

impl RetrievalPlanner {
  pub fn new(store: Store, embedder: SharedEmbedder, graph: Arc<LinkGraph>) -> Self {
    Self { store, embedder, graph }
  }

  /// Full retrieval: primary hits plus link-expanded related documents.
  pub async fn retrieve(
    &self,
    filter: &TenantFilter,
    query: &str,
    params: &RetrieveParams,
  ) -> Result<(Vec<PrimaryResult>, Vec<LinkedResult>), RetrievalError> {
    let query_vector = self.embed_query(query).await?;

    let hits = self
      .store
      .vector_search_documents(
        filter,
        &query_vector,
        params.top_k,
        params.min_relevance,
        params.doc_type.as_deref(),
        params.promotion,
      )
      .await?;

    let mut primary: Vec<PrimaryResult> = hits
      .into_iter()
      .map(|hit| PrimaryResult {
        record: hit.record,
        similarity: hit.similarity,
      })
      .collect();

    // Promotion outranks similarity; similarity breaks ties
    primary.sort_by(|a, b| {
      b.record
        .promotion_level
        .rank()
        .cmp(&a.record.promotion_level.rank())
        .then(b.similarity.partial_cmp(&a.similarity).unwrap_or(Ordering::Equal))
    });

    let linked = self.expand_links(filter, &primary, params).await?;

    debug!(
      primary = primary.len(),
      linked = linked.len(),
      "Retrieval plan complete"
    );
    Ok((primary, linked))
  }

  /// Retrieval over the external collections: no promotion, no links.
  pub async fn retrieve_external(
    &self,
    filter: &TenantFilter,
    query: &str,
    k: usize,
    min_relevance: f32,
  ) -> Result<Vec<PrimaryResult>, RetrievalError> {
    let query_vector = self.embed_query(query).await?;

    let hits = self.store.vector_search_external(filter, &query_vector, k, min_relevance).await?;

    Ok(
      hits
        .into_iter()
        .map(|hit| PrimaryResult {
          record: hit.record,
          similarity: hit.similarity,
        })
        .collect(),
    )
  }

  async fn expand_links(
    &self,
    filter: &TenantFilter,
    primary: &[PrimaryResult],
    params: &RetrieveParams,
  ) -> Result<Vec<LinkedResult>, RetrievalError> {
    if params.max_depth == 0 || params.max_linked_docs == 0 || primary.is_empty() {
      return Ok(Vec::new());
    }

    let seeds: Vec<String> = primary.iter().map(|p| p.record.relative_path.clone()).collect();
    let visits = self.graph.bfs_traverse(&seeds, params.max_depth, params.max_linked_docs);
    if visits.is_empty() {
      return Ok(Vec::new());
    }

    let paths: Vec<String> = visits.iter().map(|v| v.path.clone()).collect();
    let records = self.store.get_documents_by_paths(filter, &paths).await?;

    let mut linked = Vec::with_capacity(visits.len());
    for visit in &visits {
      let Some(record) = records.iter().find(|r| r.relative_path == visit.path) else {
        warn!(document_path = %visit.path, "Linked document missing from store, dropping");
        continue;
      };

      let fan_in = self.graph.seed_link_count(&seeds, &visit.path);
      let score = link_score(visit.depth, record.promotion_level, fan_in);
      linked.push(LinkedResult {
        record: record.clone(),
        linked_from: visit.linked_from.clone(),
        link_depth: visit.depth,
        score,
      });
    }

    linked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    linked.truncate(params.max_linked_docs);
    Ok(linked)
  }

  async fn embed_query(&self, query: &str) -> Result<Vec<f32>, RetrievalError> {
    self.embedder.embed(query).await.map_err(|e| match e {
      PipelineError::CircuitOpen { retry_after } => RetrievalError::EmbeddingUnavailable {
        message: "embedding circuit open".to_string(),
        circuit_state: Some("open".to_string()),
        retry_after_seconds: Some(retry_after.as_secs().max(1)),
      },
      other => RetrievalError::EmbeddingUnavailable {
        message: other.to_string(),
        circuit_state: None,
        retry_after_seconds: None,
      },
    })
  }
}

/// Relevance score for a link-expanded document.
///
/// Base 0.8 decays by 0.9 per depth step past the first; promotion
/// multiplies; fan-in from multiple seeds adds up to 20%. Clamped to [0, 1].
pub fn link_score(depth: usize, promotion: PromotionLevel, seed_link_count: usize) -> f32 {
  let depth = depth.max(1);
  let decay = 0.9f32.powi(depth as i32 - 1);
  let fan_in_bonus = 1.0 + (0.05 * seed_link_count.saturating_sub(1) as f32).min(0.2);
  (0.8 * decay * promotion.score_multiplier() * fan_in_bonus).clamp(0.0, 1.0)
}
