//! Tool handlers behind the JSON-RPC surface. Every handler except
//! activation and the meta endpoints requires an active session.

use crate::engine::Engine;
use crate::router::{Request, Response};
use crate::session::ActiveSession;
use compound_core::{EngineError, ErrorCode, PromotionLevel, BUILTIN_DOC_TYPES};
use db::TenantFilter;
use index::IndexError;
use retrieval::{RagOptions, RetrievalError, RetrieveParams};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

pub struct ToolHandler {
  engine: Arc<Engine>,
}

impl ToolHandler {
  pub fn new(engine: Arc<Engine>) -> Self {
    Self { engine }
  }

  /// Gate: an inactive session fails every data tool the same way.
  fn require_session(&self, id: &Option<serde_json::Value>) -> Result<(ActiveSession, TenantFilter), Box<Response>> {
    match self.engine.session.get_active() {
      Some(session) => {
        let filter = TenantFilter::new(&session.tenant);
        Ok((session, filter))
      }
      None => Err(Box::new(Response::error_coded(
        id.clone(),
        ErrorCode::ProjectNotActivated,
        "No project is activated; call activate_project first",
      ))),
    }
  }

  fn invalid_params(id: Option<serde_json::Value>, error: impl std::fmt::Display) -> Response {
    Response::error(id, -32602, &format!("Invalid params: {}", error))
  }

  pub async fn status(&self, request: Request) -> Response {
    let session = self.engine.session.get_active();
    let tracker = self.engine.tracker.status();

    let result = serde_json::json!({
      "status": "running",
      "version": env!("CARGO_PKG_VERSION"),
      "session": session.map(|s| serde_json::json!({
        "project_name": s.tenant.project_name,
        "branch_name": s.tenant.branch_name,
        "path_hash": s.tenant.path_hash,
        "docs_root": s.docs_root.to_string_lossy(),
        "activated_at": s.activated_at.to_rfc3339(),
      })),
      "tracker": tracker,
      "queued_events": self.engine.queue.len(),
    });
    Response::success(request.id, result)
  }

  pub async fn activate_project(&self, request: Request) -> Response {
    #[derive(Deserialize)]
    struct Args {
      config_path: String,
      branch_name: String,
    }

    let args: Args = match serde_json::from_value(request.params.clone()) {
      Ok(a) => a,
      Err(e) => return Self::invalid_params(request.id, e),
    };

    let start = Instant::now();
    let correlation_id = Uuid::new_v4();

    match self.engine.activate(std::path::Path::new(&args.config_path), &args.branch_name).await {
      Ok(summary) => {
        info!(
          tool_name = "activate_project",
          correlation_id = %correlation_id,
          project_name = %summary.project_name,
          branch_name = %summary.branch_name,
          elapsed_ms = start.elapsed().as_millis() as u64,
          "Activation complete"
        );
        Response::success(request.id, serde_json::to_value(summary).unwrap_or_default())
      }
      Err(e) => {
        warn!(
          tool_name = "activate_project",
          correlation_id = %correlation_id,
          error_code = e.code().as_str(),
          "Activation failed"
        );
        Response::from_engine_error(request.id, &e)
      }
    }
  }

  pub async fn deactivate_project(&self, request: Request) -> Response {
    match self.engine.deactivate().await {
      Ok(()) => Response::success(request.id, serde_json::json!({ "status": "deactivated" })),
      Err(e) => Response::from_engine_error(request.id, &e),
    }
  }

  pub async fn search(&self, request: Request) -> Response {
    #[derive(Deserialize)]
    struct Args {
      query: String,
      #[serde(default)]
      top_k: Option<usize>,
      #[serde(default)]
      min_relevance: Option<f32>,
      #[serde(default)]
      doc_type: Option<String>,
      #[serde(default)]
      promotion: Option<String>,
    }

    let args: Args = match serde_json::from_value(request.params.clone()) {
      Ok(a) => a,
      Err(e) => return Self::invalid_params(request.id, e),
    };
    let (_, filter) = match self.require_session(&request.id) {
      Ok(v) => v,
      Err(r) => return *r,
    };

    let promotion = match args.promotion.as_deref().map(str::parse::<PromotionLevel>).transpose() {
      Ok(p) => p,
      Err(e) => return Self::invalid_params(request.id, e),
    };

    let config = self.engine.config.current();
    let defaults = config.as_deref().map(|c| c.retrieval.clone()).unwrap_or_default();

    let params = RetrieveParams {
      top_k: args.top_k.unwrap_or(defaults.top_k),
      min_relevance: args.min_relevance.unwrap_or(defaults.min_relevance_score),
      max_depth: 0, // primary results only
      max_linked_docs: 0,
      doc_type: args.doc_type,
      promotion,
    };

    let start = Instant::now();
    let correlation_id = Uuid::new_v4();

    match self.engine.planner.retrieve(&filter, &args.query, &params).await {
      Ok((primary, _)) => {
        info!(
          tool_name = "search",
          correlation_id = %correlation_id,
          results = primary.len(),
          elapsed_ms = start.elapsed().as_millis() as u64,
          "Search complete"
        );
        let results: Vec<serde_json::Value> = primary.iter().map(primary_to_json).collect();
        Response::success(request.id, serde_json::json!(results))
      }
      Err(e) => retrieval_error_response(request.id, e),
    }
  }

  pub async fn rag_query(&self, request: Request) -> Response {
    #[derive(Deserialize)]
    struct Args {
      query: String,
      #[serde(default)]
      top_k: Option<usize>,
      #[serde(default)]
      min_relevance: Option<f32>,
      #[serde(default)]
      max_depth: Option<usize>,
      #[serde(default)]
      max_linked_docs: Option<usize>,
      #[serde(default)]
      include_linked: Option<bool>,
    }

    let args: Args = match serde_json::from_value(request.params.clone()) {
      Ok(a) => a,
      Err(e) => return Self::invalid_params(request.id, e),
    };
    let (_, filter) = match self.require_session(&request.id) {
      Ok(v) => v,
      Err(r) => return *r,
    };

    let config = self.engine.config.current();
    let retrieval_defaults = config.as_deref().map(|c| c.retrieval.clone()).unwrap_or_default();
    let link_defaults = config.as_deref().map(|c| c.link_resolution.clone()).unwrap_or_default();

    let include_linked = args.include_linked.unwrap_or(true);
    let params = RetrieveParams {
      top_k: args.top_k.unwrap_or(retrieval_defaults.top_k),
      min_relevance: args.min_relevance.unwrap_or(retrieval_defaults.min_relevance_score),
      max_depth: if include_linked {
        args.max_depth.unwrap_or(link_defaults.max_depth)
      } else {
        0
      },
      max_linked_docs: args.max_linked_docs.unwrap_or(retrieval_defaults.max_linked_docs),
      doc_type: None,
      promotion: None,
    };

    let start = Instant::now();
    let correlation_id = Uuid::new_v4();

    let (primary, linked) = match self.engine.planner.retrieve(&filter, &args.query, &params).await {
      Ok(results) => results,
      Err(e) => return retrieval_error_response(request.id, e),
    };

    let options = RagOptions {
      include_linked,
      ..Default::default()
    };

    match self.engine.generator.answer(&args.query, &primary, &linked, &options).await {
      Ok(answer) => {
        info!(
          tool_name = "rag_query",
          correlation_id = %correlation_id,
          primary = answer.citations_primary.len(),
          linked = answer.citations_linked.len(),
          elapsed_ms = start.elapsed().as_millis() as u64,
          "RAG query complete"
        );
        Response::success(
          request.id,
          serde_json::json!({
            "answer": answer.answer,
            "citations_primary": answer.citations_primary,
            "citations_linked": answer.citations_linked,
          }),
        )
      }
      Err(e) => rag_error_response(request.id, e),
    }
  }

  pub async fn search_external_docs(&self, request: Request) -> Response {
    #[derive(Deserialize)]
    struct Args {
      query: String,
      #[serde(default)]
      k: Option<usize>,
      #[serde(default)]
      min_relevance: Option<f32>,
    }

    let args: Args = match serde_json::from_value(request.params.clone()) {
      Ok(a) => a,
      Err(e) => return Self::invalid_params(request.id, e),
    };
    let (_, filter) = match self.require_session(&request.id) {
      Ok(v) => v,
      Err(r) => return *r,
    };
    if let Some(response) = self.require_external_docs(&request.id) {
      return response;
    }

    let defaults = self
      .engine
      .config
      .current()
      .as_deref()
      .map(|c| c.retrieval.clone())
      .unwrap_or_default();

    match self
      .engine
      .planner
      .retrieve_external(
        &filter,
        &args.query,
        args.k.unwrap_or(defaults.top_k),
        args.min_relevance.unwrap_or(defaults.min_relevance_score),
      )
      .await
    {
      Ok(results) => {
        let results: Vec<serde_json::Value> = results.iter().map(primary_to_json).collect();
        Response::success(request.id, serde_json::json!(results))
      }
      Err(e) => retrieval_error_response(request.id, e),
    }
  }

  pub async fn rag_query_external(&self, request: Request) -> Response {
    #[derive(Deserialize)]
    struct Args {
      query: String,
      #[serde(default)]
      k: Option<usize>,
      #[serde(default)]
      min_relevance: Option<f32>,
    }

    let args: Args = match serde_json::from_value(request.params.clone()) {
      Ok(a) => a,
      Err(e) => return Self::invalid_params(request.id, e),
    };
    let (_, filter) = match self.require_session(&request.id) {
      Ok(v) => v,
      Err(r) => return *r,
    };
    if let Some(response) = self.require_external_docs(&request.id) {
      return response;
    }

    let defaults = self
      .engine
      .config
      .current()
      .as_deref()
      .map(|c| c.retrieval.clone())
      .unwrap_or_default();

    let primary = match self
      .engine
      .planner
      .retrieve_external(
        &filter,
        &args.query,
        args.k.unwrap_or(defaults.top_k),
        args.min_relevance.unwrap_or(defaults.min_relevance_score),
      )
      .await
    {
      Ok(results) => results,
      Err(e) => return retrieval_error_response(request.id, e),
    };

    // External retrieval never expands links
    let options = RagOptions {
      include_linked: false,
      ..Default::default()
    };

    match self.engine.generator.answer(&args.query, &primary, &[], &options).await {
      Ok(answer) => Response::success(
        request.id,
        serde_json::json!({
          "answer": answer.answer,
          "citations_primary": answer.citations_primary,
        }),
      ),
      Err(e) => rag_error_response(request.id, e),
    }
  }

  pub async fn update_promotion_level(&self, request: Request) -> Response {
    #[derive(Deserialize)]
    struct Args {
      relative_path: String,
      level: String,
    }

    let args: Args = match serde_json::from_value(request.params.clone()) {
      Ok(a) => a,
      Err(e) => return Self::invalid_params(request.id, e),
    };
    if let Err(r) = self.require_session(&request.id) {
      return *r;
    }

    let level: PromotionLevel = match args.level.parse() {
      Ok(l) => l,
      Err(e) => return Self::invalid_params(request.id, e),
    };

    let Some(ctx) = self.engine.current_index_ctx() else {
      return Response::error_coded(
        request.id,
        ErrorCode::ProjectNotActivated,
        "No project is activated; call activate_project first",
      );
    };

    match self.engine.indexer.update_promotion(&ctx, &args.relative_path, level).await {
      Ok(()) => Response::success(
        request.id,
        serde_json::json!({
          "relative_path": args.relative_path,
          "promotion_level": level.as_str(),
        }),
      ),
      Err(e) => index_error_response(request.id, e),
    }
  }

  pub async fn list_doc_types(&self, request: Request) -> Response {
    if let Err(r) = self.require_session(&request.id) {
      return *r;
    }

    let mut types: Vec<serde_json::Value> = BUILTIN_DOC_TYPES
      .iter()
      .map(|name| {
        serde_json::json!({
          "name": name,
          "builtin": true,
        })
      })
      .collect();

    if let Some(config) = self.engine.config.current() {
      for custom in &config.custom_doc_types {
        types.push(serde_json::json!({
          "name": custom.name,
          "description": custom.description,
          "folder": custom.folder,
          "builtin": false,
        }));
      }
    }

    Response::success(request.id, serde_json::json!(types))
  }

  pub async fn health(&self, request: Request) -> Response {
    let embedding_health = self.engine.embedder.health();
    let store_ok = self.engine.store.ping().await.is_ok();
    let tracker = self.engine.tracker.status();

    // A recovered host with parked files is the drain trigger
    if !embedding_health.is_open() && tracker.pending > 0 && self.engine.session.is_active() {
      let engine = self.engine.clone();
      tokio::spawn(async move {
        match engine.drain_pending().await {
          Ok(n) => info!(drained = n, "Pending files rescheduled after recovery"),
          Err(e) => warn!(error = %e, "Pending drain failed"),
        }
      });
    }

    Response::success(
      request.id,
      serde_json::json!({
        "embedding": embedding_health,
        "store": { "reachable": store_ok },
        "tracker": tracker,
        "session_active": self.engine.session.is_active(),
      }),
    )
  }

  fn require_external_docs(&self, id: &Option<serde_json::Value>) -> Option<Response> {
    let configured = self
      .engine
      .config
      .current()
      .map(|c| c.external_docs.is_some())
      .unwrap_or(false);
    if configured {
      None
    } else {
      Some(Response::error_coded(
        id.clone(),
        ErrorCode::ExternalDocsNotConfigured,
        "external_docs is not configured for this project",
      ))
    }
  }
}

fn primary_to_json(result: &retrieval::PrimaryResult) -> serde_json::Value {
  let record = &result.record;
  serde_json::json!({
    "relative_path": record.relative_path,
    "title": record.title,
    "summary": record.summary,
    "doc_type": record.doc_type,
    "promotion_level": record.promotion_level.as_str(),
    "similarity": result.similarity,
  })
}

fn retrieval_error_response(id: Option<serde_json::Value>, error: RetrievalError) -> Response {
  match error {
    RetrievalError::EmbeddingUnavailable {
      message,
      circuit_state,
      retry_after_seconds,
    } => Response::from_engine_error(
      id,
      &EngineError::EmbeddingService {
        message,
        circuit_state,
        retry_after_seconds,
      },
    ),
    RetrievalError::Database(e) => Response::from_engine_error(id, &EngineError::Database(e.to_string())),
  }
}

fn rag_error_response(id: Option<serde_json::Value>, error: retrieval::rag::RagError) -> Response {
  match error {
    retrieval::rag::RagError::ChatUnavailable {
      message,
      circuit_state,
      retry_after_seconds,
    } => Response::from_engine_error(
      id,
      &EngineError::EmbeddingService {
        message,
        circuit_state,
        retry_after_seconds,
      },
    ),
  }
}

fn index_error_response(id: Option<serde_json::Value>, error: IndexError) -> Response {
  match error {
    IndexError::NotFound(path) => Response::from_engine_error(
      id,
      &EngineError::internal(format!("document not found: {}", path)),
    ),
    IndexError::Service {
      message,
      circuit_state,
      retry_after_seconds,
    } => Response::from_engine_error(
      id,
      &EngineError::EmbeddingService {
        message,
        circuit_state,
        retry_after_seconds,
      },
    ),
    IndexError::Content(message) => Response::from_engine_error(
      id,
      &EngineError::SchemaValidationFailed {
        fields: vec![message],
      },
    ),
    IndexError::Database(e) => Response::from_engine_error(id, &EngineError::Database(e.to_string())),
    other => Response::from_engine_error(
      id,
      &EngineError::FileSystem {
        path: String::new(),
        message: other.to_string(),
      },
    ),
  }
}
