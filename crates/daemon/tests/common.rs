//! Shared fixtures for daemon integration tests.
//!
//! Store-backed tests need a Postgres with the pgvector extension at the
//! default launch-contract address (127.0.0.1:5433). When it is not
//! reachable the tests print a notice and return early.

use async_trait::async_trait;
use daemon::{Engine, Request, Router};
use db::{PostgresOptions, Store};
use embedding::{EmbeddingError, EmbeddingProvider, ResiliencePipeline, ResilientEmbedding};
use llm::{ChatError, ChatMessage, ChatProvider, ResilientChat};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const MOCK_DIMS: usize = 8;

/// Deterministic embedding: known keywords map to orthogonal axes, so a
/// query containing "alpha" has cosine similarity 1.0 with a document body
/// containing "alpha" and 0.0 with the others.
pub struct KeywordEmbedder;

fn keyword_vector(text: &str) -> Vec<f32> {
  let keywords = ["alpha", "beta", "gamma", "delta", "epsilon", "zeta"];
  let mut v = vec![0.0f32; MOCK_DIMS];
  for (i, kw) in keywords.iter().enumerate() {
    if text.to_lowercase().contains(kw) {
      v[i] = 1.0;
    }
  }
  if v.iter().all(|&x| x == 0.0) {
    v[MOCK_DIMS - 1] = 1.0;
  }
  let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
  v.iter().map(|x| x / norm).collect()
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
  fn name(&self) -> &str {
    "keyword-mock"
  }
  fn model_id(&self) -> &str {
    "keyword-mock"
  }
  fn dimensions(&self) -> usize {
    MOCK_DIMS
  }

  async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    Ok(keyword_vector(text))
  }

  async fn is_available(&self) -> bool {
    true
  }
}

/// An embedder that fails until told otherwise, for degraded-mode tests.
pub struct SwitchableEmbedder {
  healthy: Arc<std::sync::atomic::AtomicBool>,
}

impl SwitchableEmbedder {
  /// Starts unhealthy; flip the returned flag to bring the host back.
  pub fn down() -> (Self, Arc<std::sync::atomic::AtomicBool>) {
    let healthy = Arc::new(std::sync::atomic::AtomicBool::new(false));
    (
      Self {
        healthy: healthy.clone(),
      },
      healthy,
    )
  }
}

#[async_trait]
impl EmbeddingProvider for SwitchableEmbedder {
  fn name(&self) -> &str {
    "switchable-mock"
  }
  fn model_id(&self) -> &str {
    "switchable-mock"
  }
  fn dimensions(&self) -> usize {
    MOCK_DIMS
  }

  async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    if self.healthy.load(std::sync::atomic::Ordering::SeqCst) {
      Ok(keyword_vector(text))
    } else {
      Err(EmbeddingError::Provider {
        status: 503,
        message: "host down".into(),
      })
    }
  }

  async fn is_available(&self) -> bool {
    self.healthy.load(std::sync::atomic::Ordering::SeqCst)
  }
}

/// An embedder whose output disagrees with the store's vector columns.
pub struct WrongDimsEmbedder;

#[async_trait]
impl EmbeddingProvider for WrongDimsEmbedder {
  fn name(&self) -> &str {
    "wrong-dims-mock"
  }
  fn model_id(&self) -> &str {
    "wrong-dims-mock"
  }
  fn dimensions(&self) -> usize {
    MOCK_DIMS * 2
  }

  async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
    Ok(vec![0.1; MOCK_DIMS * 2])
  }

  async fn is_available(&self) -> bool {
    true
  }
}

pub struct CannedChat;

#[async_trait]
impl ChatProvider for CannedChat {
  fn model_id(&self) -> &str {
    "canned-mock"
  }

  async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
    let context_len: usize = messages.iter().map(|m| m.content.len()).sum();
    Ok(format!("Answer grounded in {} chars of context.", context_len))
  }

  async fn is_available(&self) -> bool {
    true
  }
}

pub fn test_postgres_options() -> PostgresOptions {
  PostgresOptions {
    host: std::env::var("COMPOUND_TEST_PG_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
    port: std::env::var("COMPOUND_TEST_PG_PORT")
      .ok()
      .and_then(|p| p.parse().ok())
      .unwrap_or(5433),
    database: std::env::var("COMPOUND_TEST_PG_DATABASE").unwrap_or_else(|_| "compounding".into()),
    user: std::env::var("COMPOUND_TEST_PG_USER").unwrap_or_else(|_| "postgres".into()),
    password: std::env::var("COMPOUND_TEST_PG_PASSWORD").unwrap_or_else(|_| "postgres".into()),
  }
}

/// Schema reset happens once per test binary; temp-dir repos give every
/// test its own tenant after that.
static SCHEMA_RESET: tokio::sync::OnceCell<bool> = tokio::sync::OnceCell::const_new();

/// Connect to the test store, resetting the schema on first use. None when
/// Postgres is unreachable.
pub async fn connect_test_store() -> Option<Store> {
  let options = test_postgres_options();
  let url = format!(
    "postgres://{}:{}@{}:{}/{}",
    options.user, options.password, options.host, options.port, options.database
  );

  let pool = match sqlx::postgres::PgPoolOptions::new()
    .max_connections(2)
    .acquire_timeout(Duration::from_secs(3))
    .connect(&url)
    .await
  {
    Ok(p) => p,
    Err(e) => {
      eprintln!("Postgres not available ({}), skipping store-backed test", e);
      return None;
    }
  };

  let reset = SCHEMA_RESET
    .get_or_init(|| async {
      sqlx::query("DROP SCHEMA IF EXISTS compounding CASCADE")
        .execute(&pool)
        .await
        .is_ok()
    })
    .await;
  if !reset {
    eprintln!("Failed to reset schema, skipping store-backed test");
    return None;
  }
  drop(pool);

  match Store::connect(&options, MOCK_DIMS).await {
    Ok(store) => Some(store),
    Err(e) => {
      eprintln!("Store connect failed ({}), skipping store-backed test", e);
      None
    }
  }
}

/// A store handle that never touches the network until used; enough for
/// tests that stop at the session gate.
pub fn lazy_store() -> Store {
  let options = test_postgres_options();
  let url = format!(
    "postgres://{}:{}@{}:{}/{}",
    options.user, options.password, options.host, options.port, options.database
  );
  let pool = sqlx::postgres::PgPoolOptions::new()
    .connect_lazy(&url)
    .expect("lazy pool construction does not connect");
  Store::from_pool(pool, MOCK_DIMS)
}

pub fn build_engine(store: Store, provider: Box<dyn EmbeddingProvider>) -> Arc<Engine> {
  let embed_pipeline = Arc::new(ResiliencePipeline::with_defaults(Duration::from_secs(5)));
  let embedder = Arc::new(ResilientEmbedding::new(provider, embed_pipeline));

  let chat: Box<dyn ChatProvider> = Box::new(CannedChat);
  let chat_pipeline = Arc::new(ResiliencePipeline::with_defaults(Duration::from_secs(5)));
  let chat = Arc::new(ResilientChat::new(chat, chat_pipeline));

  Arc::new(Engine::new(store, embedder, chat))
}

pub fn request(method: &str, params: serde_json::Value) -> Request {
  Request {
    id: Some(serde_json::json!(1)),
    method: method.to_string(),
    params,
  }
}

/// Write a project fixture: config dir + docs root + initial documents.
/// Returns the config path.
pub fn write_project_fixture(repo: &Path) -> std::path::PathBuf {
  let config_dir = repo.join(".csharp-compounding-docs");
  std::fs::create_dir_all(&config_dir).expect("create config dir");

  let config_path = config_dir.join("config.json");
  std::fs::write(
    &config_path,
    serde_json::json!({
      "project_name": "fixture",
      "docs_root": "./docs",
      "file_watcher": { "debounce_ms": 100 },
      "retrieval": { "top_k": 10, "min_relevance_score": 0.5, "max_linked_docs": 5 }
    })
    .to_string(),
  )
  .expect("write config");

  std::fs::create_dir_all(repo.join("docs/problems")).expect("create docs root");
  config_path
}

pub fn problem_doc(title: &str, keyword: &str, extra_body: &str) -> String {
  format!(
    "---\ntype: problem\ntitle: {title}\ndate: 2025-01-24\nsummary: about {keyword}\nsignificance: behavioral\ntags:\n  - {keyword}\nstatus: active\nsymptoms: s\nroot_cause: r\nsolution: z\n---\n# {title}\n\nThis document describes the {keyword} issue.\n{extra_body}\n"
  )
}

/// Poll a router call until the predicate passes or the timeout elapses.
pub async fn wait_for<F>(mut check: F, timeout: Duration) -> bool
where
  F: AsyncFnMut() -> bool,
{
  let deadline = std::time::Instant::now() + timeout;
  while std::time::Instant::now() < deadline {
    if check().await {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
  }
  false
}

pub fn router_for(engine: Arc<Engine>) -> Arc<Router> {
  Arc::new(Router::new(engine))
}
