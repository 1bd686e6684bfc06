//! End-to-end tests for the daemon: activation, indexing, retrieval,
//! promotion, tenant isolation, and degraded-embedding behavior.
//!
//! Store-backed tests need Postgres with pgvector at 127.0.0.1:5433 (or
//! the COMPOUND_TEST_PG_* variables) and skip themselves otherwise.

mod common;

use common::*;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_ping_and_status_without_session() {
  let engine = build_engine(lazy_store(), Box::new(KeywordEmbedder));
  let router = router_for(engine);

  let response = router.handle(request("ping", serde_json::json!({}))).await;
  assert_eq!(response.result.unwrap(), serde_json::json!("pong"));

  let response = router.handle(request("status", serde_json::json!({}))).await;
  let status = response.result.unwrap();
  assert_eq!(status["status"], "running");
  assert!(status["session"].is_null());
}

#[tokio::test]
async fn test_tools_fail_without_active_project() {
  let engine = build_engine(lazy_store(), Box::new(KeywordEmbedder));
  let router = router_for(engine);

  for method in [
    "search",
    "rag_query",
    "search_external_docs",
    "rag_query_external",
    "update_promotion_level",
    "list_doc_types",
  ] {
    let params = match method {
      "update_promotion_level" => serde_json::json!({ "relative_path": "x.md", "level": "critical" }),
      _ => serde_json::json!({ "query": "anything" }),
    };
    let response = router.handle(request(method, params)).await;
    let error = response.error.unwrap_or_else(|| panic!("{} should fail", method));
    assert_eq!(
      error.data.unwrap()["error_code"],
      "PROJECT_NOT_ACTIVATED",
      "wrong code for {}",
      method
    );
  }
}

#[tokio::test]
async fn test_unknown_method() {
  let engine = build_engine(lazy_store(), Box::new(KeywordEmbedder));
  let router = router_for(engine);

  let response = router.handle(request("no_such_tool", serde_json::json!({}))).await;
  assert_eq!(response.error.unwrap().code, -32601);
}

#[tokio::test]
async fn test_activate_missing_config() {
  let engine = build_engine(lazy_store(), Box::new(KeywordEmbedder));
  let router = router_for(engine);

  let response = router
    .handle(request(
      "activate_project",
      serde_json::json!({ "config_path": "/nowhere/config.json", "branch_name": "main" }),
    ))
    .await;

  let error = response.error.unwrap();
  assert_eq!(error.data.unwrap()["error_code"], "CONFIG_NOT_FOUND");
}

#[tokio::test]
async fn test_index_search_promote_lifecycle() {
  let Some(store) = connect_test_store().await else { return };

  let repo = TempDir::new().unwrap();
  let config_path = write_project_fixture(repo.path());
  std::fs::write(
    repo.path().join("docs/problems/alpha.md"),
    problem_doc("Alpha", "alpha", ""),
  )
  .unwrap();
  std::fs::write(
    repo.path().join("docs/problems/beta.md"),
    problem_doc("Beta", "beta", "See [alpha](./alpha.md) for background.\n"),
  )
  .unwrap();

  let engine = build_engine(store, Box::new(KeywordEmbedder));
  let router = router_for(engine.clone());

  let response = router
    .handle(request(
      "activate_project",
      serde_json::json!({ "config_path": config_path.to_string_lossy(), "branch_name": "main" }),
    ))
    .await;
  assert!(response.error.is_none(), "activation failed: {:?}", response.error);
  let summary = response.result.unwrap();
  assert_eq!(summary["project_name"], "fixture");
  assert_eq!(summary["reconcile_upserts"], 2);

  // Reconciliation funnels through the async worker; wait for the index
  let indexed = wait_for(
    async || {
      let response = router
        .handle(request("search", serde_json::json!({ "query": "alpha issue" })))
        .await;
      response
        .result
        .map(|r| !r.as_array().unwrap().is_empty())
        .unwrap_or(false)
    },
    Duration::from_secs(15),
  )
  .await;
  assert!(indexed, "documents never became searchable");

  // Search: alpha query hits alpha.md, promotion standard
  let response = router
    .handle(request("search", serde_json::json!({ "query": "alpha issue" })))
    .await;
  let results = response.result.unwrap();
  let results = results.as_array().unwrap();
  assert_eq!(results[0]["relative_path"], "problems/alpha.md");
  assert_eq!(results[0]["promotion_level"], "standard");

  // RAG with link expansion: beta is primary, alpha arrives via the link
  let response = router
    .handle(request(
      "rag_query",
      serde_json::json!({ "query": "beta issue", "max_depth": 1, "max_linked_docs": 5 }),
    ))
    .await;
  assert!(response.error.is_none(), "rag_query failed: {:?}", response.error);
  let rag = response.result.unwrap();
  assert!(!rag["answer"].as_str().unwrap().is_empty());
  let primary_paths: Vec<&str> = rag["citations_primary"]
    .as_array()
    .unwrap()
    .iter()
    .map(|c| c["relative_path"].as_str().unwrap())
    .collect();
  assert!(primary_paths.contains(&"problems/beta.md"));
  let linked = rag["citations_linked"].as_array().unwrap();
  assert_eq!(linked[0]["relative_path"], "problems/alpha.md");
  assert_eq!(linked[0]["linked_from"], "problems/beta.md");
  assert_eq!(linked[0]["link_depth"], 1);

  // Promotion propagates to the store and back into the file
  let response = router
    .handle(request(
      "update_promotion_level",
      serde_json::json!({ "relative_path": "problems/alpha.md", "level": "critical" }),
    ))
    .await;
  assert!(response.error.is_none(), "promotion failed: {:?}", response.error);

  let file = std::fs::read_to_string(repo.path().join("docs/problems/alpha.md")).unwrap();
  assert!(file.contains("promotion_level: critical"));

  let response = router
    .handle(request("search", serde_json::json!({ "query": "alpha issue" })))
    .await;
  let results = response.result.unwrap();
  assert_eq!(results.as_array().unwrap()[0]["promotion_level"], "critical");

  // Doc types: built-ins are always present
  let response = router.handle(request("list_doc_types", serde_json::json!({}))).await;
  let types = response.result.unwrap();
  let names: Vec<&str> = types.as_array().unwrap().iter().map(|t| t["name"].as_str().unwrap()).collect();
  for builtin in ["problem", "insight", "codebase", "tool", "style"] {
    assert!(names.contains(&builtin));
  }

  router.handle(request("deactivate_project", serde_json::json!({}))).await;
  let response = router
    .handle(request("search", serde_json::json!({ "query": "alpha" })))
    .await;
  assert_eq!(
    response.error.unwrap().data.unwrap()["error_code"],
    "PROJECT_NOT_ACTIVATED"
  );
}

#[tokio::test]
async fn test_branch_isolation() {
  let Some(store) = connect_test_store().await else { return };

  let repo = TempDir::new().unwrap();
  let config_path = write_project_fixture(repo.path());
  std::fs::write(
    repo.path().join("docs/problems/gamma.md"),
    problem_doc("Gamma", "gamma", ""),
  )
  .unwrap();

  let engine = build_engine(store, Box::new(KeywordEmbedder));
  let router = router_for(engine);

  // Index under main
  let response = router
    .handle(request(
      "activate_project",
      serde_json::json!({ "config_path": config_path.to_string_lossy(), "branch_name": "main" }),
    ))
    .await;
  assert!(response.error.is_none());

  let indexed = wait_for(
    async || {
      let response = router
        .handle(request("search", serde_json::json!({ "query": "gamma" })))
        .await;
      response
        .result
        .map(|r| !r.as_array().unwrap().is_empty())
        .unwrap_or(false)
    },
    Duration::from_secs(15),
  )
  .await;
  assert!(indexed);

  // Switch to a feature branch over a different docs tree state: the
  // same file re-indexes under the new tenant, but a search issued
  // against a branch that has no matching docs stays empty.
  std::fs::remove_file(repo.path().join("docs/problems/gamma.md")).unwrap();

  let response = router
    .handle(request(
      "activate_project",
      serde_json::json!({ "config_path": config_path.to_string_lossy(), "branch_name": "feature" }),
    ))
    .await;
  assert!(response.error.is_none());

  let response = router
    .handle(request("search", serde_json::json!({ "query": "gamma" })))
    .await;
  let results = response.result.unwrap();
  assert!(
    results.as_array().unwrap().is_empty(),
    "feature branch must not see main's documents"
  );
}

#[tokio::test]
async fn test_degraded_embedding_parks_files_and_recovers() {
  let Some(store) = connect_test_store().await else { return };

  let repo = TempDir::new().unwrap();
  let config_path = write_project_fixture(repo.path());
  // Skip startup validation so activation succeeds with the host down
  std::fs::write(
    &config_path,
    serde_json::json!({
      "project_name": "fixture",
      "docs_root": "./docs",
      "skip_dimension_validation": true,
      "file_watcher": { "debounce_ms": 100 },
      "retrieval": { "min_relevance_score": 0.5 },
      "resilience": { "circuit_breaker": { "break_duration_secs": 1 } }
    })
    .to_string(),
  )
  .unwrap();
  std::fs::write(
    repo.path().join("docs/problems/delta.md"),
    problem_doc("Delta", "delta", ""),
  )
  .unwrap();

  let (provider, healthy) = SwitchableEmbedder::down();
  let engine = build_engine(store, Box::new(provider));
  let router = router_for(engine.clone());

  let response = router
    .handle(request(
      "activate_project",
      serde_json::json!({ "config_path": config_path.to_string_lossy(), "branch_name": "main" }),
    ))
    .await;
  assert!(response.error.is_none(), "activation failed: {:?}", response.error);

  // The worker attempts delta.md, the pipeline fails, the file parks
  let parked = wait_for(
    async || {
      let response = router.handle(request("status", serde_json::json!({}))).await;
      response.result.unwrap()["tracker"]["pending"].as_u64().unwrap_or(0) > 0
    },
    Duration::from_secs(15),
  )
  .await;
  assert!(parked, "file never entered the pending tracker");

  // Retrieval surfaces the service error while the host is down
  let response = router
    .handle(request("search", serde_json::json!({ "query": "delta" })))
    .await;
  let error = response.error.expect("search should fail while host is down");
  assert_eq!(error.data.unwrap()["error_code"], "EMBEDDING_SERVICE_ERROR");

  // Host recovers; the health probe reschedules pending work
  healthy.store(true, std::sync::atomic::Ordering::SeqCst);
  tokio::time::sleep(Duration::from_millis(1200)).await; // past break_duration

  let recovered = wait_for(
    async || {
      let _ = router.handle(request("health", serde_json::json!({}))).await;
      let response = router
        .handle(request("search", serde_json::json!({ "query": "delta" })))
        .await;
      response
        .result
        .map(|r| !r.as_array().unwrap().is_empty())
        .unwrap_or(false)
    },
    Duration::from_secs(20),
  )
  .await;
  assert!(recovered, "delta.md never became searchable after recovery");
}

#[tokio::test]
async fn test_large_document_chunks_inherit_tenancy_and_promotion() {
  let Some(store) = connect_test_store().await else { return };

  let repo = TempDir::new().unwrap();
  let config_path = write_project_fixture(repo.path());

  // Body over the 500-line threshold, split across H2 sections
  let mut body = String::new();
  for section in 0..4 {
    body.push_str(&format!("## Part {}\n", section));
    for line in 0..200 {
      body.push_str(&format!("epsilon detail line {} of part {}\n", line, section));
    }
  }
  std::fs::write(
    repo.path().join("docs/problems/epsilon.md"),
    problem_doc("Epsilon", "epsilon", &body),
  )
  .unwrap();

  let engine = build_engine(store, Box::new(KeywordEmbedder));
  let router = router_for(engine.clone());

  let response = router
    .handle(request(
      "activate_project",
      serde_json::json!({ "config_path": config_path.to_string_lossy(), "branch_name": "main" }),
    ))
    .await;
  assert!(response.error.is_none(), "activation failed: {:?}", response.error);

  let indexed = wait_for(
    async || {
      let response = router
        .handle(request("search", serde_json::json!({ "query": "epsilon" })))
        .await;
      response
        .result
        .map(|r| !r.as_array().unwrap().is_empty())
        .unwrap_or(false)
    },
    Duration::from_secs(15),
  )
  .await;
  assert!(indexed);

  let tenant = engine.session().get_active().unwrap().tenant;
  let filter = db::TenantFilter::new(&tenant);
  let document = engine
    .store()
    .get_document_by_path(&filter, "problems/epsilon.md")
    .await
    .unwrap()
    .expect("document row");

  let chunks = engine.store().get_chunks_for_document(document.id).await.unwrap();
  assert!(chunks.len() >= 2, "expected multiple chunks, got {}", chunks.len());
  for (i, chunk) in chunks.iter().enumerate() {
    assert_eq!(chunk.chunk_index, i as i32);
    assert_eq!(chunk.tenant, tenant);
    assert_eq!(chunk.promotion_level.as_str(), "standard");
    assert!(chunk.header_path.is_empty() || chunk.header_path.starts_with("##"));
  }
  assert!(chunks.iter().any(|c| c.header_path.starts_with("## Part")));

  // Promotion moves the document and every chunk together
  let response = router
    .handle(request(
      "update_promotion_level",
      serde_json::json!({ "relative_path": "problems/epsilon.md", "level": "important" }),
    ))
    .await;
  assert!(response.error.is_none());

  let chunks = engine.store().get_chunks_for_document(document.id).await.unwrap();
  for chunk in &chunks {
    assert_eq!(chunk.promotion_level.as_str(), "important");
  }
}

#[tokio::test]
async fn test_reconciliation_is_idempotent() {
  let Some(store) = connect_test_store().await else { return };

  let repo = TempDir::new().unwrap();
  let config_path = write_project_fixture(repo.path());
  std::fs::write(
    repo.path().join("docs/problems/zeta.md"),
    problem_doc("Zeta", "zeta", ""),
  )
  .unwrap();

  let engine = build_engine(store, Box::new(KeywordEmbedder));
  let router = router_for(engine.clone());

  let response = router
    .handle(request(
      "activate_project",
      serde_json::json!({ "config_path": config_path.to_string_lossy(), "branch_name": "main" }),
    ))
    .await;
  assert!(response.error.is_none());

  let indexed = wait_for(
    async || {
      let response = router
        .handle(request("search", serde_json::json!({ "query": "zeta" })))
        .await;
      response
        .result
        .map(|r| !r.as_array().unwrap().is_empty())
        .unwrap_or(false)
    },
    Duration::from_secs(15),
  )
  .await;
  assert!(indexed);

  let tenant = engine.session().get_active().unwrap().tenant;
  let filter = db::TenantFilter::new(&tenant);
  let before = engine.store().list_document_hashes(&filter).await.unwrap();

  // No filesystem change between runs: both passes schedule nothing
  assert_eq!(engine.drain_pending().await.unwrap(), 0);
  assert_eq!(engine.drain_pending().await.unwrap(), 0);

  tokio::time::sleep(Duration::from_millis(300)).await;
  let after = engine.store().list_document_hashes(&filter).await.unwrap();
  assert_eq!(before, after);
}

#[tokio::test]
async fn test_watcher_indexes_file_created_after_activation() {
  let Some(store) = connect_test_store().await else { return };

  let repo = TempDir::new().unwrap();
  let config_path = write_project_fixture(repo.path());

  let engine = build_engine(store, Box::new(KeywordEmbedder));
  let router = router_for(engine);

  let response = router
    .handle(request(
      "activate_project",
      serde_json::json!({ "config_path": config_path.to_string_lossy(), "branch_name": "main" }),
    ))
    .await;
  assert!(response.error.is_none());

  // Created after activation: only the watcher can pick this up
  std::fs::write(
    repo.path().join("docs/problems/delta.md"),
    problem_doc("Delta", "delta", ""),
  )
  .unwrap();

  let indexed = wait_for(
    async || {
      let response = router
        .handle(request("search", serde_json::json!({ "query": "delta" })))
        .await;
      response
        .result
        .map(|r| !r.as_array().unwrap().is_empty())
        .unwrap_or(false)
    },
    Duration::from_secs(20),
  )
  .await;
  assert!(indexed, "watcher never delivered the new file");
}

#[tokio::test]
async fn test_last_write_wins_matches_disk() {
  let Some(store) = connect_test_store().await else { return };

  let repo = TempDir::new().unwrap();
  let config_path = write_project_fixture(repo.path());
  let doc_path = repo.path().join("docs/problems/alpha.md");
  std::fs::write(&doc_path, problem_doc("Alpha", "alpha", "first revision\n")).unwrap();

  let engine = build_engine(store, Box::new(KeywordEmbedder));
  let router = router_for(engine.clone());

  let response = router
    .handle(request(
      "activate_project",
      serde_json::json!({ "config_path": config_path.to_string_lossy(), "branch_name": "main" }),
    ))
    .await;
  assert!(response.error.is_none());

  // Competing writers inside one debounce window; the file on disk at
  // quiescence is authoritative
  std::fs::write(&doc_path, problem_doc("Alpha", "alpha", "second revision\n")).unwrap();
  std::fs::write(&doc_path, problem_doc("Alpha", "alpha", "final revision\n")).unwrap();

  let tenant = engine.session().get_active().unwrap().tenant;
  let filter = db::TenantFilter::new(&tenant);
  let disk_hash = compound_core::content_hash(&std::fs::read(&doc_path).unwrap());

  let settled = wait_for(
    async || {
      engine
        .store()
        .get_document_by_path(&filter, "problems/alpha.md")
        .await
        .ok()
        .flatten()
        .map(|d| d.content_hash == disk_hash)
        .unwrap_or(false)
    },
    Duration::from_secs(20),
  )
  .await;
  assert!(settled, "stored hash never converged to the bytes on disk");
}

#[tokio::test]
async fn test_activation_fails_on_dimension_mismatch() {
  let Some(store) = connect_test_store().await else { return };

  // Make sure the collections exist at MOCK_DIMS before the mismatched
  // embedder shows up
  store.ensure_exists().await.unwrap();

  let repo = TempDir::new().unwrap();
  let config_path = write_project_fixture(repo.path());

  let engine = build_engine(store, Box::new(WrongDimsEmbedder));
  let router = router_for(engine.clone());

  let response = router
    .handle(request(
      "activate_project",
      serde_json::json!({ "config_path": config_path.to_string_lossy(), "branch_name": "main" }),
    ))
    .await;

  let error = response.error.expect("mismatched dimensions must fail activation");
  assert_eq!(error.data.unwrap()["error_code"], "DIMENSION_MISMATCH");
  assert!(!engine.session().is_active(), "session must not activate on mismatch");
}
