//! Store adapter tests against a live Postgres with pgvector.
//!
//! Requires the launch-contract default address (127.0.0.1:5433) or the
//! COMPOUND_TEST_PG_* variables; each test skips itself when the store is
//! unreachable. The `compounding` schema is dropped once per run, so point
//! these at a dedicated test database.

use chrono::Utc;
use compound_core::{compute_path_hash, PromotionLevel, TenantKey};
use db::{ChunkRecord, DocumentRecord, PostgresOptions, Store, TenantFilter};
use std::time::Duration;
use tokio::sync::OnceCell;
use uuid::Uuid;

const DIMS: usize = 8;

fn options() -> PostgresOptions {
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

/// Schema reset happens once per test binary; tests isolate through
/// per-test tenants after that.
static SCHEMA_RESET: OnceCell<bool> = OnceCell::const_new();

async fn connect() -> Option<Store> {
  let opts = options();
  let url = format!(
    "postgres://{}:{}@{}:{}/{}",
    opts.user, opts.password, opts.host, opts.port, opts.database
  );

  let pool = match sqlx::postgres::PgPoolOptions::new()
    .max_connections(2)
    .acquire_timeout(Duration::from_secs(3))
    .connect(&url)
    .await
  {
    Ok(p) => p,
    Err(e) => {
      eprintln!("Postgres not available ({}), skipping store test", e);
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
    eprintln!("Failed to reset schema, skipping store test");
    return None;
  }
  drop(pool);

  Store::connect(&opts, DIMS).await.ok()
}

/// Per-test tenant so parallel tests never see each other's rows.
fn test_tenant(test: &str, branch: &str) -> TenantKey {
  let hash = compute_path_hash(std::path::Path::new(&format!("/store-tests/{}", test)));
  TenantKey::new("store-tests", branch, hash)
}

/// Unit vector along one axis, for predictable cosine similarities.
fn axis(i: usize) -> Vec<f32> {
  let mut v = vec![0.0f32; DIMS];
  v[i] = 1.0;
  v
}

fn document(tenant: &TenantKey, path: &str, embedding: Vec<f32>) -> DocumentRecord {
  DocumentRecord {
    id: Uuid::new_v4(),
    tenant: tenant.clone(),
    relative_path: path.to_string(),
    title: path.to_string(),
    summary: Some("a summary".to_string()),
    doc_type: "problem".to_string(),
    promotion_level: PromotionLevel::Standard,
    content_hash: "a".repeat(64),
    char_count: 42,
    content: "body".to_string(),
    frontmatter: Some(serde_json::json!({ "type": "problem" })),
    embedding: Some(embedding),
    created_at: Utc::now(),
    updated_at: Utc::now(),
  }
}

fn chunk(tenant: &TenantKey, document_id: Uuid, index: i32) -> ChunkRecord {
  ChunkRecord {
    id: Uuid::new_v4(),
    document_id,
    tenant: tenant.clone(),
    chunk_index: index,
    header_path: format!("## Section {}", index),
    content: format!("chunk {}", index),
    promotion_level: PromotionLevel::Standard,
    embedding: Some(vec![0.5; DIMS]),
    created_at: Utc::now(),
    updated_at: Utc::now(),
  }
}

#[tokio::test]
async fn test_ensure_exists_is_idempotent() {
  let Some(store) = connect().await else { return };
  store.ensure_exists().await.unwrap();
  store.ensure_exists().await.unwrap();
  store.ping().await.unwrap();
}

#[tokio::test]
async fn test_vector_column_dims_match_configuration() {
  let Some(store) = connect().await else { return };

  for collection in db::Collection::ALL {
    let dim = db::schema::vector_column_dim(store.pool(), collection).await.unwrap();
    assert_eq!(dim, Some(DIMS), "wrong dimension for {}", collection.table_name());
  }
}

#[tokio::test]
async fn test_upsert_preserves_id_on_conflict() {
  let Some(store) = connect().await else { return };
  let tenant = test_tenant("upsert-id", "main");

  let first = document(&tenant, "a.md", axis(0));
  let first_id = store.upsert_document(&first).await.unwrap();

  // A second upsert for the same path with a fresh candidate id keeps the
  // stored row's identity
  let mut second = document(&tenant, "a.md", axis(1));
  second.content_hash = "b".repeat(64);
  let second_id = store.upsert_document(&second).await.unwrap();

  assert_eq!(first_id, second_id);

  let filter = TenantFilter::new(&tenant);
  let stored = store.get_document_by_path(&filter, "a.md").await.unwrap().unwrap();
  assert_eq!(stored.content_hash, "b".repeat(64));
}

#[tokio::test]
async fn test_vector_search_is_tenant_scoped() {
  let Some(store) = connect().await else { return };
  let main = test_tenant("tenant-scoped", "main");
  let feature = test_tenant("tenant-scoped", "feature");

  // Same path, overlapping content, two tenants
  store
    .upsert_document(&document(&main, "shared.md", axis(0)))
    .await
    .unwrap();
  store
    .upsert_document(&document(&feature, "shared.md", axis(0)))
    .await
    .unwrap();

  let query = axis(0);
  for (filter, expected_branch) in [
    (TenantFilter::new(&main), "main"),
    (TenantFilter::new(&feature), "feature"),
  ] {
    let hits = store
      .vector_search_documents(&filter, &query, 10, 0.1, None, None)
      .await
      .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.tenant.branch_name, expected_branch);
  }
}

#[tokio::test]
async fn test_search_filters_and_critical_bypass() {
  let Some(store) = connect().await else { return };
  let tenant = test_tenant("filters", "main");
  let filter = TenantFilter::new(&tenant);

  let near = document(&tenant, "near.md", axis(0));
  let mut far = document(&tenant, "far.md", axis(1));
  far.promotion_level = PromotionLevel::Critical;
  let mut orthogonal = document(&tenant, "orthogonal.md", axis(2));
  orthogonal.doc_type = "insight".to_string();

  store.upsert_document(&near).await.unwrap();
  store.upsert_document(&far).await.unwrap();
  store.upsert_document(&orthogonal).await.unwrap();

  // High floor: only the aligned document passes, plus the critical one
  // that bypasses the floor
  let query = axis(0);
  let hits = store
    .vector_search_documents(&filter, &query, 10, 0.9, None, None)
    .await
    .unwrap();
  let paths: Vec<&str> = hits.iter().map(|h| h.record.relative_path.as_str()).collect();
  assert!(paths.contains(&"near.md"));
  assert!(paths.contains(&"far.md"), "critical documents bypass the relevance floor");
  assert!(!paths.contains(&"orthogonal.md"));

  // doc_type filter
  let hits = store
    .vector_search_documents(&filter, &query, 10, 0.0, Some("insight"), None)
    .await
    .unwrap();
  assert!(hits.iter().all(|h| h.record.doc_type == "insight"));

  // promotion filter
  let hits = store
    .vector_search_documents(&filter, &query, 10, 0.0, None, Some(PromotionLevel::Critical))
    .await
    .unwrap();
  assert_eq!(hits.len(), 1);
  assert_eq!(hits[0].record.relative_path, "far.md");
}

#[tokio::test]
async fn test_promotion_propagates_to_chunks_transactionally() {
  let Some(store) = connect().await else { return };
  let tenant = test_tenant("promotion", "main");

  let doc = document(&tenant, "big.md", axis(0));
  let doc_id = store.upsert_document(&doc).await.unwrap();
  let chunks: Vec<ChunkRecord> = (0..3).map(|i| chunk(&tenant, doc_id, i)).collect();
  store.replace_chunks(doc_id, &chunks).await.unwrap();

  store.update_promotion(doc_id, PromotionLevel::Critical).await.unwrap();

  let stored_doc = store.get_document(doc_id).await.unwrap().unwrap();
  assert_eq!(stored_doc.promotion_level, PromotionLevel::Critical);

  let stored_chunks = store.get_chunks_for_document(doc_id).await.unwrap();
  assert_eq!(stored_chunks.len(), 3);
  for chunk in &stored_chunks {
    assert_eq!(chunk.promotion_level, PromotionLevel::Critical);
  }
}

#[tokio::test]
async fn test_promotion_of_missing_document_fails() {
  let Some(store) = connect().await else { return };
  let result = store.update_promotion(Uuid::new_v4(), PromotionLevel::Important).await;
  assert!(result.is_err());
}

#[tokio::test]
async fn test_delete_cascades_to_chunks() {
  let Some(store) = connect().await else { return };
  let tenant = test_tenant("cascade", "main");
  let filter = TenantFilter::new(&tenant);

  let doc = document(&tenant, "doomed.md", axis(0));
  let doc_id = store.upsert_document(&doc).await.unwrap();
  store
    .replace_chunks(doc_id, &[chunk(&tenant, doc_id, 0), chunk(&tenant, doc_id, 1)])
    .await
    .unwrap();
  assert_eq!(store.count_chunks(&filter).await.unwrap(), 2);

  let deleted = store.delete_document_by_path(&filter, "doomed.md").await.unwrap();
  assert_eq!(deleted, Some(doc_id));
  assert_eq!(store.count_chunks(&filter).await.unwrap(), 0);
  assert!(store.get_document(doc_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_replace_chunks_regenerates_whole_set() {
  let Some(store) = connect().await else { return };
  let tenant = test_tenant("replace-chunks", "main");

  let doc = document(&tenant, "sections.md", axis(0));
  let doc_id = store.upsert_document(&doc).await.unwrap();

  store
    .replace_chunks(doc_id, &(0..4).map(|i| chunk(&tenant, doc_id, i)).collect::<Vec<_>>())
    .await
    .unwrap();
  store
    .replace_chunks(doc_id, &(0..2).map(|i| chunk(&tenant, doc_id, i)).collect::<Vec<_>>())
    .await
    .unwrap();

  let stored = store.get_chunks_for_document(doc_id).await.unwrap();
  assert_eq!(stored.len(), 2);
  assert_eq!(stored[0].chunk_index, 0);
  assert_eq!(stored[1].chunk_index, 1);
}

#[tokio::test]
async fn test_tenant_registry_upserts() {
  let Some(store) = connect().await else { return };
  let tenant = test_tenant("registry", "main");

  store.upsert_tenant(&tenant, "/repos/store-tests").await.unwrap();
  // Re-registration refreshes rather than duplicating
  store.upsert_tenant(&tenant, "/repos/store-tests").await.unwrap();
  store.touch_tenant(&tenant).await.unwrap();
}

#[tokio::test]
async fn test_get_documents_by_paths_batches() {
  let Some(store) = connect().await else { return };
  let tenant = test_tenant("batch-get", "main");
  let filter = TenantFilter::new(&tenant);

  for path in ["one.md", "two.md", "three.md"] {
    store
      .upsert_document(&document(&tenant, path, axis(0)))
      .await
      .unwrap();
  }

  let records = store
    .get_documents_by_paths(&filter, &["one.md".to_string(), "three.md".to_string(), "missing.md".to_string()])
    .await
    .unwrap();

  let mut paths: Vec<&str> = records.iter().map(|r| r.relative_path.as_str()).collect();
  paths.sort();
  assert_eq!(paths, vec!["one.md", "three.md"]);
}

#[tokio::test]
async fn test_upsert_document_with_chunks_is_one_scope() {
  let Some(store) = connect().await else { return };
  let tenant = test_tenant("combined-write", "main");
  let filter = TenantFilter::new(&tenant);

  let doc = document(&tenant, "combined.md", axis(0));
  let chunks: Vec<ChunkRecord> = (0..3).map(|i| chunk(&tenant, Uuid::nil(), i)).collect();

  let document_id = store.upsert_document_with_chunks(&doc, &chunks).await.unwrap();

  // Every chunk is parented to the stored document id, whatever the
  // caller put in the record
  let stored = store.get_chunks_for_document(document_id).await.unwrap();
  assert_eq!(stored.len(), 3);
  for chunk in &stored {
    assert_eq!(chunk.document_id, document_id);
  }

  // Re-upserting the same path replaces the chunk set under the same id
  let mut updated = document(&tenant, "combined.md", axis(1));
  updated.content_hash = "c".repeat(64);
  let fewer: Vec<ChunkRecord> = (0..1).map(|i| chunk(&tenant, Uuid::nil(), i)).collect();
  let second_id = store.upsert_document_with_chunks(&updated, &fewer).await.unwrap();

  assert_eq!(second_id, document_id);
  assert_eq!(store.get_chunks_for_document(document_id).await.unwrap().len(), 1);
  assert_eq!(
    store
      .get_document_by_path(&filter, "combined.md")
      .await
      .unwrap()
      .unwrap()
      .content_hash,
    "c".repeat(64)
  );
}

#[tokio::test]
async fn test_external_collections_roundtrip() {
  let Some(store) = connect().await else { return };
  let tenant = test_tenant("external", "main");
  let filter = TenantFilter::new(&tenant);

  let record = db::ExternalDocumentRecord {
    id: Uuid::new_v4(),
    tenant: tenant.clone(),
    relative_path: "reference/guide.md".to_string(),
    title: "Guide".to_string(),
    summary: None,
    doc_type: "reference".to_string(),
    content_hash: "e".repeat(64),
    char_count: 10,
    content: "guide body".to_string(),
    frontmatter: None,
    embedding: Some(axis(3)),
    created_at: Utc::now(),
    updated_at: Utc::now(),
  };
  let chunks = vec![db::ExternalChunkRecord {
    id: Uuid::new_v4(),
    document_id: Uuid::nil(),
    tenant: tenant.clone(),
    chunk_index: 0,
    header_path: "## Intro".to_string(),
    content: "intro".to_string(),
    embedding: Some(axis(3)),
  }];

  let document_id = store.upsert_external_document_with_chunks(&record, &chunks).await.unwrap();

  // Standalone upsert keeps the stored id, like the primary collection
  let again = store.upsert_external_document(&record).await.unwrap();
  assert_eq!(again, document_id);

  let hits = store.vector_search_external(&filter, &axis(3), 10, 0.5).await.unwrap();
  assert_eq!(hits.len(), 1);
  assert_eq!(hits[0].record.relative_path, "reference/guide.md");

  let listed = store.list_external_document_hashes(&filter).await.unwrap();
  assert_eq!(listed.len(), 1);

  // Fresh chunk set replaces the old one
  store.replace_external_chunks(document_id, &[]).await.unwrap();

  let deleted = store
    .delete_external_document_by_path(&filter, "reference/guide.md")
    .await
    .unwrap();
  assert_eq!(deleted, Some(document_id));
  assert!(store.list_external_document_hashes(&filter).await.unwrap().is_empty());
}
