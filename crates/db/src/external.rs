//! External reference documentation: structurally parallel to the primary
//! collections, but read-only toward clients and without promotion levels.

use crate::connection::{Result, Store};
use crate::documents::SearchHit;
use crate::filter::TenantFilter;
use crate::schema::SCHEMA_NAME;
use chrono::{DateTime, Utc};
use compound_core::TenantKey;
use pgvector::Vector;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ExternalDocumentRecord {
  pub id: Uuid,
  pub tenant: TenantKey,
  pub relative_path: String,
  pub title: String,
  pub summary: Option<String>,
  pub doc_type: String,
  pub content_hash: String,
  pub char_count: i32,
  pub content: String,
  pub frontmatter: Option<serde_json::Value>,
  pub embedding: Option<Vec<f32>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExternalChunkRecord {
  pub id: Uuid,
  pub document_id: Uuid,
  pub tenant: TenantKey,
  pub chunk_index: i32,
  pub header_path: String,
  pub content: String,
  pub embedding: Option<Vec<f32>>,
}

const EXTERNAL_COLUMNS: &str = "id, project_name, branch_name, path_hash, relative_path, title, summary, doc_type, \
                                content_hash, char_count, content, frontmatter, embedding, created_at, updated_at";

fn row_to_external(row: &PgRow) -> Result<ExternalDocumentRecord> {
  let embedding: Option<Vector> = row.try_get("embedding")?;

  Ok(ExternalDocumentRecord {
    id: row.try_get("id")?,
    tenant: TenantKey::new(
      row.try_get::<String, _>("project_name")?,
      row.try_get::<String, _>("branch_name")?,
      row.try_get::<String, _>("path_hash")?,
    ),
    relative_path: row.try_get("relative_path")?,
    title: row.try_get("title")?,
    summary: row.try_get("summary")?,
    doc_type: row.try_get("doc_type")?,
    content_hash: row.try_get("content_hash")?,
    char_count: row.try_get("char_count")?,
    content: row.try_get("content")?,
    frontmatter: row.try_get("frontmatter")?,
    embedding: embedding.map(|v| v.to_vec()),
    created_at: row.try_get("created_at")?,
    updated_at: row.try_get("updated_at")?,
  })
}

/// Upsert one external document row on the given executor.
async fn upsert_external_on<'e, E>(executor: E, record: &ExternalDocumentRecord) -> Result<Uuid>
where
  E: sqlx::PgExecutor<'e>,
{
  let embedding = record.embedding.as_ref().map(|v| Vector::from(v.clone()));

  let row = sqlx::query(&format!(
    r#"INSERT INTO {s}.external_documents
         (id, project_name, branch_name, path_hash, relative_path, title, summary, doc_type,
          content_hash, char_count, content, frontmatter, embedding, created_at, updated_at)
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, now(), now())
       ON CONFLICT (project_name, branch_name, path_hash, relative_path) DO UPDATE SET
         title = EXCLUDED.title,
         summary = EXCLUDED.summary,
         doc_type = EXCLUDED.doc_type,
         content_hash = EXCLUDED.content_hash,
         char_count = EXCLUDED.char_count,
         content = EXCLUDED.content,
         frontmatter = EXCLUDED.frontmatter,
         embedding = EXCLUDED.embedding,
         updated_at = now()
       RETURNING id"#,
    s = SCHEMA_NAME
  ))
  .bind(record.id)
  .bind(&record.tenant.project_name)
  .bind(&record.tenant.branch_name)
  .bind(&record.tenant.path_hash)
  .bind(&record.relative_path)
  .bind(&record.title)
  .bind(&record.summary)
  .bind(&record.doc_type)
  .bind(&record.content_hash)
  .bind(record.char_count)
  .bind(&record.content)
  .bind(&record.frontmatter)
  .bind(embedding)
  .fetch_one(executor)
  .await?;

  Ok(row.try_get("id")?)
}

/// Insert one external chunk row on the given executor.
async fn insert_external_chunk_on<'e, E>(executor: E, document_id: Uuid, chunk: &ExternalChunkRecord) -> Result<()>
where
  E: sqlx::PgExecutor<'e>,
{
  let embedding = chunk.embedding.as_ref().map(|v| Vector::from(v.clone()));

  sqlx::query(&format!(
    r#"INSERT INTO {s}.external_document_chunks
         (id, document_id, project_name, branch_name, path_hash, chunk_index, header_path,
          content, embedding, created_at, updated_at)
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now(), now())"#,
    s = SCHEMA_NAME
  ))
  .bind(chunk.id)
  .bind(document_id)
  .bind(&chunk.tenant.project_name)
  .bind(&chunk.tenant.branch_name)
  .bind(&chunk.tenant.path_hash)
  .bind(chunk.chunk_index)
  .bind(&chunk.header_path)
  .bind(&chunk.content)
  .bind(embedding)
  .execute(executor)
  .await?;

  Ok(())
}

impl Store {
  pub async fn upsert_external_document(&self, record: &ExternalDocumentRecord) -> Result<Uuid> {
    upsert_external_on(self.pool(), record).await
  }

  /// Upsert an external document and replace its whole chunk set in one
  /// transaction, mirroring the primary-collection write.
  pub async fn upsert_external_document_with_chunks(
    &self,
    record: &ExternalDocumentRecord,
    chunks: &[ExternalChunkRecord],
  ) -> Result<Uuid> {
    let mut tx = self.pool().begin().await?;

    let document_id = upsert_external_on(&mut *tx, record).await?;

    sqlx::query(&format!(
      "DELETE FROM {s}.external_document_chunks WHERE document_id = $1",
      s = SCHEMA_NAME
    ))
    .bind(document_id)
    .execute(&mut *tx)
    .await?;

    for chunk in chunks {
      insert_external_chunk_on(&mut *tx, document_id, chunk).await?;
    }

    tx.commit().await?;
    debug!(
      document_path = %record.relative_path,
      chunks = chunks.len(),
      "Upserted external document with chunk set"
    );
    Ok(document_id)
  }

  pub async fn replace_external_chunks(&self, document_id: Uuid, chunks: &[ExternalChunkRecord]) -> Result<()> {
    let mut tx = self.pool().begin().await?;

    sqlx::query(&format!(
      "DELETE FROM {s}.external_document_chunks WHERE document_id = $1",
      s = SCHEMA_NAME
    ))
    .bind(document_id)
    .execute(&mut *tx)
    .await?;

    for chunk in chunks {
      insert_external_chunk_on(&mut *tx, document_id, chunk).await?;
    }

    tx.commit().await?;
    debug!(document_id = %document_id, chunks = chunks.len(), "Replaced external chunk set");
    Ok(())
  }

  pub async fn delete_external_document_by_path(&self, filter: &TenantFilter, relative_path: &str) -> Result<Option<Uuid>> {
    let row = sqlx::query(&format!(
      "DELETE FROM {s}.external_documents
       WHERE project_name = $1 AND branch_name = $2 AND path_hash = $3 AND relative_path = $4
       RETURNING id",
      s = SCHEMA_NAME
    ))
    .bind(&filter.project_name)
    .bind(&filter.branch_name)
    .bind(&filter.path_hash)
    .bind(relative_path)
    .fetch_optional(self.pool())
    .await?;

    Ok(row.map(|r| r.try_get("id")).transpose()?)
  }

  pub async fn list_external_document_hashes(&self, filter: &TenantFilter) -> Result<Vec<(String, String)>> {
    let rows = sqlx::query(&format!(
      "SELECT relative_path, content_hash FROM {s}.external_documents
       WHERE project_name = $1 AND branch_name = $2 AND path_hash = $3",
      s = SCHEMA_NAME
    ))
    .bind(&filter.project_name)
    .bind(&filter.branch_name)
    .bind(&filter.path_hash)
    .fetch_all(self.pool())
    .await?;

    rows
      .iter()
      .map(|r| Ok((r.try_get("relative_path")?, r.try_get("content_hash")?)))
      .collect()
  }

  /// Cosine-similarity search over external documents. No promotion column
  /// exists here, so no floor bypass applies.
  pub async fn vector_search_external(
    &self,
    filter: &TenantFilter,
    query: &[f32],
    k: usize,
    min_similarity: f32,
  ) -> Result<Vec<SearchHit>> {
    let query_vec = Vector::from(query.to_vec());

    let rows = sqlx::query(&format!(
      "SELECT {c}, 1 - (embedding <=> $1) AS similarity FROM {s}.external_documents
       WHERE project_name = $2 AND branch_name = $3 AND path_hash = $4
         AND embedding IS NOT NULL
         AND 1 - (embedding <=> $1) >= $5
       ORDER BY embedding <=> $1
       LIMIT $6",
      c = EXTERNAL_COLUMNS,
      s = SCHEMA_NAME
    ))
    .bind(query_vec)
    .bind(&filter.project_name)
    .bind(&filter.branch_name)
    .bind(&filter.path_hash)
    .bind(min_similarity)
    .bind(k as i64)
    .fetch_all(self.pool())
    .await?;

    rows
      .iter()
      .map(|row| {
        let record = row_to_external(row)?;
        Ok(SearchHit {
          record: crate::documents::DocumentRecord {
            id: record.id,
            tenant: record.tenant,
            relative_path: record.relative_path,
            title: record.title,
            summary: record.summary,
            doc_type: record.doc_type,
            promotion_level: Default::default(),
            content_hash: record.content_hash,
            char_count: record.char_count,
            content: record.content,
            frontmatter: record.frontmatter,
            embedding: record.embedding,
            created_at: record.created_at,
            updated_at: record.updated_at,
          },
          similarity: row.try_get::<f64, _>("similarity")? as f32,
        })
      })
      .collect()
  }
}
