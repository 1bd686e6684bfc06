//! The `documents` collection: one row per compound document.

use crate::connection::{DbError, Result, Store};
use crate::filter::TenantFilter;
use crate::schema::SCHEMA_NAME;
use chrono::{DateTime, Utc};
use compound_core::{PromotionLevel, TenantKey};
use pgvector::Vector;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

/// A document row as stored.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
  pub id: Uuid,
  pub tenant: TenantKey,
  pub relative_path: String,
  pub title: String,
  pub summary: Option<String>,
  pub doc_type: String,
  pub promotion_level: PromotionLevel,
  pub content_hash: String,
  pub char_count: i32,
  /// Full body text, kept for context assembly without a disk round-trip.
  pub content: String,
  pub frontmatter: Option<serde_json::Value>,
  pub embedding: Option<Vec<f32>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// A record paired with its similarity score from a vector search.
#[derive(Debug, Clone)]
pub struct SearchHit {
  pub record: DocumentRecord,
  pub similarity: f32,
}

const DOCUMENT_COLUMNS: &str = "id, project_name, branch_name, path_hash, relative_path, title, summary, doc_type, \
                                promotion_level, content_hash, char_count, content, frontmatter, embedding, \
                                created_at, updated_at";

pub(crate) fn row_to_document(row: &PgRow) -> Result<DocumentRecord> {
  let promotion: String = row.try_get("promotion_level")?;
  let embedding: Option<Vector> = row.try_get("embedding")?;

  Ok(DocumentRecord {
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
    promotion_level: promotion.parse().unwrap_or_default(),
    content_hash: row.try_get("content_hash")?,
    char_count: row.try_get("char_count")?,
    content: row.try_get("content")?,
    frontmatter: row.try_get("frontmatter")?,
    embedding: embedding.map(|v| v.to_vec()),
    created_at: row.try_get("created_at")?,
    updated_at: row.try_get("updated_at")?,
  })
}

/// Upsert one document row on the given executor, so the same statement
/// serves both standalone calls and transaction scopes. Returns the id
/// actually stored, which is the pre-existing id when the path was already
/// indexed.
async fn upsert_document_on<'e, E>(executor: E, record: &DocumentRecord) -> Result<Uuid>
where
  E: sqlx::PgExecutor<'e>,
{
  let embedding = record.embedding.as_ref().map(|v| Vector::from(v.clone()));

  let row = sqlx::query(&format!(
    r#"INSERT INTO {s}.documents
         (id, project_name, branch_name, path_hash, relative_path, title, summary, doc_type,
          promotion_level, content_hash, char_count, content, frontmatter, embedding, created_at, updated_at)
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, now(), now())
       ON CONFLICT (project_name, branch_name, path_hash, relative_path) DO UPDATE SET
         title = EXCLUDED.title,
         summary = EXCLUDED.summary,
         doc_type = EXCLUDED.doc_type,
         promotion_level = EXCLUDED.promotion_level,
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
  .bind(record.promotion_level.as_str())
  .bind(&record.content_hash)
  .bind(record.char_count)
  .bind(&record.content)
  .bind(&record.frontmatter)
  .bind(embedding)
  .fetch_one(executor)
  .await?;

  Ok(row.try_get("id")?)
}

impl Store {
  /// Insert or update a document row keyed by (tenant, relative_path).
  pub async fn upsert_document(&self, record: &DocumentRecord) -> Result<Uuid> {
    let id = upsert_document_on(self.pool(), record).await?;
    debug!(document_path = %record.relative_path, "Upserted document");
    Ok(id)
  }

  /// Upsert a document row and replace its whole chunk set in one
  /// transaction. The document+chunks pair either commits together or not
  /// at all; the stored document id is bound as every chunk's parent.
  pub async fn upsert_document_with_chunks(
    &self,
    record: &DocumentRecord,
    chunks: &[crate::chunks::ChunkRecord],
  ) -> Result<Uuid> {
    let mut tx = self.pool().begin().await?;

    let document_id = upsert_document_on(&mut *tx, record).await?;

    sqlx::query(&format!(
      "DELETE FROM {s}.document_chunks WHERE document_id = $1",
      s = SCHEMA_NAME
    ))
    .bind(document_id)
    .execute(&mut *tx)
    .await?;

    for chunk in chunks {
      crate::chunks::insert_chunk_on(&mut *tx, document_id, chunk).await?;
    }

    tx.commit().await?;
    debug!(
      document_path = %record.relative_path,
      chunks = chunks.len(),
      "Upserted document with chunk set"
    );
    Ok(document_id)
  }

  pub async fn get_document(&self, id: Uuid) -> Result<Option<DocumentRecord>> {
    let row = sqlx::query(&format!(
      "SELECT {c} FROM {s}.documents WHERE id = $1",
      c = DOCUMENT_COLUMNS,
      s = SCHEMA_NAME
    ))
    .bind(id)
    .fetch_optional(self.pool())
    .await?;

    row.as_ref().map(row_to_document).transpose()
  }

  pub async fn get_document_by_path(&self, filter: &TenantFilter, relative_path: &str) -> Result<Option<DocumentRecord>> {
    let row = sqlx::query(&format!(
      "SELECT {c} FROM {s}.documents
       WHERE project_name = $1 AND branch_name = $2 AND path_hash = $3 AND relative_path = $4",
      c = DOCUMENT_COLUMNS,
      s = SCHEMA_NAME
    ))
    .bind(&filter.project_name)
    .bind(&filter.branch_name)
    .bind(&filter.path_hash)
    .bind(relative_path)
    .fetch_optional(self.pool())
    .await?;

    row.as_ref().map(row_to_document).transpose()
  }

  /// Batch fetch by relative path, single query.
  pub async fn get_documents_by_paths(&self, filter: &TenantFilter, paths: &[String]) -> Result<Vec<DocumentRecord>> {
    if paths.is_empty() {
      return Ok(Vec::new());
    }

    let rows = sqlx::query(&format!(
      "SELECT {c} FROM {s}.documents
       WHERE project_name = $1 AND branch_name = $2 AND path_hash = $3 AND relative_path = ANY($4)",
      c = DOCUMENT_COLUMNS,
      s = SCHEMA_NAME
    ))
    .bind(&filter.project_name)
    .bind(&filter.branch_name)
    .bind(&filter.path_hash)
    .bind(paths)
    .fetch_all(self.pool())
    .await?;

    rows.iter().map(row_to_document).collect()
  }

  pub async fn get_documents(&self, ids: &[Uuid]) -> Result<Vec<DocumentRecord>> {
    if ids.is_empty() {
      return Ok(Vec::new());
    }

    let rows = sqlx::query(&format!(
      "SELECT {c} FROM {s}.documents WHERE id = ANY($1)",
      c = DOCUMENT_COLUMNS,
      s = SCHEMA_NAME
    ))
    .bind(ids)
    .fetch_all(self.pool())
    .await?;

    rows.iter().map(row_to_document).collect()
  }

  /// Delete a document by path. Chunk rows cascade in the same scope.
  /// Returns the deleted document id when the row existed.
  pub async fn delete_document_by_path(&self, filter: &TenantFilter, relative_path: &str) -> Result<Option<Uuid>> {
    let row = sqlx::query(&format!(
      "DELETE FROM {s}.documents
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

  /// All (relative_path, content_hash) pairs for a tenant, for
  /// reconciliation diffing.
  pub async fn list_document_hashes(&self, filter: &TenantFilter) -> Result<Vec<(String, String)>> {
    let rows = sqlx::query(&format!(
      "SELECT relative_path, content_hash FROM {s}.documents
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

  /// Cosine-similarity search over documents, tenant-filtered. Critical
  /// documents bypass the relevance floor.
  pub async fn vector_search_documents(
    &self,
    filter: &TenantFilter,
    query: &[f32],
    k: usize,
    min_similarity: f32,
    doc_type: Option<&str>,
    promotion: Option<PromotionLevel>,
  ) -> Result<Vec<SearchHit>> {
    let query_vec = Vector::from(query.to_vec());

    let mut sql = format!(
      "SELECT {c}, 1 - (embedding <=> $1) AS similarity FROM {s}.documents
       WHERE project_name = $2 AND branch_name = $3 AND path_hash = $4
         AND embedding IS NOT NULL
         AND (1 - (embedding <=> $1) >= $5 OR promotion_level = 'critical')",
      c = DOCUMENT_COLUMNS,
      s = SCHEMA_NAME
    );
    if doc_type.is_some() {
      sql.push_str(" AND doc_type = $6");
    }
    if promotion.is_some() {
      sql.push_str(if doc_type.is_some() {
        " AND promotion_level = $7"
      } else {
        " AND promotion_level = $6"
      });
    }
    sql.push_str(" ORDER BY embedding <=> $1 LIMIT $");
    sql.push_str(&(6 + doc_type.is_some() as usize + promotion.is_some() as usize).to_string());

    let mut q = sqlx::query(&sql)
      .bind(query_vec)
      .bind(&filter.project_name)
      .bind(&filter.branch_name)
      .bind(&filter.path_hash)
      .bind(min_similarity);
    if let Some(dt) = doc_type {
      q = q.bind(dt.to_string());
    }
    if let Some(level) = promotion {
      q = q.bind(level.as_str());
    }
    q = q.bind(k as i64);

    let rows = q.fetch_all(self.pool()).await?;

    rows
      .iter()
      .map(|row| {
        Ok(SearchHit {
          record: row_to_document(row)?,
          similarity: row.try_get::<f64, _>("similarity")? as f32,
        })
      })
      .collect()
  }

  /// Set the promotion level of a document and all its chunks in one
  /// transaction. Either everything moves or nothing does.
  pub async fn update_promotion(&self, document_id: Uuid, level: PromotionLevel) -> Result<()> {
    let mut tx = self.pool().begin().await?;

    let updated = sqlx::query(&format!(
      "UPDATE {s}.documents SET promotion_level = $2, updated_at = now() WHERE id = $1",
      s = SCHEMA_NAME
    ))
    .bind(document_id)
    .bind(level.as_str())
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
      tx.rollback().await?;
      return Err(DbError::NotFound {
        entity: "document",
        id: document_id.to_string(),
      });
    }

    sqlx::query(&format!(
      "UPDATE {s}.document_chunks SET promotion_level = $2, updated_at = now() WHERE document_id = $1",
      s = SCHEMA_NAME
    ))
    .bind(document_id)
    .bind(level.as_str())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    debug!(document_id = %document_id, promotion_level = level.as_str(), "Promotion propagated");
    Ok(())
  }
}
