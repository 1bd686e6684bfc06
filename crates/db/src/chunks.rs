//! The `document_chunks` collection: ordered H2/H3 sections of large
//! documents. Chunks are regenerated whole, never merged.

use crate::connection::{Result, Store};
use crate::filter::TenantFilter;
use crate::schema::SCHEMA_NAME;
use chrono::{DateTime, Utc};
use compound_core::{PromotionLevel, TenantKey};
use pgvector::Vector;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ChunkRecord {
  pub id: Uuid,
  pub document_id: Uuid,
  pub tenant: TenantKey,
  pub chunk_index: i32,
  pub header_path: String,
  pub content: String,
  pub promotion_level: PromotionLevel,
  pub embedding: Option<Vec<f32>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

const CHUNK_COLUMNS: &str =
  "id, document_id, project_name, branch_name, path_hash, chunk_index, header_path, content, promotion_level, \
   embedding, created_at, updated_at";

fn row_to_chunk(row: &PgRow) -> Result<ChunkRecord> {
  let promotion: String = row.try_get("promotion_level")?;
  let embedding: Option<Vector> = row.try_get("embedding")?;

  Ok(ChunkRecord {
    id: row.try_get("id")?,
    document_id: row.try_get("document_id")?,
    tenant: TenantKey::new(
      row.try_get::<String, _>("project_name")?,
      row.try_get::<String, _>("branch_name")?,
      row.try_get::<String, _>("path_hash")?,
    ),
    chunk_index: row.try_get("chunk_index")?,
    header_path: row.try_get("header_path")?,
    content: row.try_get("content")?,
    promotion_level: promotion.parse().unwrap_or_default(),
    embedding: embedding.map(|v| v.to_vec()),
    created_at: row.try_get("created_at")?,
    updated_at: row.try_get("updated_at")?,
  })
}

/// Insert one chunk row on the given executor, parented to `document_id`.
/// Shared by the standalone replace and the document+chunks transaction.
pub(crate) async fn insert_chunk_on<'e, E>(executor: E, document_id: Uuid, chunk: &ChunkRecord) -> Result<()>
where
  E: sqlx::PgExecutor<'e>,
{
  let embedding = chunk.embedding.as_ref().map(|v| Vector::from(v.clone()));

  sqlx::query(&format!(
    r#"INSERT INTO {s}.document_chunks
         (id, document_id, project_name, branch_name, path_hash, chunk_index, header_path,
          content, promotion_level, embedding, created_at, updated_at)
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now(), now())"#,
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
  .bind(chunk.promotion_level.as_str())
  .bind(embedding)
  .execute(executor)
  .await?;

  Ok(())
}

impl Store {
  /// Replace every chunk of a document with a new set, in one transaction.
  pub async fn replace_chunks(&self, document_id: Uuid, chunks: &[ChunkRecord]) -> Result<()> {
    let mut tx = self.pool().begin().await?;

    sqlx::query(&format!(
      "DELETE FROM {s}.document_chunks WHERE document_id = $1",
      s = SCHEMA_NAME
    ))
    .bind(document_id)
    .execute(&mut *tx)
    .await?;

    for chunk in chunks {
      insert_chunk_on(&mut *tx, document_id, chunk).await?;
    }

    tx.commit().await?;
    debug!(document_id = %document_id, chunks = chunks.len(), "Replaced chunk set");
    Ok(())
  }

  pub async fn get_chunks_for_document(&self, document_id: Uuid) -> Result<Vec<ChunkRecord>> {
    let rows = sqlx::query(&format!(
      "SELECT {c} FROM {s}.document_chunks WHERE document_id = $1 ORDER BY chunk_index",
      c = CHUNK_COLUMNS,
      s = SCHEMA_NAME
    ))
    .bind(document_id)
    .fetch_all(self.pool())
    .await?;

    rows.iter().map(row_to_chunk).collect()
  }

  pub async fn delete_chunks_for_document(&self, document_id: Uuid) -> Result<u64> {
    let result = sqlx::query(&format!(
      "DELETE FROM {s}.document_chunks WHERE document_id = $1",
      s = SCHEMA_NAME
    ))
    .bind(document_id)
    .execute(self.pool())
    .await?;

    Ok(result.rows_affected())
  }

  pub async fn count_chunks(&self, filter: &TenantFilter) -> Result<i64> {
    let row = sqlx::query(&format!(
      "SELECT COUNT(*) AS n FROM {s}.document_chunks
       WHERE project_name = $1 AND branch_name = $2 AND path_hash = $3",
      s = SCHEMA_NAME
    ))
    .bind(&filter.project_name)
    .bind(&filter.branch_name)
    .bind(&filter.path_hash)
    .fetch_one(self.pool())
    .await?;

    Ok(row.try_get("n")?)
  }
}
