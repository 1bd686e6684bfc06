//! DDL for the `compounding` schema.
//!
//! Collections live in their own schema so unrelated database content stays
//! untouched. Creation is idempotent; the vector columns are created at the
//! configured dimension and ANN-indexed with cosine distance.

use crate::connection::Result;
use sqlx::postgres::PgPool;
use tracing::debug;

pub const SCHEMA_NAME: &str = "compounding";

/// The four logical collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
  Documents,
  DocumentChunks,
  ExternalDocuments,
  ExternalDocumentChunks,
}

impl Collection {
  pub fn table_name(&self) -> &'static str {
    match self {
      Collection::Documents => "documents",
      Collection::DocumentChunks => "document_chunks",
      Collection::ExternalDocuments => "external_documents",
      Collection::ExternalDocumentChunks => "external_document_chunks",
    }
  }

  pub fn qualified(&self) -> String {
    format!("{}.{}", SCHEMA_NAME, self.table_name())
  }

  pub const ALL: [Collection; 4] = [
    Collection::Documents,
    Collection::DocumentChunks,
    Collection::ExternalDocuments,
    Collection::ExternalDocumentChunks,
  ];
}

/// Create the schema, extension, tables, and indexes if absent.
pub async fn ensure_schema(pool: &PgPool, vector_dim: usize) -> Result<()> {
  sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", SCHEMA_NAME))
    .execute(pool)
    .await?;
  sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
    .execute(pool)
    .await?;

  for statement in table_statements(vector_dim) {
    debug!("Applying DDL statement");
    sqlx::query(&statement).execute(pool).await?;
  }

  Ok(())
}

fn table_statements(dim: usize) -> Vec<String> {
  let mut statements = Vec::new();

  statements.push(format!(
    r#"CREATE TABLE IF NOT EXISTS {s}.documents (
        id UUID PRIMARY KEY,
        project_name TEXT NOT NULL,
        branch_name TEXT NOT NULL,
        path_hash TEXT NOT NULL,
        relative_path TEXT NOT NULL,
        title TEXT NOT NULL,
        summary TEXT,
        doc_type TEXT NOT NULL,
        promotion_level TEXT NOT NULL DEFAULT 'standard',
        content_hash TEXT NOT NULL,
        char_count INTEGER NOT NULL,
        content TEXT NOT NULL DEFAULT '',
        frontmatter JSONB,
        embedding vector({dim}),
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (project_name, branch_name, path_hash, relative_path)
    )"#,
    s = SCHEMA_NAME,
    dim = dim
  ));

  statements.push(format!(
    r#"CREATE TABLE IF NOT EXISTS {s}.document_chunks (
        id UUID PRIMARY KEY,
        document_id UUID NOT NULL REFERENCES {s}.documents(id) ON DELETE CASCADE,
        project_name TEXT NOT NULL,
        branch_name TEXT NOT NULL,
        path_hash TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        header_path TEXT NOT NULL,
        content TEXT NOT NULL,
        promotion_level TEXT NOT NULL DEFAULT 'standard',
        embedding vector({dim}),
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    s = SCHEMA_NAME,
    dim = dim
  ));

  statements.push(format!(
    r#"CREATE TABLE IF NOT EXISTS {s}.external_documents (
        id UUID PRIMARY KEY,
        project_name TEXT NOT NULL,
        branch_name TEXT NOT NULL,
        path_hash TEXT NOT NULL,
        relative_path TEXT NOT NULL,
        title TEXT NOT NULL,
        summary TEXT,
        doc_type TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        char_count INTEGER NOT NULL,
        content TEXT NOT NULL DEFAULT '',
        frontmatter JSONB,
        embedding vector({dim}),
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (project_name, branch_name, path_hash, relative_path)
    )"#,
    s = SCHEMA_NAME,
    dim = dim
  ));

  statements.push(format!(
    r#"CREATE TABLE IF NOT EXISTS {s}.external_document_chunks (
        id UUID PRIMARY KEY,
        document_id UUID NOT NULL REFERENCES {s}.external_documents(id) ON DELETE CASCADE,
        project_name TEXT NOT NULL,
        branch_name TEXT NOT NULL,
        path_hash TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        header_path TEXT NOT NULL,
        content TEXT NOT NULL,
        embedding vector({dim}),
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    s = SCHEMA_NAME,
    dim = dim
  ));

  statements.push(format!(
    r#"CREATE TABLE IF NOT EXISTS {s}.worktrees (
        path_hash TEXT PRIMARY KEY,
        repo_root TEXT NOT NULL,
        project_name TEXT NOT NULL,
        last_seen TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    s = SCHEMA_NAME
  ));

  statements.push(format!(
    r#"CREATE TABLE IF NOT EXISTS {s}.branches (
        project_name TEXT NOT NULL,
        branch_name TEXT NOT NULL,
        last_seen TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (project_name, branch_name)
    )"#,
    s = SCHEMA_NAME
  ));

  // Tenant-key and filter indexes
  for table in ["documents", "document_chunks", "external_documents", "external_document_chunks"] {
    statements.push(format!(
      "CREATE INDEX IF NOT EXISTS idx_{t}_tenant ON {s}.{t} (project_name, branch_name, path_hash)",
      s = SCHEMA_NAME,
      t = table
    ));
  }
  statements.push(format!(
    "CREATE INDEX IF NOT EXISTS idx_documents_doc_type ON {s}.documents (doc_type)",
    s = SCHEMA_NAME
  ));
  statements.push(format!(
    "CREATE INDEX IF NOT EXISTS idx_documents_promotion ON {s}.documents (promotion_level)",
    s = SCHEMA_NAME
  ));
  statements.push(format!(
    "CREATE INDEX IF NOT EXISTS idx_document_chunks_document ON {s}.document_chunks (document_id)",
    s = SCHEMA_NAME
  ));
  statements.push(format!(
    "CREATE INDEX IF NOT EXISTS idx_external_document_chunks_document ON {s}.external_document_chunks (document_id)",
    s = SCHEMA_NAME
  ));

  // ANN indexes, cosine distance
  for table in ["documents", "document_chunks", "external_documents", "external_document_chunks"] {
    statements.push(format!(
      "CREATE INDEX IF NOT EXISTS idx_{t}_embedding ON {s}.{t} USING ivfflat (embedding vector_cosine_ops)",
      s = SCHEMA_NAME,
      t = table
    ));
  }

  statements
}

/// Configured dimension of a collection's vector column, or None when the
/// collection does not exist yet.
pub async fn vector_column_dim(pool: &PgPool, collection: Collection) -> Result<Option<usize>> {
  let row: Option<(i32,)> = sqlx::query_as(
    r#"SELECT a.atttypmod
       FROM pg_attribute a
       JOIN pg_class c ON a.attrelid = c.oid
       JOIN pg_namespace n ON c.relnamespace = n.oid
       WHERE n.nspname = $1 AND c.relname = $2 AND a.attname = 'embedding'"#,
  )
  .bind(SCHEMA_NAME)
  .bind(collection.table_name())
  .fetch_optional(pool)
  .await?;

  // pgvector stores the dimension directly in atttypmod
  Ok(row.map(|(typmod,)| typmod.max(0) as usize))
}
