use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum DbError {
  #[error("Database error: {0}")]
  Sqlx(#[from] sqlx::Error),
  #[error("Not found: {entity} {id}")]
  NotFound { entity: &'static str, id: String },
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl DbError {
  /// Transient failures worth an in-process retry (pool exhaustion,
  /// dropped connections). Constraint and syntax errors are not.
  pub fn is_transient(&self) -> bool {
    match self {
      DbError::Sqlx(e) => matches!(
        e,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed
      ),
      _ => false,
    }
  }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Connection settings from the launch contract.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
  pub host: String,
  pub port: u16,
  pub database: String,
  pub user: String,
  pub password: String,
}

impl Default for PostgresOptions {
  fn default() -> Self {
    Self {
      host: "127.0.0.1".to_string(),
      port: 5433,
      database: "compounding".to_string(),
      user: "postgres".to_string(),
      password: String::new(),
    }
  }
}

/// Handle to the vector/metadata store. Cheap to clone; the pool is shared.
#[derive(Clone)]
pub struct Store {
  pool: PgPool,
  vector_dim: usize,
}

impl Store {
  /// Connect and ensure the schema exists at the configured dimension.
  pub async fn connect(options: &PostgresOptions, vector_dim: usize) -> Result<Self> {
    let connect = PgConnectOptions::new()
      .host(&options.host)
      .port(options.port)
      .database(&options.database)
      .username(&options.user)
      .password(&options.password);

    info!(
      host = %options.host,
      port = options.port,
      database = %options.database,
      "Connecting to store"
    );

    let pool = PgPoolOptions::new()
      .max_connections(8)
      .acquire_timeout(Duration::from_secs(10))
      .connect_with(connect)
      .await?;

    let store = Self { pool, vector_dim };
    store.ensure_exists().await?;
    Ok(store)
  }

  /// Wrap an existing pool (tests).
  pub fn from_pool(pool: PgPool, vector_dim: usize) -> Self {
    Self { pool, vector_dim }
  }

  pub fn pool(&self) -> &PgPool {
    &self.pool
  }

  pub fn vector_dim(&self) -> usize {
    self.vector_dim
  }

  /// Idempotent schema creation for all collections.
  pub async fn ensure_exists(&self) -> Result<()> {
    crate::schema::ensure_schema(&self.pool, self.vector_dim).await
  }

  /// Liveness probe for health reporting.
  pub async fn ping(&self) -> Result<()> {
    sqlx::query("SELECT 1").execute(&self.pool).await?;
    Ok(())
  }
}
