//! Tenant registry: worktree and branch records refreshed on every
//! activation.

use crate::connection::{Result, Store};
use crate::schema::SCHEMA_NAME;
use compound_core::TenantKey;
use tracing::debug;

impl Store {
  /// Record (or refresh) the worktree and branch rows for a tenant.
  pub async fn upsert_tenant(&self, tenant: &TenantKey, repo_root: &str) -> Result<()> {
    sqlx::query(&format!(
      r#"INSERT INTO {s}.worktrees (path_hash, repo_root, project_name, last_seen)
         VALUES ($1, $2, $3, now())
         ON CONFLICT (path_hash) DO UPDATE SET
           repo_root = EXCLUDED.repo_root,
           project_name = EXCLUDED.project_name,
           last_seen = now()"#,
      s = SCHEMA_NAME
    ))
    .bind(&tenant.path_hash)
    .bind(repo_root)
    .bind(&tenant.project_name)
    .execute(self.pool())
    .await?;

    sqlx::query(&format!(
      r#"INSERT INTO {s}.branches (project_name, branch_name, last_seen)
         VALUES ($1, $2, now())
         ON CONFLICT (project_name, branch_name) DO UPDATE SET last_seen = now()"#,
      s = SCHEMA_NAME
    ))
    .bind(&tenant.project_name)
    .bind(&tenant.branch_name)
    .execute(self.pool())
    .await?;

    debug!(
      project_name = %tenant.project_name,
      branch_name = %tenant.branch_name,
      path_hash = %tenant.path_hash,
      "Tenant registered"
    );
    Ok(())
  }

  /// Refresh last-seen timestamps on deactivation.
  pub async fn touch_tenant(&self, tenant: &TenantKey) -> Result<()> {
    sqlx::query(&format!(
      "UPDATE {s}.worktrees SET last_seen = now() WHERE path_hash = $1",
      s = SCHEMA_NAME
    ))
    .bind(&tenant.path_hash)
    .execute(self.pool())
    .await?;

    sqlx::query(&format!(
      "UPDATE {s}.branches SET last_seen = now() WHERE project_name = $1 AND branch_name = $2",
      s = SCHEMA_NAME
    ))
    .bind(&tenant.project_name)
    .bind(&tenant.branch_name)
    .execute(self.pool())
    .await?;

    Ok(())
  }
}
