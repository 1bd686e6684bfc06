use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// The triple that scopes every store read and write to one
/// project + branch + worktree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantKey {
  pub project_name: String,
  pub branch_name: String,
  pub path_hash: String,
}

impl TenantKey {
  pub fn new(project_name: impl Into<String>, branch_name: impl Into<String>, path_hash: impl Into<String>) -> Self {
    Self {
      project_name: project_name.into(),
      branch_name: branch_name.into(),
      path_hash: path_hash.into(),
    }
  }
}

impl std::fmt::Display for TenantKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}/{}/{}", self.project_name, self.branch_name, self.path_hash)
  }
}

/// First 16 lowercase hex chars of SHA-256 over the normalized absolute
/// repo path. Separators normalize to `/` and trailing separators drop,
/// so the same worktree hashes identically on every platform.
pub fn compute_path_hash(repo_root: &Path) -> String {
  let normalized = normalize_path(&repo_root.to_string_lossy());
  let mut hasher = Sha256::new();
  hasher.update(normalized.as_bytes());
  let digest = format!("{:x}", hasher.finalize());
  digest[..16].to_string()
}

fn normalize_path(raw: &str) -> String {
  let mut s = raw.replace('\\', "/");
  while s.len() > 1 && s.ends_with('/') {
    s.pop();
  }
  s
}

/// Derive the repository root from a project config path.
///
/// The config lives inside a `.csharp-compounding-docs`-style directory at
/// the repo root; the root is that directory's parent. Falls back to the
/// config file's own parent when no dot-directory encloses it.
pub fn derive_repo_root(config_path: &Path) -> PathBuf {
  let mut current = config_path.parent();
  while let Some(dir) = current {
    let is_config_dir = dir
      .file_name()
      .map(|n| n.to_string_lossy().starts_with('.') && n.to_string_lossy().contains("compounding-docs"))
      .unwrap_or(false);
    if is_config_dir {
      return dir.parent().map(|p| p.to_path_buf()).unwrap_or_else(|| dir.to_path_buf());
    }
    current = dir.parent();
  }
  config_path
    .parent()
    .map(|p| p.to_path_buf())
    .unwrap_or_else(|| PathBuf::from("."))
}
