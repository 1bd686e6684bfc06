//! Per-project configuration, loaded from the project's `config.json`.
//!
//! Every section is optional on disk; serde defaults fill the rest. Values
//! with operational limits are clamped on load rather than rejected.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Doc types every project understands without registration.
pub const BUILTIN_DOC_TYPES: &[&str] = &["problem", "insight", "codebase", "tool", "style"];

/// Names reserved by the tool surface; custom doc types may not use them.
pub const RESERVED_TYPE_NAMES: &[&str] = &[
  "create-type",
  "capture-select",
  "activate",
  "query",
  "search",
  "search-external",
  "query-external",
  "delete",
  "promote",
  "todo",
  "worktree",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileWatcherConfig {
  /// Per-path debounce window in milliseconds, clamped to [100, 5000].
  pub debounce_ms: u64,
}

impl Default for FileWatcherConfig {
  fn default() -> Self {
    Self { debounce_ms: 500 }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkResolutionConfig {
  /// Maximum BFS depth for link expansion; 0 disables link following.
  pub max_depth: usize,
}

impl Default for LinkResolutionConfig {
  fn default() -> Self {
    Self { max_depth: 2 }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
  pub top_k: usize,
  pub min_relevance_score: f32,
  pub max_linked_docs: usize,
}

impl Default for RetrievalConfig {
  fn default() -> Self {
    Self {
      top_k: 10,
      min_relevance_score: 0.7,
      max_linked_docs: 5,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalDocsConfig {
  pub path: PathBuf,
  #[serde(default = "default_include_patterns")]
  pub include_patterns: Vec<String>,
  #[serde(default)]
  pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomDocType {
  pub name: String,
  pub description: String,
  pub folder: String,
  pub schema_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
  /// Concurrent outbound calls to the model hosts.
  pub max_parallelism: usize,
  /// Callers allowed to wait for a permit before failing rate-limited.
  pub max_queue: usize,
}

impl Default for ConcurrencyConfig {
  fn default() -> Self {
    Self {
      max_parallelism: 2,
      max_queue: 10,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_attempts: u32,
  pub initial_delay_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      initial_delay_ms: 1000,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
  pub sampling_duration_secs: u64,
  pub minimum_throughput: usize,
  pub failure_ratio: f64,
  pub break_duration_secs: u64,
}

impl Default for CircuitBreakerConfig {
  fn default() -> Self {
    Self {
      sampling_duration_secs: 30,
      minimum_throughput: 5,
      failure_ratio: 0.5,
      break_duration_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
  pub concurrency: ConcurrencyConfig,
  pub retry: RetryConfig,
  pub circuit_breaker: CircuitBreakerConfig,
}

/// Full project configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
  /// Project name, used when frontmatter is silent. Falls back to the repo
  /// directory name, then `"unknown"`.
  pub project_name: Option<String>,

  /// Directory under the repo root that holds the compound documents.
  pub docs_root: PathBuf,

  pub include_patterns: Vec<String>,
  pub exclude_patterns: Vec<String>,

  pub file_watcher: FileWatcherConfig,
  pub link_resolution: LinkResolutionConfig,
  pub retrieval: RetrievalConfig,

  pub external_docs: Option<ExternalDocsConfig>,
  pub custom_doc_types: Vec<CustomDocType>,

  pub resilience: ResilienceConfig,

  /// Skip startup dimension validation. Emits a prominent warning.
  pub skip_dimension_validation: bool,
}

impl Default for ProjectConfig {
  fn default() -> Self {
    Self {
      project_name: None,
      docs_root: PathBuf::from("./csharp-compounding-docs"),
      include_patterns: default_include_patterns(),
      exclude_patterns: Vec::new(),
      file_watcher: FileWatcherConfig::default(),
      link_resolution: LinkResolutionConfig::default(),
      retrieval: RetrievalConfig::default(),
      external_docs: None,
      custom_doc_types: Vec::new(),
      resilience: ResilienceConfig::default(),
      skip_dimension_validation: false,
    }
  }
}

fn default_include_patterns() -> Vec<String> {
  vec!["**/*.md".to_string()]
}

impl ProjectConfig {
  /// Load a config file, apply clamps, and validate custom doc types.
  pub fn load(path: &Path) -> Result<Self> {
    if !path.exists() {
      return Err(EngineError::ConfigNotFound {
        path: path.to_string_lossy().to_string(),
      });
    }

    let content = std::fs::read_to_string(path).map_err(|e| EngineError::FileSystem {
      path: path.to_string_lossy().to_string(),
      message: e.to_string(),
    })?;

    let mut config: ProjectConfig =
      serde_json::from_str(&content).map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
    config.clamp();
    config.validate()?;
    Ok(config)
  }

  /// Clamp values with operational limits instead of failing the load.
  pub fn clamp(&mut self) {
    self.file_watcher.debounce_ms = self.file_watcher.debounce_ms.clamp(100, 5000);
    self.retrieval.min_relevance_score = self.retrieval.min_relevance_score.clamp(0.0, 1.0);
  }

  /// Structural validation that cannot be expressed by serde.
  pub fn validate(&self) -> Result<()> {
    for custom in &self.custom_doc_types {
      if !is_kebab_case(&custom.name) {
        return Err(EngineError::InvalidConfig(format!(
          "custom doc type name must be kebab-case: {}",
          custom.name
        )));
      }
      if BUILTIN_DOC_TYPES.contains(&custom.name.as_str()) {
        return Err(EngineError::InvalidConfig(format!(
          "custom doc type collides with built-in type: {}",
          custom.name
        )));
      }
      if RESERVED_TYPE_NAMES.contains(&custom.name.as_str()) {
        return Err(EngineError::InvalidConfig(format!(
          "custom doc type uses a reserved name: {}",
          custom.name
        )));
      }
    }

    let mut seen = std::collections::HashSet::new();
    for custom in &self.custom_doc_types {
      if !seen.insert(custom.name.as_str()) {
        return Err(EngineError::InvalidConfig(format!(
          "duplicate custom doc type: {}",
          custom.name
        )));
      }
    }

    Ok(())
  }

  /// Resolve the effective project name for a repo root.
  pub fn resolve_project_name(&self, repo_root: &Path) -> String {
    if let Some(ref name) = self.project_name {
      if !name.is_empty() {
        return name.clone();
      }
    }
    repo_root
      .file_name()
      .map(|n| n.to_string_lossy().to_string())
      .unwrap_or_else(|| "unknown".to_string())
  }

  /// Absolute docs root for a repo root.
  pub fn resolved_docs_root(&self, repo_root: &Path) -> PathBuf {
    if self.docs_root.is_absolute() {
      self.docs_root.clone()
    } else {
      repo_root.join(&self.docs_root)
    }
  }

  /// Look up a registered custom doc type by name.
  pub fn custom_doc_type(&self, name: &str) -> Option<&CustomDocType> {
    self.custom_doc_types.iter().find(|t| t.name == name)
  }

  /// Generate a commented starter config as a string.
  pub fn generate_template() -> String {
    r#"{
  "project_name": "my-project",
  "docs_root": "./csharp-compounding-docs",
  "include_patterns": ["**/*.md"],
  "exclude_patterns": [],
  "file_watcher": { "debounce_ms": 500 },
  "link_resolution": { "max_depth": 2 },
  "retrieval": { "top_k": 10, "min_relevance_score": 0.7, "max_linked_docs": 5 },
  "custom_doc_types": []
}
"#
    .to_string()
  }
}

fn is_kebab_case(s: &str) -> bool {
  !s.is_empty()
    && !s.starts_with('-')
    && !s.ends_with('-')
    && !s.contains("--")
    && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
