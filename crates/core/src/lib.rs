pub mod config;
pub mod document;
pub mod error;
pub mod frontmatter;
pub mod naming;
pub mod tenant;
pub mod validation;

pub use config::{
  CircuitBreakerConfig, ConcurrencyConfig, CustomDocType, ExternalDocsConfig, FileWatcherConfig, LinkResolutionConfig,
  ProjectConfig, ResilienceConfig, RetrievalConfig, RetryConfig as ConfigRetry, BUILTIN_DOC_TYPES, RESERVED_TYPE_NAMES,
};
pub use document::{
  content_hash, BuiltinDocType, ChunkId, DocType, DocumentId, PromotionLevel, CHARS_PER_TOKEN, CHUNK_LINE_THRESHOLD,
};
pub use error::{EngineError, ErrorCode, Result};
pub use frontmatter::{parse_date, validate_frontmatter, Frontmatter};
pub use naming::{compose_filename, sanitize_title};
pub use tenant::{compute_path_hash, derive_repo_root, TenantKey};
pub use validation::{
  optional_string, optional_string_array, require_enum, require_string, require_string_array, ValidationError,
  ValidationResult,
};
