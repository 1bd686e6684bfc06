use thiserror::Error;

/// Stable error codes surfaced to RPC callers.
///
/// These strings are part of the wire contract and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
  ProjectNotActivated,
  ConfigNotFound,
  InvalidConfig,
  ExternalDocsNotConfigured,
  SchemaValidationFailed,
  EmbeddingServiceError,
  ModelNotFound,
  DimensionMismatch,
  DatabaseError,
  FileSystemError,
  Internal,
}

impl ErrorCode {
  pub fn as_str(&self) -> &'static str {
    match self {
      ErrorCode::ProjectNotActivated => "PROJECT_NOT_ACTIVATED",
      ErrorCode::ConfigNotFound => "CONFIG_NOT_FOUND",
      ErrorCode::InvalidConfig => "INVALID_CONFIG",
      ErrorCode::ExternalDocsNotConfigured => "EXTERNAL_DOCS_NOT_CONFIGURED",
      ErrorCode::SchemaValidationFailed => "SCHEMA_VALIDATION_FAILED",
      ErrorCode::EmbeddingServiceError => "EMBEDDING_SERVICE_ERROR",
      ErrorCode::ModelNotFound => "MODEL_NOT_FOUND",
      ErrorCode::DimensionMismatch => "DIMENSION_MISMATCH",
      ErrorCode::DatabaseError => "DATABASE_ERROR",
      ErrorCode::FileSystemError => "FILE_SYSTEM_ERROR",
      ErrorCode::Internal => "INTERNAL",
    }
  }
}

impl std::fmt::Display for ErrorCode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("No project is activated")]
  ProjectNotActivated,

  #[error("Config file not found: {path}")]
  ConfigNotFound { path: String },

  #[error("Invalid config: {0}")]
  InvalidConfig(String),

  #[error("External docs are not configured for this project")]
  ExternalDocsNotConfigured,

  #[error("Frontmatter validation failed: {fields:?}")]
  SchemaValidationFailed { fields: Vec<String> },

  #[error("Embedding service error: {message}")]
  EmbeddingService {
    message: String,
    circuit_state: Option<String>,
    retry_after_seconds: Option<u64>,
  },

  #[error("Model not found: {0}")]
  ModelNotFound(String),

  #[error("Embedding dimension mismatch: {0}")]
  DimensionMismatch(String),

  #[error("Database error: {0}")]
  Database(String),

  #[error("File system error at {path}: {message}")]
  FileSystem { path: String, message: String },

  #[error("Internal error [{correlation_id}]: {message}")]
  Internal { correlation_id: String, message: String },
}

impl EngineError {
  pub fn code(&self) -> ErrorCode {
    match self {
      EngineError::ProjectNotActivated => ErrorCode::ProjectNotActivated,
      EngineError::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
      EngineError::InvalidConfig(_) => ErrorCode::InvalidConfig,
      EngineError::ExternalDocsNotConfigured => ErrorCode::ExternalDocsNotConfigured,
      EngineError::SchemaValidationFailed { .. } => ErrorCode::SchemaValidationFailed,
      EngineError::EmbeddingService { .. } => ErrorCode::EmbeddingServiceError,
      EngineError::ModelNotFound(_) => ErrorCode::ModelNotFound,
      EngineError::DimensionMismatch(_) => ErrorCode::DimensionMismatch,
      EngineError::Database(_) => ErrorCode::DatabaseError,
      EngineError::FileSystem { .. } => ErrorCode::FileSystemError,
      EngineError::Internal { .. } => ErrorCode::Internal,
    }
  }

  /// Wrap an arbitrary failure as an internal error with a fresh correlation id.
  pub fn internal(message: impl Into<String>) -> Self {
    EngineError::Internal {
      correlation_id: uuid::Uuid::new_v4().to_string(),
      message: message.into(),
    }
  }
}

pub type Result<T> = std::result::Result<T, EngineError>;
