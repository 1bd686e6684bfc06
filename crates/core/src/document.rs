use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Estimated characters per token for budget math.
pub const CHARS_PER_TOKEN: usize = 4;

/// Documents at or under this many body lines stay unchunked.
pub const CHUNK_LINE_THRESHOLD: usize = 500;

/// Unique identifier for a document (newtype for type safety)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(Uuid);

impl DocumentId {
  pub fn new() -> Self {
    Self(Uuid::now_v7())
  }

  pub fn from_uuid(id: Uuid) -> Self {
    Self(id)
  }

  pub fn as_uuid(&self) -> Uuid {
    self.0
  }
}

impl Default for DocumentId {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Display for DocumentId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl std::str::FromStr for DocumentId {
  type Err = uuid::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(Self(Uuid::parse_str(s)?))
  }
}

/// Unique identifier for a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkId(Uuid);

impl ChunkId {
  pub fn new() -> Self {
    Self(Uuid::now_v7())
  }

  pub fn from_uuid(id: Uuid) -> Self {
    Self(id)
  }

  pub fn as_uuid(&self) -> Uuid {
    self.0
  }
}

impl Default for ChunkId {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Display for ChunkId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Document priority controlling retrieval ranking. Critical documents
/// bypass the relevance-score floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PromotionLevel {
  #[default]
  Standard,
  Important,
  Critical,
}

impl PromotionLevel {
  pub fn as_str(&self) -> &'static str {
    match self {
      PromotionLevel::Standard => "standard",
      PromotionLevel::Important => "important",
      PromotionLevel::Critical => "critical",
    }
  }

  /// Ordering weight for primary-result sorting: critical > important > standard.
  pub fn rank(&self) -> u8 {
    match self {
      PromotionLevel::Critical => 2,
      PromotionLevel::Important => 1,
      PromotionLevel::Standard => 0,
    }
  }

  /// Multiplier applied to linked-document relevance scores.
  pub fn score_multiplier(&self) -> f32 {
    match self {
      PromotionLevel::Critical => 1.3,
      PromotionLevel::Important => 1.15,
      PromotionLevel::Standard => 1.0,
    }
  }
}

impl std::str::FromStr for PromotionLevel {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "standard" => Ok(PromotionLevel::Standard),
      "important" => Ok(PromotionLevel::Important),
      "critical" => Ok(PromotionLevel::Critical),
      _ => Err(format!("Unknown promotion level: {}", s)),
    }
  }
}

impl std::fmt::Display for PromotionLevel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Document type tag: one of the built-in kinds or a custom type
/// registered in project config.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocType {
  Known(BuiltinDocType),
  Custom(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuiltinDocType {
  Problem,
  Insight,
  Codebase,
  Tool,
  Style,
}

impl BuiltinDocType {
  pub fn as_str(&self) -> &'static str {
    match self {
      BuiltinDocType::Problem => "problem",
      BuiltinDocType::Insight => "insight",
      BuiltinDocType::Codebase => "codebase",
      BuiltinDocType::Tool => "tool",
      BuiltinDocType::Style => "style",
    }
  }
}

impl DocType {
  pub fn parse(s: &str) -> Self {
    match s {
      "problem" => DocType::Known(BuiltinDocType::Problem),
      "insight" => DocType::Known(BuiltinDocType::Insight),
      "codebase" => DocType::Known(BuiltinDocType::Codebase),
      "tool" => DocType::Known(BuiltinDocType::Tool),
      "style" => DocType::Known(BuiltinDocType::Style),
      other => DocType::Custom(other.to_string()),
    }
  }

  pub fn as_str(&self) -> &str {
    match self {
      DocType::Known(b) => b.as_str(),
      DocType::Custom(s) => s.as_str(),
    }
  }

  pub fn is_builtin(&self) -> bool {
    matches!(self, DocType::Known(_))
  }
}

impl std::fmt::Display for DocType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Compute the SHA-256 content hash of file bytes as lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
  use sha2::{Digest, Sha256};
  let mut hasher = Sha256::new();
  hasher.update(bytes);
  format!("{:x}", hasher.finalize())
}
