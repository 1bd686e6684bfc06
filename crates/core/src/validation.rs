//! Field validation helpers for frontmatter and tool arguments.
//!
//! Centralized so every caller produces the same error shape.

use std::fmt;
use thiserror::Error;

/// A validation error with field information
#[derive(Debug, Clone, Error)]
pub struct ValidationError {
  pub field: String,
  pub message: String,
}

impl fmt::Display for ValidationError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.field, self.message)
  }
}

impl ValidationError {
  pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      field: field.into(),
      message: message.into(),
    }
  }

  pub fn missing(field: impl Into<String>) -> Self {
    let field = field.into();
    Self {
      message: format!("{} is required", field),
      field,
    }
  }

  pub fn invalid_type(field: impl Into<String>, expected: &str) -> Self {
    Self {
      field: field.into(),
      message: format!("expected {}", expected),
    }
  }

  pub fn invalid_enum(field: impl Into<String>, valid_values: &[&str]) -> Self {
    Self {
      field: field.into(),
      message: format!("must be one of: {}", valid_values.join(", ")),
    }
  }
}

/// Result type for validation
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a required string field
pub fn require_string(value: Option<&serde_json::Value>, field: &str) -> ValidationResult<String> {
  match value {
    Some(v) => v
      .as_str()
      .map(String::from)
      .ok_or_else(|| ValidationError::invalid_type(field, "string")),
    None => Err(ValidationError::missing(field)),
  }
}

/// Validate an optional string field
pub fn optional_string(value: Option<&serde_json::Value>, field: &str) -> ValidationResult<Option<String>> {
  match value {
    Some(v) if v.is_null() => Ok(None),
    Some(v) => v
      .as_str()
      .map(|s| Some(s.to_string()))
      .ok_or_else(|| ValidationError::invalid_type(field, "string")),
    None => Ok(None),
  }
}

/// Validate a required string field constrained to an enum set
pub fn require_enum(value: Option<&serde_json::Value>, field: &str, valid_values: &[&str]) -> ValidationResult<String> {
  let s = require_string(value, field)?;
  if valid_values.contains(&s.as_str()) {
    Ok(s)
  } else {
    Err(ValidationError::invalid_enum(field, valid_values))
  }
}

/// Validate a required array-of-strings field. A bare string is accepted
/// as a single-element array, matching how YAML authors commonly write tags.
pub fn require_string_array(value: Option<&serde_json::Value>, field: &str) -> ValidationResult<Vec<String>> {
  match value {
    Some(serde_json::Value::String(s)) => Ok(vec![s.clone()]),
    Some(serde_json::Value::Array(items)) => items
      .iter()
      .map(|v| {
        v.as_str()
          .map(String::from)
          .ok_or_else(|| ValidationError::invalid_type(field, "array of strings"))
      })
      .collect(),
    Some(_) => Err(ValidationError::invalid_type(field, "array of strings")),
    None => Err(ValidationError::missing(field)),
  }
}

/// Validate an optional array-of-strings field
pub fn optional_string_array(value: Option<&serde_json::Value>, field: &str) -> ValidationResult<Option<Vec<String>>> {
  match value {
    Some(v) if v.is_null() => Ok(None),
    Some(_) => require_string_array(value, field).map(Some),
    None => Ok(None),
  }
}
