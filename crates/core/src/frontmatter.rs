//! Typed frontmatter schema for compound documents.
//!
//! Frontmatter arrives as a YAML map; we convert it to a JSON value once and
//! validate the required fields against the document's declared type. Unknown
//! fields survive untouched and are stored alongside the document.

use crate::document::{DocType, PromotionLevel};
use crate::error::{EngineError, Result};
use crate::validation::{optional_string, require_enum, require_string, require_string_array, ValidationError};
use chrono::NaiveDate;
use serde_json::Value;

const SIGNIFICANCE_VALUES: &[&str] = &["critical", "architectural", "behavioral", "procedural", "minor"];
const STATUS_VALUES: &[&str] = &["active", "draft", "archived", "superseded"];

/// Validated frontmatter for a compound document.
#[derive(Debug, Clone)]
pub struct Frontmatter {
  pub doc_type: DocType,
  pub title: String,
  pub date: NaiveDate,
  pub summary: String,
  pub significance: String,
  pub tags: Vec<String>,
  pub status: String,
  pub promotion_level: PromotionLevel,
  pub project: Option<String>,

  /// The complete original map, unknown fields included.
  pub raw: Value,
}

/// Parse a `YYYY-MM-DD` frontmatter date.
pub fn parse_date(value: &str) -> std::result::Result<NaiveDate, ValidationError> {
  NaiveDate::parse_from_str(value, "%Y-%m-%d")
    .map_err(|_| ValidationError::new("date", "must be a YYYY-MM-DD date"))
}

/// Validate a frontmatter map against the base schema and the per-type
/// required fields. Collects every failed field before reporting.
pub fn validate_frontmatter(raw: &Value) -> Result<Frontmatter> {
  let map = match raw.as_object() {
    Some(m) => m,
    None => {
      return Err(EngineError::SchemaValidationFailed {
        fields: vec!["frontmatter: expected a mapping".to_string()],
      });
    }
  };

  let mut failures: Vec<String> = Vec::new();
  let field = |name: &str| map.get(name);

  let doc_type = match require_string(field("type"), "type") {
    Ok(s) => Some(DocType::parse(&s)),
    Err(e) => {
      failures.push(e.to_string());
      None
    }
  };

  let title = collect(require_string(field("title"), "title"), &mut failures);

  let date = match require_string(field("date"), "date") {
    Ok(s) => match parse_date(&s) {
      Ok(d) => Some(d),
      Err(e) => {
        failures.push(e.to_string());
        None
      }
    },
    Err(e) => {
      failures.push(e.to_string());
      None
    }
  };

  let summary = collect(require_string(field("summary"), "summary"), &mut failures);
  let significance = collect(
    require_enum(field("significance"), "significance", SIGNIFICANCE_VALUES),
    &mut failures,
  );
  let tags = collect(require_string_array(field("tags"), "tags"), &mut failures);
  let status = collect(require_enum(field("status"), "status", STATUS_VALUES), &mut failures);

  let promotion_level = match field("promotion_level") {
    None => PromotionLevel::Standard,
    Some(v) => match v.as_str().map(str::parse::<PromotionLevel>) {
      Some(Ok(level)) => level,
      _ => {
        failures.push("promotion_level: must be one of: standard, important, critical".to_string());
        PromotionLevel::Standard
      }
    },
  };

  let project = match optional_string(field("project"), "project") {
    Ok(p) => p,
    Err(e) => {
      failures.push(e.to_string());
      None
    }
  };

  // Type-specific required fields
  if let Some(ref dt) = doc_type {
    for required in type_required_fields(dt) {
      if let Err(e) = require_string(field(required), required) {
        failures.push(e.to_string());
      }
    }
  }

  if !failures.is_empty() {
    return Err(EngineError::SchemaValidationFailed { fields: failures });
  }

  Ok(Frontmatter {
    doc_type: doc_type.expect("validated"),
    title: title.expect("validated"),
    date: date.expect("validated"),
    summary: summary.expect("validated"),
    significance: significance.expect("validated"),
    tags: tags.expect("validated"),
    status: status.expect("validated"),
    promotion_level,
    project,
    raw: raw.clone(),
  })
}

fn collect<T>(result: std::result::Result<T, ValidationError>, failures: &mut Vec<String>) -> Option<T> {
  match result {
    Ok(v) => Some(v),
    Err(e) => {
      failures.push(e.to_string());
      None
    }
  }
}

fn type_required_fields(doc_type: &DocType) -> &'static [&'static str] {
  match doc_type.as_str() {
    "problem" => &["symptoms", "root_cause", "solution"],
    "insight" => &["insight_type", "observation", "implication"],
    "tool" => &["tool_name", "version", "knowledge_type"],
    _ => &[],
  }
}
