//! RAG answer generation: token-budgeted context assembly, chat invocation,
//! and citations for every document actually shown to the model.

use crate::planner::{LinkedResult, PrimaryResult};
use compound_core::{PromotionLevel, CHARS_PER_TOKEN};
use llm::{ChatError, ChatMessage, ChatProvider, ResilientChat};
use embedding::PipelineError;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub type SharedChat = Arc<ResilientChat<Box<dyn ChatProvider>>>;

const SYSTEM_PROMPT: &str = "You are a documentation assistant answering questions from a team's captured \
                             engineering knowledge. Ground every statement in the provided documents and cite \
                             sources by their relative path. If the provided context is insufficient to answer, \
                             say so plainly instead of guessing.";

#[derive(Error, Debug)]
pub enum RagError {
  #[error("Chat service unavailable: {message}")]
  ChatUnavailable {
    message: String,
    circuit_state: Option<String>,
    retry_after_seconds: Option<u64>,
  },
}

#[derive(Debug, Clone)]
pub struct RagOptions {
  pub max_context_tokens: usize,
  pub reserved_response_tokens: usize,
  pub include_linked: bool,
}

impl Default for RagOptions {
  fn default() -> Self {
    Self {
      max_context_tokens: 8192,
      reserved_response_tokens: 1024,
      include_linked: true,
    }
  }
}

/// A document that was included in the prompt.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
  pub relative_path: String,
  pub title: String,
  pub doc_type: String,
  pub relevance: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub promotion_level: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub linked_from: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub link_depth: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct RagAnswer {
  pub answer: String,
  pub citations_primary: Vec<Citation>,
  pub citations_linked: Vec<Citation>,
}

/// Token estimate: four characters per token, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
  text.len().div_ceil(CHARS_PER_TOKEN)
}

pub struct RagGenerator {
  chat: SharedChat,
}

impl RagGenerator {
  pub fn new(chat: SharedChat) -> Self {
    Self { chat }
  }

  /// Build the budgeted prompt, invoke the chat host, and return the
  /// answer with citations for everything included.
  pub async fn answer(
    &self,
    query: &str,
    primary: &[PrimaryResult],
    linked: &[LinkedResult],
    options: &RagOptions,
  ) -> Result<RagAnswer, RagError> {
    let (context, citations_primary, citations_linked) = build_context(primary, linked, options);

    let user_prompt = format!("{}\n\n---\n\nQuestion: {}", context, query);
    let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user_prompt)];

    let answer = self.chat.complete(&messages).await.map_err(|e| match e {
      PipelineError::CircuitOpen { retry_after } => RagError::ChatUnavailable {
        message: "chat circuit open".to_string(),
        circuit_state: Some("open".to_string()),
        retry_after_seconds: Some(retry_after.as_secs().max(1)),
      },
      other => RagError::ChatUnavailable {
        message: describe_pipeline_error(&other),
        circuit_state: None,
        retry_after_seconds: None,
      },
    })?;

    Ok(RagAnswer {
      answer,
      citations_primary,
      citations_linked,
    })
  }
}

fn describe_pipeline_error(error: &PipelineError<ChatError>) -> String {
  match error {
    PipelineError::Inner(e) => e.to_string(),
    other => other.to_string(),
  }
}

/// Assemble the two labeled context sections under the token budget.
/// Documents are taken in their sorted order; one that does not fit is
/// omitted (logged), and assembly continues with the next section.
fn build_context(
  primary: &[PrimaryResult],
  linked: &[LinkedResult],
  options: &RagOptions,
) -> (String, Vec<Citation>, Vec<Citation>) {
  let mut available = options
    .max_context_tokens
    .saturating_sub(options.reserved_response_tokens)
    .saturating_sub(estimate_tokens(SYSTEM_PROMPT));

  let mut context = String::new();
  let mut citations_primary = Vec::new();
  let mut citations_linked = Vec::new();

  context.push_str("# Primary Documents\n\n");
  for result in primary {
    let entry = format_primary_entry(result);
    let cost = estimate_tokens(&entry);
    if cost > available {
      debug!(document_path = %result.record.relative_path, "Primary document over budget, omitting");
      continue;
    }
    available -= cost;
    context.push_str(&entry);
    citations_primary.push(primary_citation(result));
  }

  if options.include_linked && !linked.is_empty() {
    context.push_str("\n# Related Documents (via links)\n\n");
    for result in linked {
      let entry = format_linked_entry(result);
      let cost = estimate_tokens(&entry);
      if cost > available {
        debug!(document_path = %result.record.relative_path, "Linked document over budget, omitting");
        continue;
      }
      available -= cost;
      context.push_str(&entry);
      citations_linked.push(linked_citation(result));
    }
  }

  if citations_primary.is_empty() && citations_linked.is_empty() {
    warn!("No documents fit the context budget");
    context = "No relevant documents found.".to_string();
  }

  (context, citations_primary, citations_linked)
}

fn format_header(
  title: &str,
  path: &str,
  doc_type: &str,
  relevance: f32,
  promotion: PromotionLevel,
  date: Option<&str>,
) -> String {
  let mut header = format!(
    "## {}\nPath: {}\nType: {}\nRelevance: {:.2}\n",
    title, path, doc_type, relevance
  );
  if promotion != PromotionLevel::Standard {
    header.push_str(&format!("Promotion: {}\n", promotion.as_str()));
  }
  if let Some(date) = date {
    header.push_str(&format!("Date: {}\n", date));
  }
  header
}

fn frontmatter_date(record: &db::DocumentRecord) -> Option<String> {
  record
    .frontmatter
    .as_ref()
    .and_then(|fm| fm.get("date"))
    .and_then(|d| d.as_str())
    .map(String::from)
}

fn format_primary_entry(result: &PrimaryResult) -> String {
  let record = &result.record;
  let date = frontmatter_date(record);
  let mut entry = format_header(
    &record.title,
    &record.relative_path,
    &record.doc_type,
    result.similarity,
    record.promotion_level,
    date.as_deref(),
  );
  entry.push('\n');
  entry.push_str(body_of(record));
  entry.push_str("\n\n");
  entry
}

fn format_linked_entry(result: &LinkedResult) -> String {
  let record = &result.record;
  let date = frontmatter_date(record);
  let mut entry = format_header(
    &record.title,
    &record.relative_path,
    &record.doc_type,
    result.score,
    record.promotion_level,
    date.as_deref(),
  );
  entry.push_str(&format!(
    "Linked from: {}\nLink depth: {}\n\n",
    result.linked_from, result.link_depth
  ));
  entry.push_str(body_of(record));
  entry.push_str("\n\n");
  entry
}

fn body_of(record: &db::DocumentRecord) -> &str {
  &record.content
}

fn primary_citation(result: &PrimaryResult) -> Citation {
  let record = &result.record;
  Citation {
    relative_path: record.relative_path.clone(),
    title: record.title.clone(),
    doc_type: record.doc_type.clone(),
    relevance: result.similarity,
    promotion_level: (record.promotion_level != PromotionLevel::Standard)
      .then(|| record.promotion_level.as_str().to_string()),
    linked_from: None,
    link_depth: None,
  }
}

fn linked_citation(result: &LinkedResult) -> Citation {
  let record = &result.record;
  Citation {
    relative_path: record.relative_path.clone(),
    title: record.title.clone(),
    doc_type: record.doc_type.clone(),
    relevance: result.score,
    promotion_level: (record.promotion_level != PromotionLevel::Standard)
      .then(|| record.promotion_level.as_str().to_string()),
    linked_from: Some(result.linked_from.clone()),
    link_depth: Some(result.link_depth),
  }
}
