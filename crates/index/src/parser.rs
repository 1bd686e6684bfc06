//! Markdown parsing for compound documents: frontmatter split, link
//! extraction with positions, and per-line header paths for the chunker.
//!
//! The parser is pure. It never touches the filesystem and holds no state,
//! so it is safe to call from any task.

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
  #[error("File is not valid UTF-8")]
  InvalidEncoding,
  #[error("Frontmatter is not valid YAML: {0}")]
  Frontmatter(String),
}

/// Classified link target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkTarget {
  InternalDocument,
  InternalAnchor,
  InternalDocumentWithAnchor,
  ExternalHttp,
  ExternalEmail,
  ExternalTel,
  ExternalOther,
  DataUrl,
  Invalid,
}

/// A link found in a document body.
#[derive(Debug, Clone)]
pub struct ExtractedLink {
  pub raw_url: String,
  pub text: String,
  pub title: Option<String>,
  /// 0-based position of the link in the body.
  pub line: usize,
  pub column: usize,
  pub is_reference_style: bool,
  pub reference_label: Option<String>,
  /// Path component for internal targets.
  pub path: Option<String>,
  /// Fragment component, `#` stripped.
  pub anchor: Option<String>,
  pub target: LinkTarget,
  /// Header path of the section containing the link.
  pub header_path: String,
}

/// Parse result for one markdown file.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
  /// Raw frontmatter map converted to JSON, None when the file has none.
  pub frontmatter: Option<Value>,
  /// Content after the frontmatter block.
  pub body: String,
  pub body_line_count: usize,
  pub links: Vec<ExtractedLink>,
  /// Inherited H2/H3 header path for every body line.
  pub header_paths: Vec<String>,
  /// First markdown heading in the body, any level.
  pub first_heading: Option<String>,
}

fn inline_link_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r#"\[([^\]]*)\]\(\s*([^)\s]+)(?:\s+"([^"]*)")?\s*\)"#).expect("inline link regex"))
}

fn reference_def_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r#"^\s*\[([^\]]+)\]:\s*(\S+)(?:\s+"([^"]*)")?\s*$"#).expect("reference def regex"))
}

fn reference_use_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"\[([^\]]+)\]\[([^\]]*)\]").expect("reference use regex"))
}

fn autolink_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"<(https?://[^>\s]+)>").expect("autolink regex"))
}

fn bare_url_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r#"https?://[^\s<>\[\]()"']+"#).expect("bare url regex"))
}

fn scheme_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*:").expect("scheme regex"))
}

/// Split a URL into path/anchor and classify the target.
pub fn classify_link(url: &str) -> (Option<String>, Option<String>, LinkTarget) {
  let trimmed = url.trim();

  if trimmed.is_empty() {
    return (None, None, LinkTarget::Invalid);
  }

  let lower = trimmed.to_lowercase();

  if lower.starts_with("javascript:") {
    return (None, None, LinkTarget::Invalid);
  }
  if lower.starts_with("data:") {
    return (None, None, LinkTarget::DataUrl);
  }
  if lower.starts_with("mailto:") {
    return (None, None, LinkTarget::ExternalEmail);
  }
  if lower.starts_with("tel:") {
    return (None, None, LinkTarget::ExternalTel);
  }
  if lower.starts_with("http://") || lower.starts_with("https://") || trimmed.starts_with("//") {
    return (None, None, LinkTarget::ExternalHttp);
  }
  if let Some(anchor) = trimmed.strip_prefix('#') {
    return (None, Some(anchor.to_string()), LinkTarget::InternalAnchor);
  }
  if scheme_re().is_match(trimmed) {
    return (None, None, LinkTarget::ExternalOther);
  }

  // Internal target: split off the fragment
  match trimmed.split_once('#') {
    Some((path, anchor)) if !anchor.is_empty() => (
      Some(path.to_string()),
      Some(anchor.to_string()),
      LinkTarget::InternalDocumentWithAnchor,
    ),
    Some((path, _)) => (Some(path.to_string()), None, LinkTarget::InternalDocument),
    None => (Some(trimmed.to_string()), None, LinkTarget::InternalDocument),
  }
}

/// Resolve an internal link path against the directory of its source file.
/// Returns a normalized docs-root-relative path, or None when the target
/// escapes the root.
pub fn resolve_internal(source_relative: &str, target: &str) -> Option<String> {
  let base_dir = match source_relative.rsplit_once('/') {
    Some((dir, _)) => dir,
    None => "",
  };

  // A leading slash addresses the docs root directly
  let (start_dir, target) = match target.strip_prefix('/') {
    Some(rest) => ("", rest),
    None => (base_dir, target),
  };

  let mut segments: Vec<&str> = start_dir.split('/').filter(|s| !s.is_empty()).collect();
  for part in target.split('/') {
    match part {
      "" | "." => {}
      ".." => {
        if segments.pop().is_none() {
          return None;
        }
      }
      other => segments.push(other),
    }
  }

  if segments.is_empty() {
    return None;
  }
  Some(segments.join("/"))
}

struct HeaderStack {
  h2: Option<String>,
  h3: Option<String>,
}

impl HeaderStack {
  fn new() -> Self {
    Self { h2: None, h3: None }
  }

  fn observe(&mut self, line: &str) -> bool {
    let trimmed = line.trim_start();
    if let Some(text) = trimmed.strip_prefix("### ") {
      self.h3 = Some(text.trim().to_string());
      true
    } else if let Some(text) = trimmed.strip_prefix("## ") {
      self.h2 = Some(text.trim().to_string());
      self.h3 = None;
      true
    } else {
      false
    }
  }

  fn path(&self) -> String {
    match (&self.h2, &self.h3) {
      (Some(h2), Some(h3)) => format!("## {} > ### {}", h2, h3),
      (Some(h2), None) => format!("## {}", h2),
      (None, Some(h3)) => format!("### {}", h3),
      (None, None) => String::new(),
    }
  }
}

fn is_fence(line: &str) -> bool {
  let trimmed = line.trim_start();
  trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

/// Parse raw file bytes into frontmatter, body, links, and header paths.
pub fn parse_markdown(bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
  let text = std::str::from_utf8(bytes).map_err(|_| ParseError::InvalidEncoding)?;
  let (frontmatter, body) = split_frontmatter(text)?;

  let lines: Vec<&str> = body.lines().collect();

  // First pass: reference definitions (outside code fences)
  let mut definitions: HashMap<String, (String, Option<String>)> = HashMap::new();
  let mut in_fence = false;
  for line in &lines {
    if is_fence(line) {
      in_fence = !in_fence;
      continue;
    }
    if in_fence {
      continue;
    }
    if let Some(caps) = reference_def_re().captures(line) {
      definitions.insert(
        caps[1].to_lowercase(),
        (caps[2].to_string(), caps.get(3).map(|m| m.as_str().to_string())),
      );
    }
  }

  // Second pass: header paths and link extraction
  let mut header_paths = Vec::with_capacity(lines.len());
  let mut links = Vec::new();
  let mut first_heading = None;
  let mut stack = HeaderStack::new();
  in_fence = false;

  for (line_no, line) in lines.iter().enumerate() {
    if is_fence(line) {
      in_fence = !in_fence;
      header_paths.push(stack.path());
      continue;
    }
    if in_fence {
      header_paths.push(stack.path());
      continue;
    }

    stack.observe(line);
    header_paths.push(stack.path());

    if first_heading.is_none() {
      let trimmed = line.trim_start();
      if trimmed.starts_with('#') {
        first_heading = Some(trimmed.trim_start_matches('#').trim().to_string());
      }
    }

    // Reference definition lines declare targets but are not links themselves
    if reference_def_re().is_match(line) {
      continue;
    }

    extract_line_links(line, line_no, &stack.path(), &definitions, &mut links);
  }

  Ok(ParsedDocument {
    frontmatter,
    body: body.to_string(),
    body_line_count: lines.len(),
    links,
    header_paths,
    first_heading,
  })
}

fn split_frontmatter(text: &str) -> Result<(Option<Value>, &str), ParseError> {
  let mut lines = text.split_inclusive('\n');
  let first = lines.next().unwrap_or("");
  if first.trim_end() != "---" {
    return Ok((None, text));
  }

  let mut offset = first.len();
  for line in lines {
    if line.trim_end() == "---" {
      let yaml_text = &text[first.len()..offset];
      let body = &text[offset + line.len()..];

      let yaml: serde_yaml::Value =
        serde_yaml::from_str(yaml_text).map_err(|e| ParseError::Frontmatter(e.to_string()))?;
      let json = serde_json::to_value(&yaml).map_err(|e| ParseError::Frontmatter(e.to_string()))?;
      return Ok((Some(json), body));
    }
    offset += line.len();
  }

  // Unterminated frontmatter fence
  Err(ParseError::Frontmatter("missing closing --- delimiter".to_string()))
}

fn push_link(
  links: &mut Vec<ExtractedLink>,
  raw_url: &str,
  text: &str,
  title: Option<String>,
  line: usize,
  column: usize,
  is_reference_style: bool,
  reference_label: Option<String>,
  header_path: &str,
) {
  let (path, anchor, target) = classify_link(raw_url);
  links.push(ExtractedLink {
    raw_url: raw_url.to_string(),
    text: text.to_string(),
    title,
    line,
    column,
    is_reference_style,
    reference_label,
    path,
    anchor,
    target,
    header_path: header_path.to_string(),
  });
}

fn extract_line_links(
  line: &str,
  line_no: usize,
  header_path: &str,
  definitions: &HashMap<String, (String, Option<String>)>,
  links: &mut Vec<ExtractedLink>,
) {
  // Byte spans already claimed by an earlier, more specific syntax
  let mut spans: Vec<(usize, usize)> = Vec::new();
  let overlaps = |spans: &[(usize, usize)], start: usize, end: usize| {
    spans.iter().any(|&(s, e)| start < e && end > s)
  };
  let col_of = |start: usize| line[..start].chars().count();

  // Reference-style uses: [text][label] and the collapsed [text][]
  for caps in reference_use_re().captures_iter(line) {
    let m = caps.get(0).expect("whole match");
    if line[..m.start()].ends_with('!') {
      spans.push((m.start(), m.end()));
      continue; // image
    }
    let text = &caps[1];
    let explicit = &caps[2];
    let label = if explicit.is_empty() { text } else { explicit };

    if let Some((url, title)) = definitions.get(&label.to_lowercase()) {
      push_link(
        links,
        url,
        text,
        title.clone(),
        line_no,
        col_of(m.start()),
        true,
        Some(label.to_string()),
        header_path,
      );
    }
    spans.push((m.start(), m.end()));
  }

  // Inline links: [text](url) and [text](url "title")
  for caps in inline_link_re().captures_iter(line) {
    let m = caps.get(0).expect("whole match");
    if overlaps(&spans, m.start(), m.end()) {
      continue;
    }
    spans.push((m.start(), m.end()));
    if line[..m.start()].ends_with('!') {
      continue; // image
    }
    push_link(
      links,
      &caps[2],
      &caps[1],
      caps.get(3).map(|t| t.as_str().to_string()),
      line_no,
      col_of(m.start()),
      false,
      None,
      header_path,
    );
  }

  // Autolinks: <http://...>
  for caps in autolink_re().captures_iter(line) {
    let m = caps.get(0).expect("whole match");
    if overlaps(&spans, m.start(), m.end()) {
      continue;
    }
    spans.push((m.start(), m.end()));
    push_link(
      links,
      &caps[1],
      &caps[1],
      None,
      line_no,
      col_of(m.start()),
      false,
      None,
      header_path,
    );
  }

  // Bare URLs anywhere outside the claimed spans
  for m in bare_url_re().find_iter(line) {
    if overlaps(&spans, m.start(), m.end()) {
      continue;
    }
    push_link(
      links,
      m.as_str(),
      m.as_str(),
      None,
      line_no,
      col_of(m.start()),
      false,
      None,
      header_path,
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_frontmatter_split() {
    let doc = "---\ntitle: Hello\ntype: problem\n---\nBody here\n";
    let parsed = parse_markdown(doc.as_bytes()).unwrap();
    let fm = parsed.frontmatter.unwrap();
    assert_eq!(fm["title"], "Hello");
    assert_eq!(parsed.body, "Body here\n");
  }

  #[test]
  fn test_no_frontmatter() {
    let parsed = parse_markdown(b"Just a body\n").unwrap();
    assert!(parsed.frontmatter.is_none());
    assert_eq!(parsed.body, "Just a body\n");
  }

  #[test]
  fn test_unterminated_frontmatter_fails() {
    let doc = "---\ntitle: Hello\nno closing fence\n";
    assert!(matches!(parse_markdown(doc.as_bytes()), Err(ParseError::Frontmatter(_))));
  }

  #[test]
  fn test_invalid_yaml_fails() {
    let doc = "---\ntitle: [unclosed\n---\nbody\n";
    assert!(matches!(parse_markdown(doc.as_bytes()), Err(ParseError::Frontmatter(_))));
  }

  #[test]
  fn test_invalid_utf8_fails() {
    let bytes = vec![0xff, 0xfe, 0x00];
    assert!(matches!(parse_markdown(&bytes), Err(ParseError::InvalidEncoding)));
  }

  #[test]
  fn test_inline_link() {
    let parsed = parse_markdown(b"See [alpha](./alpha.md) for details\n").unwrap();
    assert_eq!(parsed.links.len(), 1);
    let link = &parsed.links[0];
    assert_eq!(link.text, "alpha");
    assert_eq!(link.raw_url, "./alpha.md");
    assert_eq!(link.target, LinkTarget::InternalDocument);
    assert_eq!(link.line, 0);
    assert_eq!(link.column, 4);
    assert!(!link.is_reference_style);
  }

  #[test]
  fn test_inline_link_with_title() {
    let parsed = parse_markdown(b"[alpha](./alpha.md \"Alpha doc\")\n").unwrap();
    assert_eq!(parsed.links[0].title.as_deref(), Some("Alpha doc"));
  }

  #[test]
  fn test_image_filtered() {
    let parsed = parse_markdown(b"![diagram](./diagram.png)\n").unwrap();
    assert!(parsed.links.is_empty());
  }

  #[test]
  fn test_reference_style_with_label() {
    let doc = "See [the alpha doc][alpha].\n\n[alpha]: ./alpha.md \"Alpha\"\n";
    let parsed = parse_markdown(doc.as_bytes()).unwrap();
    assert_eq!(parsed.links.len(), 1);
    let link = &parsed.links[0];
    assert!(link.is_reference_style);
    assert_eq!(link.reference_label.as_deref(), Some("alpha"));
    assert_eq!(link.raw_url, "./alpha.md");
    assert_eq!(link.title.as_deref(), Some("Alpha"));
  }

  #[test]
  fn test_reference_style_collapsed() {
    let doc = "See [alpha][].\n\n[alpha]: ./alpha.md\n";
    let parsed = parse_markdown(doc.as_bytes()).unwrap();
    assert_eq!(parsed.links.len(), 1);
    assert_eq!(parsed.links[0].reference_label.as_deref(), Some("alpha"));
  }

  #[test]
  fn test_autolink() {
    let parsed = parse_markdown(b"Visit <https://example.com/docs> today\n").unwrap();
    assert_eq!(parsed.links.len(), 1);
    assert_eq!(parsed.links[0].target, LinkTarget::ExternalHttp);
  }

  #[test]
  fn test_bare_url() {
    let parsed = parse_markdown(b"Docs at https://example.com/page here\n").unwrap();
    assert_eq!(parsed.links.len(), 1);
    assert_eq!(parsed.links[0].raw_url, "https://example.com/page");
  }

  #[test]
  fn test_bare_url_not_double_counted_inside_inline() {
    let parsed = parse_markdown(b"[site](https://example.com)\n").unwrap();
    assert_eq!(parsed.links.len(), 1);
  }

  #[test]
  fn test_links_in_code_fence_ignored() {
    let doc = "```\n[not a link](./x.md)\n```\n[real](./y.md)\n";
    let parsed = parse_markdown(doc.as_bytes()).unwrap();
    assert_eq!(parsed.links.len(), 1);
    assert_eq!(parsed.links[0].raw_url, "./y.md");
  }

  #[test]
  fn test_classification() {
    assert_eq!(classify_link("javascript:alert(1)").2, LinkTarget::Invalid);
    assert_eq!(classify_link("data:text/plain;base64,AAA").2, LinkTarget::DataUrl);
    assert_eq!(classify_link("//cdn.example.com/x").2, LinkTarget::ExternalHttp);
    assert_eq!(classify_link("#section").2, LinkTarget::InternalAnchor);
    assert_eq!(classify_link("mailto:a@b.c").2, LinkTarget::ExternalEmail);
    assert_eq!(classify_link("tel:+15551234").2, LinkTarget::ExternalTel);
    assert_eq!(classify_link("ftp://files.example.com").2, LinkTarget::ExternalOther);
    assert_eq!(classify_link("./doc.md").2, LinkTarget::InternalDocument);
    assert_eq!(classify_link("doc.md#part").2, LinkTarget::InternalDocumentWithAnchor);
    assert_eq!(classify_link("").2, LinkTarget::Invalid);
  }

  #[test]
  fn test_classification_splits_path_and_anchor() {
    let (path, anchor, target) = classify_link("guides/setup.md#postgres");
    assert_eq!(path.as_deref(), Some("guides/setup.md"));
    assert_eq!(anchor.as_deref(), Some("postgres"));
    assert_eq!(target, LinkTarget::InternalDocumentWithAnchor);
  }

  #[test]
  fn test_header_paths() {
    let doc = "intro\n## Setup\ntext\n### Postgres\nmore\n## Usage\nend\n";
    let parsed = parse_markdown(doc.as_bytes()).unwrap();
    assert_eq!(parsed.header_paths[0], "");
    assert_eq!(parsed.header_paths[1], "## Setup");
    assert_eq!(parsed.header_paths[2], "## Setup");
    assert_eq!(parsed.header_paths[3], "## Setup > ### Postgres");
    assert_eq!(parsed.header_paths[4], "## Setup > ### Postgres");
    assert_eq!(parsed.header_paths[5], "## Usage");
    assert_eq!(parsed.header_paths[6], "## Usage");
  }

  #[test]
  fn test_link_carries_header_path() {
    let doc = "## Section\n[x](./x.md)\n";
    let parsed = parse_markdown(doc.as_bytes()).unwrap();
    assert_eq!(parsed.links[0].header_path, "## Section");
  }

  #[test]
  fn test_resolve_internal() {
    assert_eq!(resolve_internal("problems/beta.md", "./alpha.md").as_deref(), Some("problems/alpha.md"));
    assert_eq!(resolve_internal("problems/beta.md", "../insights/x.md").as_deref(), Some("insights/x.md"));
    assert_eq!(resolve_internal("top.md", "other.md").as_deref(), Some("other.md"));
    assert_eq!(resolve_internal("a/b.md", "/c.md").as_deref(), Some("c.md"));
    assert_eq!(resolve_internal("top.md", "../escape.md"), None);
  }

  #[test]
  fn test_first_heading() {
    let parsed = parse_markdown(b"# Title Here\n\nbody\n").unwrap();
    assert_eq!(parsed.first_heading.as_deref(), Some("Title Here"));
  }
}
