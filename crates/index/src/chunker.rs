//! H2/H3 chunking for large documents.
//!
//! Documents at or under the line threshold produce no chunks and are
//! embedded whole. Larger documents split at every H2 and H3 heading
//! outside fenced code blocks; each chunk records the header stack at its
//! start. Tenancy and promotion inheritance happens when the records are
//! assembled, from the parent document only.

use crate::parser::ParsedDocument;
use compound_core::CHUNK_LINE_THRESHOLD;

/// One section of a chunked document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
  pub index: usize,
  pub header_path: String,
  pub content: String,
}

pub struct Chunker {
  line_threshold: usize,
}

impl Default for Chunker {
  fn default() -> Self {
    Self {
      line_threshold: CHUNK_LINE_THRESHOLD,
    }
  }
}

impl Chunker {
  pub fn with_threshold(line_threshold: usize) -> Self {
    Self { line_threshold }
  }

  /// Split a parsed document into ordered chunks. Empty when the body is
  /// within the threshold.
  pub fn chunk(&self, parsed: &ParsedDocument) -> Vec<ChunkPiece> {
    if parsed.body_line_count <= self.line_threshold {
      return Vec::new();
    }

    let lines: Vec<&str> = parsed.body.lines().collect();
    let boundaries = find_boundaries(&lines);

    let mut pieces = Vec::new();
    let mut index = 0;
    let mut start = 0;

    let mut emit = |start: usize, end: usize, index: &mut usize, pieces: &mut Vec<ChunkPiece>| {
      let content = lines[start..end].join("\n");
      if content.trim().is_empty() {
        return;
      }
      let header_path = parsed.header_paths.get(start).cloned().unwrap_or_default();
      pieces.push(ChunkPiece {
        index: *index,
        header_path,
        content,
      });
      *index += 1;
    };

    for boundary in boundaries {
      if boundary > start {
        emit(start, boundary, &mut index, &mut pieces);
      }
      start = boundary;
    }
    if start < lines.len() {
      emit(start, lines.len(), &mut index, &mut pieces);
    }

    pieces
  }
}

/// Line numbers of every H2/H3 heading outside fenced code blocks.
fn find_boundaries(lines: &[&str]) -> Vec<usize> {
  let mut boundaries = Vec::new();
  let mut in_fence = false;

  for (i, line) in lines.iter().enumerate() {
    let trimmed = line.trim_start();
    if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
      in_fence = !in_fence;
      continue;
    }
    if in_fence {
      continue;
    }
    if trimmed.starts_with("## ") || trimmed.starts_with("### ") {
      boundaries.push(i);
    }
  }

  boundaries
}
