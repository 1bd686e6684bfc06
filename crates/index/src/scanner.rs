//! Docs-root enumeration under the configured include/exclude globs.

use compound_core::content_hash;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
  #[error("Invalid glob pattern '{pattern}': {message}")]
  InvalidGlob { pattern: String, message: String },
  #[error("IO error: {0}")]
  Io(#[from] io::Error),
}

/// One file found under the docs root.
#[derive(Debug, Clone)]
pub struct ScannedFile {
  pub relative_path: String,
  pub absolute_path: PathBuf,
  pub content_hash: String,
}

pub struct Scanner {
  include: GlobSet,
  exclude: GlobSet,
}

impl Scanner {
  pub fn new(include_patterns: &[String], exclude_patterns: &[String]) -> Result<Self, ScanError> {
    Ok(Self {
      include: build_globset(include_patterns)?,
      exclude: build_globset(exclude_patterns)?,
    })
  }

  /// Whether a docs-root-relative path passes the configured globs.
  pub fn matches(&self, relative_path: &str) -> bool {
    self.include.is_match(relative_path) && !self.exclude.is_match(relative_path)
  }

  /// Walk the docs root, hashing every matching file. Unreadable files are
  /// skipped with a warning; a missing root yields an empty scan.
  pub fn scan(&self, docs_root: &Path) -> Vec<ScannedFile> {
    if !docs_root.exists() {
      debug!(docs_root = %docs_root.display(), "Docs root does not exist, empty scan");
      return Vec::new();
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(docs_root).follow_links(false).into_iter().filter_map(|e| e.ok()) {
      if !entry.file_type().is_file() {
        continue;
      }

      let relative = match entry.path().strip_prefix(docs_root) {
        Ok(p) => p.to_string_lossy().replace('\\', "/"),
        Err(_) => continue,
      };
      if !self.matches(&relative) {
        continue;
      }

      match read_with_retry(entry.path()) {
        Ok(bytes) => files.push(ScannedFile {
          relative_path: relative,
          absolute_path: entry.path().to_path_buf(),
          content_hash: content_hash(&bytes),
        }),
        Err(e) => {
          warn!(document_path = %relative, error = %e, "Skipping unreadable file during scan");
        }
      }
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    files
  }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, ScanError> {
  let mut builder = GlobSetBuilder::new();
  for pattern in patterns {
    let glob = Glob::new(pattern).map_err(|e| ScanError::InvalidGlob {
      pattern: pattern.clone(),
      message: e.to_string(),
    })?;
    builder.add(glob);
  }
  builder.build().map_err(|e| ScanError::InvalidGlob {
    pattern: String::new(),
    message: e.to_string(),
  })
}

/// Read a file with shared access, retrying up to three times at 50ms on
/// sharing-violation style failures.
pub fn read_with_retry(path: &Path) -> io::Result<Vec<u8>> {
  let mut last_error = None;

  for attempt in 0..3 {
    if attempt > 0 {
      std::thread::sleep(Duration::from_millis(50));
    }
    match std::fs::read(path) {
      Ok(bytes) => return Ok(bytes),
      Err(e) if is_sharing_violation(&e) => {
        debug!(attempt_number = attempt + 1, path = %path.display(), "Read contention, retrying");
        last_error = Some(e);
      }
      Err(e) => return Err(e),
    }
  }

  Err(last_error.unwrap_or_else(|| io::Error::other("read failed")))
}

fn is_sharing_violation(error: &io::Error) -> bool {
  matches!(
    error.kind(),
    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::PermissionDenied
  )
}
