//! Filename convention for newly captured documents:
//! `{sanitized-title}-{YYYYMMDD}.md`.

use chrono::NaiveDate;

const MAX_SLUG_LEN: usize = 60;

/// Sanitize a title into a filename slug: lowercase, non-alphanumeric
/// mapped to `-`, runs collapsed, ends trimmed, truncated at 60 chars
/// breaking on a `-` where possible.
pub fn sanitize_title(title: &str) -> String {
  let mut slug = String::with_capacity(title.len());
  let mut last_dash = false;

  for c in title.chars() {
    if c.is_ascii_alphanumeric() {
      slug.push(c.to_ascii_lowercase());
      last_dash = false;
    } else if !last_dash {
      slug.push('-');
      last_dash = true;
    }
  }

  let slug = slug.trim_matches('-').to_string();

  if slug.len() <= MAX_SLUG_LEN {
    return slug;
  }

  // Prefer breaking at a dash inside the limit
  let truncated = &slug[..MAX_SLUG_LEN];
  match truncated.rfind('-') {
    Some(pos) if pos > 0 => truncated[..pos].to_string(),
    _ => truncated.to_string(),
  }
}

/// Compose the on-disk filename for a captured document.
pub fn compose_filename(title: &str, date: NaiveDate) -> String {
  format!("{}-{}.md", sanitize_title(title), date.format("%Y%m%d"))
}
