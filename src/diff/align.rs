//! Locating a comment inside the diff it refers to.

use crate::diff::model::{DiffLineOp, Hunk};
use crate::error::{Error, Result};

/// The diff context around one commented line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Excerpt {
  /// `@@ -a,b +c,d @@` of the owning hunk
  pub header: String,
  /// Hunk lines up to and including the commented line, at most `context_window` of them
  pub before: Vec<String>,
  /// Hunk lines after the commented line, at most `context_window` of them
  pub after:  Vec<String>
}

/// Finds the hunk owning the 1-based new-side `line_no` and splits its lines
/// around it.
///
/// Returns `Ok(None)` when no hunk covers the line, which callers treat as
/// "render without a diff excerpt". Two hunks covering the same line means the
/// diff is inconsistent and fails with [`Error::AmbiguousDiffHunk`].
pub fn align(hunks: &[Hunk], line_no: usize, context_window: usize) -> Result<Option<Excerpt>> {
  let mut owners = hunks.iter().filter(|hunk| hunk.contains_new_line(line_no));

  let hunk = match (owners.next(), owners.next()) {
    (None, _) => return Ok(None),
    (Some(hunk), None) => hunk,
    (Some(_), Some(_)) => {
      let count = hunks.iter().filter(|hunk| hunk.contains_new_line(line_no)).count();
      return Err(Error::AmbiguousDiffHunk { line_no, count });
    }
  };

  let target = line_no as i64;
  let mut cursor = hunk.new_start_line_no();
  let mut before = Vec::new();
  let mut after = Vec::new();

  for line in &hunk.lines {
    if cursor <= target {
      before.push(line.to_diff_string());
    } else {
      after.push(line.to_diff_string());
    }

    if matches!(line.op, DiffLineOp::Add | DiffLineOp::Context) {
      cursor += 1;
    }
  }

  let skip = before.len().saturating_sub(context_window);
  before.drain(..skip);
  after.truncate(context_window);

  Ok(Some(Excerpt { header: hunk.header(), before, after }))
}
