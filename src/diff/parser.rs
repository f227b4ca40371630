//! Unified diff parsing.
//!
//! Turns raw `git diff` output for a single file into addressable [`Hunk`]s.
//! Parsing is pure: no I/O, no git.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::diff::model::{DiffLine, DiffLineOp, Hunk};
use crate::error::{Error, Result};

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^@@\s-(?P<old_start>\d+)(?:,(?P<old_len>\d+))?\s+\+(?P<new_start>\d+)(?:,(?P<new_len>\d+))?\s@@")
    .expect("hunk header pattern is valid")
});

/// Lines git prints around hunks that carry no line content.
const PREAMBLE_PREFIXES: &[&str] = &[
  "diff --git",
  "index ",
  "---",
  "+++",
  "new file mode",
  "deleted file mode",
  "old mode",
  "new mode",
  "similarity index",
  "dissimilarity index",
  "rename from",
  "rename to",
  "copy from",
  "copy to",
  "Binary files"
];

fn is_preamble(line: &str) -> bool {
  PREAMBLE_PREFIXES.iter().any(|prefix| line.starts_with(prefix))
}

/// `diff --git` and `index` can never be hunk body lines, wherever they appear.
fn is_file_boundary(line: &str) -> bool {
  line.starts_with("diff --git") || line.starts_with("index ")
}

fn is_no_newline_marker(line: &str) -> bool {
  line.starts_with('\\')
}

fn display_line(line: &str) -> String {
  line.trim_end_matches(['\n', '\r']).to_string()
}

/// Makes sure we truncate at a valid UTF-8 character boundary
fn preview(text: &str, max_bytes: usize) -> String {
  if text.len() <= max_bytes {
    return text.to_string();
  }

  let end = text
    .char_indices()
    .take_while(|(i, _)| *i < max_bytes)
    .last()
    .map(|(i, c)| i + c.len_utf8())
    .unwrap_or(0);

  format!("{}... (truncated)", &text[..end])
}

struct HunkBuilder {
  old_start_index: i64,
  new_start_index: i64,
  old_len:         usize,
  new_len:         usize,
  old_cursor:      i64,
  new_cursor:      i64,
  lines:           Vec<DiffLine>
}

impl HunkBuilder {
  fn from_header(caps: &Captures<'_>, raw: &str) -> Result<Self> {
    let number = |name: &str, default: usize| -> Result<usize> {
      match caps.name(name) {
        Some(m) => m.as_str().parse().map_err(|_| Error::MalformedDiffLine(display_line(raw))),
        None => Ok(default)
      }
    };

    let start_index = |name: &str| -> Result<i64> {
      let start = i64::try_from(number(name, 0)?).map_err(|_| Error::MalformedDiffLine(display_line(raw)))?;
      Ok(start - 1)
    };

    // Unified diffs omit the length when it is 1
    let old_start_index = start_index("old_start")?;
    let new_start_index = start_index("new_start")?;
    let old_len = number("old_len", 1)?;
    let new_len = number("new_len", 1)?;

    Ok(Self {
      old_start_index,
      new_start_index,
      old_len,
      new_len,
      old_cursor: old_start_index,
      new_cursor: new_start_index,
      lines: Vec::new()
    })
  }

  fn is_complete(&self) -> bool {
    self.old_cursor - self.old_start_index >= self.old_len as i64 && self.new_cursor - self.new_start_index >= self.new_len as i64
  }

  fn push(&mut self, raw: &str) -> Result<()> {
    if raw.trim().is_empty() && !raw.starts_with(' ') {
      return Ok(());
    }

    if is_no_newline_marker(raw) {
      return Ok(());
    }

    let mut chars = raw.chars();
    let op = chars
      .next()
      .and_then(DiffLineOp::from_symbol)
      .ok_or_else(|| Error::MalformedDiffLine(display_line(raw)))?;
    let content = chars.as_str().to_string();

    let index = |cursor: i64| usize::try_from(cursor).map_err(|_| Error::MalformedDiffLine(display_line(raw)));

    let (old_index, new_index) = match op {
      DiffLineOp::Add => {
        let new = index(self.new_cursor)?;
        self.new_cursor += 1;
        (None, Some(new))
      },
      DiffLineOp::Remove => {
        let old = index(self.old_cursor)?;
        self.old_cursor += 1;
        (Some(old), None)
      },
      DiffLineOp::Context | DiffLineOp::Replace => {
        let old = index(self.old_cursor)?;
        let new = index(self.new_cursor)?;
        self.old_cursor += 1;
        self.new_cursor += 1;
        (Some(old), Some(new))
      }
    };

    self.lines.push(DiffLine { op, content, old_index, new_index });
    Ok(())
  }

  fn finish(self) -> Hunk {
    Hunk {
      old_start_index: self.old_start_index,
      new_start_index: self.new_start_index,
      old_len:         self.old_len,
      new_len:         self.new_len,
      lines:           self.lines
    }
  }
}

/// Parse unified diff text into hunks, in input order.
///
/// Handles:
/// - `git diff` file preambles (`diff --git`, `index`, `---`, `+++`, mode and rename lines)
/// - Hunk headers with omitted lengths (`@@ -3 +3 @@`)
/// - The `\ No newline at end of file` marker
/// - Several hunks, and several files' hunks, in one input
///
/// # Arguments
/// * `diff_text` - Raw unified diff text
///
/// # Returns
/// * `Result<Vec<Hunk>>` - The hunks, empty when the input has no hunk header,
///   or [`Error::MissingDiffHeader`] / [`Error::MalformedDiffLine`]
pub fn parse(diff_text: &str) -> Result<Vec<Hunk>> {
  if log::log_enabled!(log::Level::Debug) && !diff_text.is_empty() {
    log::debug!("Parsing diff with {} lines:\n{}", diff_text.lines().count(), preview(diff_text, 500));
  }

  let mut hunks = Vec::new();
  let mut current: Option<HunkBuilder> = None;

  for raw in diff_text.split_inclusive('\n') {
    if let Some(caps) = HUNK_HEADER.captures(raw) {
      if let Some(hunk) = current.take() {
        hunks.push(hunk.finish());
      }
      current = Some(HunkBuilder::from_header(&caps, raw)?);
      continue;
    }

    match current.as_mut() {
      None => {
        if is_preamble(raw) || raw.trim().is_empty() || is_no_newline_marker(raw) {
          continue;
        }

        if DiffLineOp::from_symbol(raw.chars().next().unwrap_or_default()).is_some() {
          return Err(Error::MissingDiffHeader(display_line(raw)));
        }

        log::debug!("Skipping line before first hunk: {}", display_line(raw));
      },
      Some(hunk) => {
        if is_file_boundary(raw) || (hunk.is_complete() && is_preamble(raw)) {
          continue;
        }

        hunk.push(raw)?;
      }
    }
  }

  if let Some(hunk) = current {
    hunks.push(hunk.finish());
  }

  log::debug!("Parsed {} hunks from diff", hunks.len());
  Ok(hunks)
}
