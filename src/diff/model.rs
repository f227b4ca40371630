//! Value types for parsed unified-diff hunks.

use std::fmt;

/// What a diff line does to the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffLineOp {
  Add,
  Remove,
  /// Unchanged line, present on both sides
  Context,
  /// Reserved. The parser never produces it.
  Replace
}

impl DiffLineOp {
  /// The unified-diff prefix character for this operation.
  pub fn symbol(&self) -> char {
    match self {
      DiffLineOp::Add => '+',
      DiffLineOp::Remove => '-',
      DiffLineOp::Context => ' ',
      DiffLineOp::Replace => 'R'
    }
  }

  pub fn from_symbol(symbol: char) -> Option<Self> {
    match symbol {
      '+' => Some(DiffLineOp::Add),
      '-' => Some(DiffLineOp::Remove),
      ' ' => Some(DiffLineOp::Context),
      _ => None
    }
  }
}

/// One body line of a hunk.
///
/// `content` keeps the trailing newline of the input, if it had one.
/// Indices are 0-based line positions in the old and new file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
  pub op:        DiffLineOp,
  pub content:   String,
  pub old_index: Option<usize>,
  pub new_index: Option<usize>
}

impl DiffLine {
  /// The line as it appears in a diff, without the trailing newline.
  pub fn to_diff_string(&self) -> String {
    let content = self.content.strip_suffix('\n').unwrap_or(&self.content);
    let content = content.strip_suffix('\r').unwrap_or(content);
    format!("{}{}", self.op.symbol(), content)
  }
}

impl fmt::Display for DiffLine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let old = self.old_index.map_or("x".to_string(), |i| i.to_string());
    let new = self.new_index.map_or("x".to_string(), |i| i.to_string());
    write!(f, "{}|{} {}", old, new, self.to_diff_string())
  }
}

/// A contiguous block of a unified diff.
///
/// Start indices are 0-based: a header `@@ -3,2 +5,4 @@` yields
/// `old_start_index = 2` and `new_start_index = 4`. A side with no lines
/// (`-0,0` for a created file) has a start index of -1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
  pub old_start_index: i64,
  pub new_start_index: i64,
  pub old_len:         usize,
  pub new_len:         usize,
  pub lines:           Vec<DiffLine>
}

impl Hunk {
  /// Reconstructs the hunk header with 1-based line numbers and explicit lengths.
  pub fn header(&self) -> String {
    format!(
      "@@ -{},{} +{},{} @@",
      self.old_start_index + 1,
      self.old_len,
      self.new_start_index + 1,
      self.new_len
    )
  }

  /// First new-side line number (1-based) covered by this hunk.
  pub fn new_start_line_no(&self) -> i64 {
    self.new_start_index + 1
  }

  /// True when the 1-based new-side `line_no` falls inside this hunk.
  pub fn contains_new_line(&self, line_no: usize) -> bool {
    let start = self.new_start_line_no();
    let line_no = line_no as i64;
    start <= line_no && line_no < start + self.new_len as i64
  }
}
