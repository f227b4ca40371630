//! Printing comments with the diff excerpt they point at.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use colored::Colorize;
use console::Emoji;

use crate::client::Comment;
use crate::diff::{self, Excerpt};
use crate::error::Result;

const WIDTH: usize = 80;
const BREAKING_CHANGE_PREFIX: &str = "This change breaks";
const SYMBOL_MARKER: &str = "## Symbol";
const AFFECTED_MARKER: &str = "## Affected locations";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
  Terminal,
  Markdown
}

pub struct Renderer {
  format:         Format,
  context_window: usize,
  /// Directory the comment paths are relative to
  source_root:    PathBuf
}

/// Comments grouped by file in first-seen order, each group sorted by line.
pub fn group_by_file(comments: &[Comment]) -> Vec<(&str, Vec<&Comment>)> {
  let mut groups: Vec<(&str, Vec<&Comment>)> = Vec::new();
  for comment in comments {
    match groups.iter_mut().find(|(path, _)| *path == comment.relative_path) {
      Some((_, group)) => group.push(comment),
      None => groups.push((comment.relative_path.as_str(), vec![comment]))
    }
  }

  for (_, group) in &mut groups {
    group.sort_by_key(|comment| comment.line_no);
  }
  groups
}

pub fn is_breaking_change(comment: &Comment) -> bool {
  comment.body.trim().starts_with(BREAKING_CHANGE_PREFIX) && comment.body.contains(SYMBOL_MARKER)
}

/// Fence language for a path, `text` when unknown.
pub fn language_for(path: &Path) -> &'static str {
  let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or_default();
  match extension {
    "py" => "python",
    "js" => "javascript",
    "ts" => "typescript",
    "jsx" => "jsx",
    "tsx" => "tsx",
    "html" => "html",
    "css" => "css",
    "scss" => "scss",
    "java" => "java",
    "cpp" => "cpp",
    "c" => "c",
    "rs" => "rust",
    "go" => "go",
    "rb" => "ruby",
    "php" => "php",
    "sh" => "bash",
    "yaml" | "yml" => "yaml",
    "json" => "json",
    "md" => "markdown",
    "sql" => "sql",
    "kt" => "kotlin",
    "swift" => "swift",
    "r" => "r",
    "scala" => "scala",
    "pl" => "perl",
    "lua" => "lua",
    "ex" | "exs" => "elixir",
    "hs" => "haskell",
    "fs" => "fsharp",
    "xml" => "xml",
    "cs" => "csharp",
    _ => "text"
  }
}

pub fn summary(count: usize) -> String {
  match count {
    0 => format!("{} No issues found! Your code is sparkling clean! {}", Emoji("✨", "*"), Emoji("✨", "*")),
    1 => format!("{} Found 1 issue. Time to roll up your sleeves! {}", Emoji("😱", "!"), Emoji("😱", "!")),
    n => format!("{} Found {n} issues. Time to roll up your sleeves! {}", Emoji("😱", "!"), Emoji("😱", "!"))
  }
}

fn read_line(path: &Path, line_no: usize) -> Option<String> {
  let contents = fs::read_to_string(path).ok()?;
  let line = contents.lines().nth(line_no.checked_sub(1)?)?;
  Some(line.trim_end().to_string())
}

impl Renderer {
  pub fn new(format: Format, context_window: usize, source_root: impl Into<PathBuf>) -> Self {
    Self { format, context_window, source_root: source_root.into() }
  }

  /// Body of a breaking-change comment: the commented source line, the body,
  /// and every affected location followed by its source line.
  ///
  /// `None` when the commented line cannot be read.
  pub fn enrich_breaking_change(&self, comment: &Comment) -> Option<String> {
    let line = read_line(&self.source_root.join(&comment.relative_path), comment.line_no)?;
    let content = format!("{}\n{}\n", line, comment.body);
    Some(self.enrich_affected_locations(&content))
  }

  fn enrich_affected_locations(&self, content: &str) -> String {
    let Some((before, section)) = content.split_once(AFFECTED_MARKER) else {
      return content.to_string();
    };

    let mut lines = Vec::new();
    for entry in section.trim().lines().map(str::trim).filter(|line| !line.is_empty()) {
      lines.push(entry.to_string());

      let Some((path, line_no)) = entry.split_once(':') else {
        continue;
      };
      let Ok(line_no) = line_no.trim().trim_matches('\'').parse::<usize>() else {
        continue;
      };

      let path = Path::new(path.trim());
      if let Some(source) = read_line(&self.source_root.join(path), line_no) {
        lines.push(format!("```{}\n{}\n```\n", language_for(path), source));
      }
    }

    format!("{before}{AFFECTED_MARKER}\n\n{}", lines.join("\n"))
  }

  /// The diff excerpt for a comment. `None` when no hunk owns its line.
  pub fn excerpt(&self, comment: &Comment) -> Result<Option<Excerpt>> {
    let hunks = diff::parse(&comment.diff_text)?;
    let excerpt = diff::align(&hunks, comment.line_no, self.context_window)?;

    if excerpt.is_none() {
      log::warn!("Found a comment {}:{} with no underlying diff", comment.relative_path, comment.line_no);
    }
    Ok(excerpt)
  }

  pub fn render<W: Write>(&self, comments: &[Comment], out: &mut W) -> Result<()> {
    for (path, group) in group_by_file(comments) {
      match self.format {
        Format::Terminal => writeln!(out, "{}", format!(" {path} ").bold().white().on_blue())?,
        Format::Markdown => writeln!(out, "## `{path}`\n")?
      }

      let last = group.len().saturating_sub(1);
      for (i, comment) in group.into_iter().enumerate() {
        match self.format {
          Format::Terminal => self.terminal_comment(comment, out)?,
          Format::Markdown => self.markdown_comment(comment, out)?
        }

        if i < last {
          match self.format {
            Format::Terminal => writeln!(out, "{}", "─".repeat(WIDTH).dimmed())?,
            Format::Markdown => writeln!(out, "---\n")?
          }
        }
      }
      writeln!(out)?;
    }

    writeln!(out, "{}", summary(comments.len()))?;
    Ok(())
  }

  fn terminal_comment<W: Write>(&self, comment: &Comment, out: &mut W) -> Result<()> {
    let title = format!("{}:{}", comment.relative_path, comment.line_no);

    if is_breaking_change(comment) {
      let body = self.enrich_breaking_change(comment).unwrap_or_else(|| comment.body.clone());
      comment_box(&title, &body, out)?;
    } else {
      match self.excerpt(comment)? {
        Some(excerpt) => {
          writeln!(out, "{}", excerpt.header.cyan())?;
          diff_lines(&excerpt.before, out)?;
          comment_box(&title, &comment.body, out)?;
          diff_lines(&excerpt.after, out)?;
        },
        None => comment_box(&title, &comment.body, out)?
      }
    }

    if let Some(url) = &comment.documentation_url {
      writeln!(out, "More info: {}", url.underline())?;
    }
    Ok(())
  }

  fn markdown_comment<W: Write>(&self, comment: &Comment, out: &mut W) -> Result<()> {
    writeln!(out, "### {}:{}\n", comment.relative_path, comment.line_no)?;

    if is_breaking_change(comment) {
      let body = self.enrich_breaking_change(comment).unwrap_or_else(|| comment.body.clone());
      writeln!(out, "{}\n", body.trim_end())?;
    } else {
      match self.excerpt(comment)? {
        Some(excerpt) => {
          let mut before = vec![excerpt.header.clone()];
          before.extend(excerpt.before.iter().cloned());
          writeln!(out, "```diff\n{}\n```\n", before.join("\n"))?;
          writeln!(out, "{}\n", comment.body.trim_end())?;
          if !excerpt.after.is_empty() {
            writeln!(out, "```diff\n{}\n```\n", excerpt.after.join("\n"))?;
          }
        },
        None => writeln!(out, "{}\n", comment.body.trim_end())?
      }
    }

    if let Some(url) = &comment.documentation_url {
      writeln!(out, "More info: {url}\n")?;
    }
    Ok(())
  }
}

fn diff_lines<W: Write>(lines: &[String], out: &mut W) -> Result<()> {
  for line in lines {
    match line.chars().next() {
      Some('+') => writeln!(out, "{}", line.green())?,
      Some('-') => writeln!(out, "{}", line.red())?,
      _ => writeln!(out, "{line}")?
    }
  }
  Ok(())
}

fn comment_box<W: Write>(title: &str, body: &str, out: &mut W) -> Result<()> {
  writeln!(out, "{} {}", "┌─".bold(), title.bold())?;
  for paragraph in body.trim_end().lines() {
    if paragraph.trim().is_empty() {
      writeln!(out, "{}", "│".bold())?;
      continue;
    }
    for line in textwrap::wrap(paragraph, WIDTH - 2) {
      writeln!(out, "{} {}", "│".bold(), line)?;
    }
  }
  writeln!(out, "{}", "└─".bold())?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use tempfile::TempDir;

  use super::*;

  fn comment(path: &str, line_no: usize, body: &str) -> Comment {
    Comment {
      relative_path:       path.to_string(),
      line_no,
      body:                body.to_string(),
      diff_text:           "@@ -1,2 +1,3 @@\n context\n-old\n+new1\n+new2\n".to_string(),
      documentation_url:   None,
      reference_locations: None
    }
  }

  fn render(renderer: &Renderer, comments: &[Comment]) -> String {
    colored::control::set_override(false);
    let mut out = Vec::new();
    renderer.render(comments, &mut out).unwrap();
    String::from_utf8(out).unwrap()
  }

  #[test]
  fn test_groups_in_first_seen_order_sorted_by_line() {
    let comments = vec![comment("b.rs", 9, "x"), comment("a.rs", 1, "y"), comment("b.rs", 2, "z")];
    let groups = group_by_file(&comments);

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].0, "b.rs");
    assert_eq!(groups[0].1.iter().map(|c| c.line_no).collect::<Vec<_>>(), vec![2, 9]);
    assert_eq!(groups[1].0, "a.rs");
  }

  #[test]
  fn test_markdown_places_body_between_excerpt_halves() {
    let renderer = Renderer::new(Format::Markdown, 10, "/nonexistent");
    let output = render(&renderer, &[comment("src/lib.rs", 2, "Value may be stale")]);

    let expected = "## `src/lib.rs`\n\n### src/lib.rs:2\n\n```diff\n@@ -1,2 +1,3 @@\n context\n-old\n+new1\n```\n\nValue may be stale\n\n```diff\n+new2\n```\n\n\n";
    assert!(output.starts_with(expected), "{output}");
    assert!(output.contains("Found 1 issue."));
  }

  #[test]
  fn test_comment_without_hunk_renders_alone() {
    let renderer = Renderer::new(Format::Terminal, 10, "/nonexistent");
    let output = render(&renderer, &[comment("src/lib.rs", 40, "Unused import")]);

    assert!(output.contains("┌─ src/lib.rs:40"));
    assert!(output.contains("│ Unused import"));
    assert!(!output.contains("@@"));
  }

  #[test]
  fn test_terminal_wraps_excerpt_around_comment() {
    let renderer = Renderer::new(Format::Terminal, 10, "/nonexistent");
    let output = render(&renderer, &[comment("src/lib.rs", 2, "Check this")]);

    let header = output.find("@@ -1,2 +1,3 @@").unwrap();
    let new1 = output.find("+new1").unwrap();
    let body = output.find("│ Check this").unwrap();
    let new2 = output.find("+new2").unwrap();
    assert!(header < new1 && new1 < body && body < new2);
  }

  #[test]
  fn test_malformed_diff_is_an_error() {
    let renderer = Renderer::new(Format::Terminal, 10, "/nonexistent");
    let mut bad = comment("src/lib.rs", 2, "x");
    bad.diff_text = "@@ -1,1 +1,1 @@\n?weird\n".to_string();

    let err = renderer.render(&[bad], &mut Vec::new()).unwrap_err();
    assert!(err.is_contract_violation());
  }

  #[test]
  fn test_breaking_change_is_enriched_with_sources() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/lib.rs"), "pub fn a() {}\npub fn b(x: u8) {}\n").unwrap();
    fs::write(dir.path().join("src/main.rs"), "fn main() {\n  b();\n}\n").unwrap();

    let body = "This change breaks callers.\n\n## Symbol\n`b`\n\n## Affected locations\nsrc/main.rs:2\nmissing.rs:1\n";
    let renderer = Renderer::new(Format::Markdown, 10, dir.path());
    let enriched = renderer.enrich_breaking_change(&comment("src/lib.rs", 2, body)).unwrap();

    assert!(enriched.starts_with("pub fn b(x: u8) {}\nThis change breaks callers."));
    assert!(enriched.contains("## Affected locations\n\nsrc/main.rs:2\n```rust\n  b();\n```\n\nmissing.rs:1"));
  }

  #[test]
  fn test_breaking_change_falls_back_to_plain_body() {
    let renderer = Renderer::new(Format::Markdown, 10, "/nonexistent");
    let body = "This change breaks callers.\n## Symbol\n`b`";
    let output = render(&renderer, &[comment("src/lib.rs", 2, body)]);

    assert!(output.contains(body));
    assert!(!output.contains("```diff"));
  }

  #[test]
  fn test_language_and_summary() {
    assert_eq!(language_for(Path::new("a/b.py")), "python");
    assert_eq!(language_for(Path::new("Makefile")), "text");
    assert!(summary(0).contains("No issues found"));
    assert!(summary(3).contains("Found 3 issues"));
  }
}
