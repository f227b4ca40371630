//! Diff processing and parsing utilities.
//!
//! This module parses unified diffs into structured hunks and
//! locates server comments inside them.

pub mod align;
pub mod model;
pub mod parser;

pub use align::{align, Excerpt};
pub use model::{DiffLine, DiffLineOp, Hunk};
pub use parser::parse;
