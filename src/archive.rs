//! Packs the exported `base/` and `head/` trees into a gzipped tarball.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Local};
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Error, Result};
use crate::profile;

pub const BASE_DIR: &str = "base";
pub const HEAD_DIR: &str = "head";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
  pub path: PathBuf,
  pub size: u64
}

impl Archive {
  pub fn file_name(&self) -> String {
    self
      .path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_default()
  }
}

/// `<repo-dir>_<YYYYmmdd_HHMMSS>.tar.gz`
pub fn archive_name(repo_root: &Path, now: DateTime<Local>) -> String {
  let repo = repo_root
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_else(|| "repo".to_string());
  format!("{}_{}.tar.gz", repo, now.format("%Y%m%d_%H%M%S"))
}

/// Builds the archive inside `workdir` from `<workdir>/base` and `<workdir>/head`.
pub fn build(repo_root: &Path, workdir: &Path, limit: u64) -> Result<Archive> {
  profile!("Build archive");

  let path = workdir.join(archive_name(repo_root, Local::now()));
  let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;

  let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
  for dir in [BASE_DIR, HEAD_DIR] {
    let source = workdir.join(dir);
    if !source.is_dir() {
      fs::create_dir_all(&source)?;
    }
    builder
      .append_dir_all(dir, &source)
      .with_context(|| format!("Failed to add {} to archive", source.display()))?;
  }
  builder.into_inner()?.finish()?;

  let size = fs::metadata(&path)?.len();
  log::debug!("Built {} ({size} bytes)", path.display());

  if size > limit {
    return Err(Error::PayloadTooLarge { size, limit });
  }

  Ok(Archive { path, size })
}
