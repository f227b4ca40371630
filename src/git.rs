use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use git2::{DiffOptions, ErrorCode, ObjectType, Repository, RepositoryOpenFlags as Flag, Tree};
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::profile;

pub struct Repo {
  repo: Repository,
  root: PathBuf
}

impl Repo {
  /// Opens the repository containing `path`, searching parent directories.
  pub fn discover(path: impl AsRef<Path>) -> Result<Self> {
    let repo = Repository::open_ext(path.as_ref(), Flag::empty(), Vec::<&Path>::new()).map_err(|err| {
      match err.code() {
        ErrorCode::NotFound => Error::NotAGitRepository,
        _ => Error::Git(err)
      }
    })?;

    let workdir = repo.workdir().ok_or(Error::NotAGitRepository)?;
    let root = workdir
      .canonicalize()
      .with_context(|| format!("Could not determine the git root directory from {}", workdir.display()))?;

    debug!("Repository root: {}", root.display());
    Ok(Self { repo, root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Rewrites a path given relative to `cwd` as a path relative to the root.
  /// Paths that do not end up inside the root are returned unchanged.
  pub fn relative_to_root(&self, cwd: &Path, target: &str) -> String {
    let mut absolute = normalize(&cwd.join(target));
    if let Ok(canonical) = absolute.canonicalize() {
      absolute = canonical;
    }

    match absolute.strip_prefix(&self.root) {
      Ok(relative) => relative.to_string_lossy().into_owned(),
      Err(_) => target.to_string()
    }
  }

  /// Fails with [`Error::PathOutsideRepository`] for the first target that
  /// resolves outside the work tree.
  pub fn ensure_within_root(&self, targets: &[String]) -> Result<()> {
    for target in targets {
      let mut resolved = normalize(&self.root.join(target));
      if let Ok(canonical) = resolved.canonicalize() {
        resolved = canonical;
      }

      if !resolved.starts_with(&self.root) {
        return Err(Error::PathOutsideRepository(target.clone()));
      }
    }
    Ok(())
  }

  /// Files worth shipping to the backend: everything tracked that still
  /// exists, plus any untracked `targets`. Directories such as submodules
  /// are dropped.
  pub fn candidate_files(&self, targets: &[String]) -> Result<Vec<String>> {
    let index = self.repo.index()?;
    let mut files: BTreeSet<String> = index
      .iter()
      .map(|entry| String::from_utf8_lossy(&entry.path).into_owned())
      .collect();

    for target in targets {
      if files.insert(target.clone()) {
        debug!("Including untracked target {target}");
      }
    }

    files.retain(|file| self.root.join(file).is_file());
    Ok(files.into_iter().collect())
  }

  /// Paths changed between `from` and `to`. With `to` set to `None` the
  /// working tree is compared, untracked files included.
  pub fn changed_files(&self, from: &str, to: Option<&str>) -> Result<Vec<String>> {
    let from_tree = self.tree(from)?;
    let mut opts = DiffOptions::new();
    opts
      .include_untracked(true)
      .recurse_untracked_dirs(true)
      .include_ignored(false)
      .ignore_submodules(true);

    let diff = match to {
      Some(to) => {
        let to_tree = self.tree(to)?;
        self.repo.diff_tree_to_tree(Some(&from_tree), Some(&to_tree), Some(&mut opts))?
      },
      None => self.repo.diff_tree_to_workdir_with_index(Some(&from_tree), Some(&mut opts))?
    };

    let files: BTreeSet<String> = diff
      .deltas()
      .filter_map(|delta| delta.new_file().path().or_else(|| delta.old_file().path()).map(Path::to_path_buf))
      .map(|path| path.to_string_lossy().into_owned())
      .filter(|path| !path.trim().is_empty())
      .collect();

    debug!("Changed files between {from} and {}: {files:?}", to.unwrap_or("working tree"));
    Ok(files.into_iter().collect())
  }

  /// Writes each file as of `reference` (or the working tree) below `dest`.
  ///
  /// Files missing at that revision and files that are not UTF-8 text are
  /// skipped. Returns the number of files written.
  pub fn export(&self, files: &[String], reference: Option<&str>, dest: &Path) -> Result<usize> {
    profile!("Export files");
    fs::create_dir_all(dest).with_context(|| format!("Failed to create {}", dest.display()))?;

    let tree = reference.map(|reference| self.tree(reference)).transpose()?;
    let mut written = 0;

    for file in files {
      let content = match &tree {
        Some(tree) => self.read_at(tree, file)?,
        None => self.read_workdir(file)?
      };

      let Some(content) = content else {
        debug!("File {file} not found in {}", reference.unwrap_or("working tree"));
        continue;
      };

      let Ok(text) = String::from_utf8(content) else {
        debug!("File {file} is not a text file");
        continue;
      };

      let target = dest.join(file);
      if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
      }
      fs::write(&target, text).with_context(|| format!("Failed to write {}", target.display()))?;
      written += 1;
    }

    debug!("Exported {written}/{} files to {}", files.len(), dest.display());
    Ok(written)
  }

  fn tree(&self, reference: &str) -> Result<Tree<'_>> {
    let object = self.repo.revparse_single(reference)?;
    Ok(object.peel_to_tree()?)
  }

  fn read_at(&self, tree: &Tree<'_>, file: &str) -> Result<Option<Vec<u8>>> {
    let entry = match tree.get_path(Path::new(file)) {
      Ok(entry) => entry,
      Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
      Err(err) => return Err(err.into())
    };

    if entry.kind() != Some(ObjectType::Blob) {
      return Ok(None);
    }

    let blob = entry.to_object(&self.repo)?.peel_to_blob()?;
    Ok(Some(blob.content().to_vec()))
  }

  fn read_workdir(&self, file: &str) -> Result<Option<Vec<u8>>> {
    match fs::read(self.root.join(file)) {
      Ok(content) => Ok(Some(content)),
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(err) => {
        warn!("Could not read {file}: {err}");
        Err(err.into())
      }
    }
  }
}

/// Resolves `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
  let mut normalized = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {},
      Component::ParentDir => {
        normalized.pop();
      },
      other => normalized.push(other.as_os_str())
    }
  }
  normalized
}
