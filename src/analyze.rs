//! The `analyze` pipeline: collect, archive, upload, wait.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::archive::{self, Archive, BASE_DIR, HEAD_DIR};
use crate::client::{ApiClient, Comment};
use crate::error::{Error, Result};
use crate::git::Repo;
use crate::workflow::{Operation, Reporter, Workflow};

/// Fixed for the whole run.
#[derive(Debug, Clone)]
pub struct AnalysisInputs {
  /// Any directory inside the repository
  pub repo_path:         PathBuf,
  /// Paths relative to the repository root
  pub targets:           Vec<String>,
  pub workdir:           PathBuf,
  pub from_ref:          String,
  /// `None` compares against the working tree
  pub to_ref:            Option<String>,
  pub max_archive_bytes: u64
}

/// What one step hands to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutputs {
  pub repo_root: Option<PathBuf>,
  pub files:     Option<Vec<String>>,
  pub archive:   Option<Archive>,
  pub check_id:  Option<String>,
  pub comments:  Option<Vec<Comment>>
}

pub struct CollectFiles;

#[async_trait]
impl Operation<AnalysisInputs, StepOutputs> for CollectFiles {
  async fn run(&self, inputs: &AnalysisInputs, _previous: StepOutputs) -> Result<StepOutputs> {
    let repo = Repo::discover(&inputs.repo_path)?;
    repo.ensure_within_root(&inputs.targets)?;

    let files = repo.candidate_files(&inputs.targets)?;
    let base = repo.export(&files, Some(&inputs.from_ref), &inputs.workdir.join(BASE_DIR))?;
    let head = repo.export(&files, inputs.to_ref.as_deref(), &inputs.workdir.join(HEAD_DIR))?;
    log::debug!("Collected {} files ({base} base, {head} head)", files.len());

    Ok(StepOutputs {
      repo_root: Some(repo.root().to_path_buf()),
      files: Some(files),
      ..StepOutputs::default()
    })
  }
}

pub struct BuildArchive;

#[async_trait]
impl Operation<AnalysisInputs, StepOutputs> for BuildArchive {
  async fn run(&self, inputs: &AnalysisInputs, previous: StepOutputs) -> Result<StepOutputs> {
    let repo_root = previous.repo_root.ok_or(Error::MissingStepOutput("repo_root"))?;
    let archive = archive::build(&repo_root, &inputs.workdir, inputs.max_archive_bytes)?;

    Ok(StepOutputs { archive: Some(archive), ..StepOutputs::default() })
  }
}

pub struct Upload {
  pub client: Arc<ApiClient>
}

#[async_trait]
impl Operation<AnalysisInputs, StepOutputs> for Upload {
  async fn run(&self, inputs: &AnalysisInputs, previous: StepOutputs) -> Result<StepOutputs> {
    let archive = previous.archive.ok_or(Error::MissingStepOutput("archive"))?;
    let check_id = self.client.submit_check(&archive.path, &inputs.targets).await?;

    Ok(StepOutputs { check_id: Some(check_id), ..StepOutputs::default() })
  }
}

pub struct WaitForResults {
  pub client: Arc<ApiClient>
}

#[async_trait]
impl Operation<AnalysisInputs, StepOutputs> for WaitForResults {
  async fn run(&self, _inputs: &AnalysisInputs, previous: StepOutputs) -> Result<StepOutputs> {
    let check_id = previous.check_id.ok_or(Error::MissingStepOutput("check_id"))?;
    let comments = self.client.wait_for_results(&check_id).await?;

    Ok(StepOutputs { comments: Some(comments), ..StepOutputs::default() })
  }
}

pub fn workflow(client: Arc<ApiClient>, reporter: Box<dyn Reporter>) -> Workflow<AnalysisInputs, StepOutputs> {
  Workflow::new(reporter)
    .step("Looking for local changes", CollectFiles)
    .step("Tarballing files", BuildArchive)
    .step("Sending tarball to server", Upload { client: client.clone() })
    .step("Waiting for analysis results", WaitForResults { client })
}

#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
  /// Working directory; targets are relative to it
  pub repo_path:         PathBuf,
  pub targets:           Vec<String>,
  pub from_ref:          String,
  pub to_ref:            Option<String>,
  pub max_archive_bytes: u64,
  /// Parent of the working directory, the system temp directory when unset
  pub scratch_dir:       Option<PathBuf>
}

/// Runs the pipeline. `Ok(None)` means there was nothing to analyze.
///
/// The working directory lives as long as the returned future, so dropping
/// it part way through also removes the exported files and the archive.
pub async fn analyze(request: AnalyzeRequest, client: Arc<ApiClient>, reporter: Box<dyn Reporter>) -> Result<Option<Vec<Comment>>> {
  let targets = {
    let repo = Repo::discover(&request.repo_path)?;
    if request.targets.is_empty() {
      repo.changed_files(&request.from_ref, request.to_ref.as_deref())?
    } else {
      let cwd = request.repo_path.canonicalize()?;
      request.targets.iter().map(|target| repo.relative_to_root(&cwd, target)).collect()
    }
  };

  if targets.is_empty() {
    log::warn!("No target file, no bugs!");
    return Ok(None);
  }

  let workdir = match &request.scratch_dir {
    Some(parent) => TempDir::new_in(parent)?,
    None => TempDir::new()?
  };
  log::debug!("Using temporary directory: {}", workdir.path().display());

  let inputs = AnalysisInputs {
    repo_path: request.repo_path,
    targets,
    workdir: workdir.path().to_path_buf(),
    from_ref: request.from_ref,
    to_ref: request.to_ref,
    max_archive_bytes: request.max_archive_bytes
  };

  let output = workflow(client, reporter).run(&inputs).await?;
  output.comments.map(Some).ok_or(Error::MissingStepOutput("comments"))
}
