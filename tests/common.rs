#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rml::auth::{DeviceCode, Prompt};
use rml::config::{ConfigPaths, Settings};
use rml::retry::Sleeper;
use tempfile::TempDir;

pub struct TestRepo {
  pub repo:      git2::Repository,
  pub repo_path: TempDir
}

impl Default for TestRepo {
  fn default() -> Self {
    let repo_path = TempDir::new().unwrap();
    let repo = git2::Repository::init(repo_path.path()).unwrap();
    Self { repo, repo_path }
  }
}

impl TestRepo {
  pub fn path(&self) -> &Path {
    self.repo_path.path()
  }

  pub fn write(&self, name: &str, content: impl AsRef<[u8]>) -> Result<PathBuf> {
    let file_path = self.path().join(name);
    if let Some(parent) = file_path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&file_path, content)?;
    Ok(file_path)
  }

  pub fn stage(&self, name: &str) -> Result<()> {
    let mut index = self.repo.index()?;
    if self.path().join(name).exists() {
      index.add_path(Path::new(name))?;
    } else {
      index.remove_path(Path::new(name))?;
    }
    index.write()?;
    Ok(())
  }

  /// Writes, stages and commits `files` in one commit.
  pub fn commit(&self, files: &[(&str, &str)], message: &str) -> Result<git2::Oid> {
    for (name, content) in files {
      self.write(name, content)?;
      self.stage(name)?;
    }

    let mut index = self.repo.index()?;
    let oid = index.write_tree()?;
    let tree = self.repo.find_tree(oid)?;
    let signature = git2::Signature::now("Your Name", "email@example.com")?;
    let parent = self.repo.head().ok().and_then(|head| head.peel_to_commit().ok());
    let parents = parent.iter().collect::<Vec<_>>();

    Ok(self.repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?)
  }
}

/// Records requested delays instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
  pub slept: Mutex<Vec<Duration>>
}

impl RecordingSleeper {
  pub fn slept(&self) -> Vec<Duration> {
    self.slept.lock().clone()
  }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
  async fn sleep(&self, duration: Duration) {
    self.slept.lock().push(duration);
  }
}

#[derive(Default)]
pub struct SilentPrompt {
  pub shown: Mutex<Vec<String>>
}

impl Prompt for SilentPrompt {
  fn show(&self, code: &DeviceCode) {
    self.shown.lock().push(code.user_code.clone());
  }
}

/// Settings pointing every endpoint at `server_uri`, with fast retries.
pub fn settings(server_uri: &str, config_dir: &Path) -> Settings {
  let paths = ConfigPaths { dir: config_dir.to_path_buf(), file: config_dir.join("config.ini") };
  let mut settings = Settings::defaults(&paths).unwrap();

  settings.host = server_uri.to_string();
  settings.oauth_client_id = "test-client".to_string();
  settings.device_code_url = format!("{server_uri}/login/device/code");
  settings.token_url = format!("{server_uri}/login/oauth/access_token");
  settings.user_url = format!("{server_uri}/user");
  settings.retry_max_attempts = 3;
  settings.retry_min_backoff_ms = 10;
  settings.retry_max_backoff_ms = 40;
  settings.poll_interval_ms = 250;
  settings
}

pub fn sleeper() -> Arc<RecordingSleeper> {
  Arc::new(RecordingSleeper::default())
}
