use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use anyhow::{anyhow, Context};

use crate::error::Result;
use crate::retry::RetryPolicy;

// Constants
const DEFAULT_DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
const DEFAULT_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const DEFAULT_USER_URL: &str = "https://api.github.com/user";
const DEFAULT_LOG_LEVEL: &str = "warn";
const DEFAULT_CONTEXT_WINDOW: i64 = 50;
const DEFAULT_POLL_INTERVAL_MS: i64 = 500;
const DEFAULT_RETRY_MAX_ATTEMPTS: i64 = 5;
const DEFAULT_RETRY_MIN_BACKOFF_MS: i64 = 1_000;
const DEFAULT_RETRY_MAX_BACKOFF_MS: i64 = 30_000;
const DEFAULT_MAX_ARCHIVE_BYTES: i64 = 100 * 1024 * 1024;
const DEFAULT_HTTP_TIMEOUT_SECS: i64 = 30;

/// Runtime settings, resolved once by the binary and passed to every component.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Settings {
  pub host:                 String,
  pub oauth_client_id:      String,
  pub device_code_url:      String,
  pub token_url:            String,
  pub user_url:             String,
  pub credentials_file:     PathBuf,
  pub skip_auth:            bool,
  pub log_level:            String,
  pub context_window:       usize,
  pub poll_interval_ms:     u64,
  pub retry_max_attempts:   u32,
  pub retry_min_backoff_ms: u64,
  pub retry_max_backoff_ms: u64,
  pub max_archive_bytes:    u64,
  pub http_timeout_secs:    u64
}

#[derive(Debug)]
pub struct ConfigPaths {
  pub dir:  PathBuf,
  pub file: PathBuf
}

impl ConfigPaths {
  pub fn new() -> Result<Self> {
    let dir = home::home_dir()
      .ok_or_else(|| anyhow!("Failed to determine home directory"))?
      .join(".config/rml");
    let file = dir.join("config.ini");
    Ok(Self { dir, file })
  }

  pub fn credentials_file(&self) -> PathBuf {
    self.dir.join("credentials")
  }

  pub fn ensure_exists(&self) -> Result<()> {
    if !self.dir.exists() {
      std::fs::create_dir_all(&self.dir).with_context(|| format!("Failed to create config directory at {:?}", self.dir))?;
    }
    Ok(())
  }
}

impl Settings {
  /// Loads settings from `~/.config/rml/config.ini` and `RML_*` environment variables.
  pub fn load() -> Result<Self> {
    dotenv::dotenv().ok();
    let paths = ConfigPaths::new()?;
    paths.ensure_exists()?;

    let builder = Config::builder()
      .add_source(File::new(paths.file.to_string_lossy().as_ref(), FileFormat::Ini).required(false))
      .add_source(Environment::with_prefix("RML").try_parsing(true));

    Self::from_builder(builder, &paths)
  }

  /// Settings with defaults only, ignoring files and the environment.
  pub fn defaults(paths: &ConfigPaths) -> Result<Self> {
    Self::from_builder(Config::builder(), paths)
  }

  fn from_builder(builder: config::ConfigBuilder<config::builder::DefaultState>, paths: &ConfigPaths) -> Result<Self> {
    let config = builder
      .set_default("host", "")?
      .set_default("oauth_client_id", "")?
      .set_default("device_code_url", DEFAULT_DEVICE_CODE_URL)?
      .set_default("token_url", DEFAULT_TOKEN_URL)?
      .set_default("user_url", DEFAULT_USER_URL)?
      .set_default("credentials_file", paths.credentials_file().to_string_lossy().to_string())?
      .set_default("skip_auth", false)?
      .set_default("log_level", DEFAULT_LOG_LEVEL)?
      .set_default("context_window", DEFAULT_CONTEXT_WINDOW)?
      .set_default("poll_interval_ms", DEFAULT_POLL_INTERVAL_MS)?
      .set_default("retry_max_attempts", DEFAULT_RETRY_MAX_ATTEMPTS)?
      .set_default("retry_min_backoff_ms", DEFAULT_RETRY_MIN_BACKOFF_MS)?
      .set_default("retry_max_backoff_ms", DEFAULT_RETRY_MAX_BACKOFF_MS)?
      .set_default("max_archive_bytes", DEFAULT_MAX_ARCHIVE_BYTES)?
      .set_default("http_timeout_secs", DEFAULT_HTTP_TIMEOUT_SECS)?
      .build()?;

    let settings = config.try_deserialize().context("Failed to deserialize settings. Check ~/.config/rml/config.ini and RML_* variables")?;
    Ok(settings)
  }

  /// Returns `value`, or an error naming the `RML_*` variable that should set it.
  pub fn require<'a>(&self, value: &'a str, key: &str) -> Result<&'a str> {
    if value.trim().is_empty() {
      return Err(anyhow!("Missing required setting: set RML_{} or `{}` in ~/.config/rml/config.ini", key.to_uppercase(), key).into());
    }
    Ok(value)
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_attempts: self.retry_max_attempts,
      min_backoff:  Duration::from_millis(self.retry_min_backoff_ms),
      max_backoff:  Duration::from_millis(self.retry_max_backoff_ms)
    }
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms)
  }

  pub fn http_timeout(&self) -> Duration {
    Duration::from_secs(self.http_timeout_secs)
  }
}
