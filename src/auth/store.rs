//! The on-disk credential file.
//!
//! Stored as `KEY=value` lines so it can be read with the same parser as a
//! `.env` file. Keys other than the ones this crate writes are preserved.
//!
//! Every change reads the whole file, merges and rewrites it, without a lock.
//! Two invocations updating the file at the same time can lose one of the
//! updates: the last writer wins.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::error::Result;

pub const ACCESS_TOKEN_KEY: &str = "RML_ACCESS_TOKEN";
pub const USER_ID_KEY: &str = "RML_USER_ID";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
  pub access_token: String,
  pub user_id:      String
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
  path: PathBuf
}

impl CredentialStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// All stored key/value pairs. A missing file reads as empty.
  pub fn load(&self) -> Result<BTreeMap<String, String>> {
    if !self.path.exists() {
      return Ok(BTreeMap::new());
    }

    let entries = dotenv::from_path_iter(&self.path)
      .with_context(|| format!("Failed to open credentials at {}", self.path.display()))?;

    let mut values = BTreeMap::new();
    for entry in entries {
      let (key, value) = entry.with_context(|| format!("Failed to parse credentials at {}", self.path.display()))?;
      values.insert(key, value);
    }
    Ok(values)
  }

  pub fn get(&self, key: &str) -> Result<Option<String>> {
    Ok(self.load()?.remove(key).filter(|value| !value.is_empty()))
  }

  /// The stored credential, or `None` unless both the token and the user id are present.
  pub fn credentials(&self) -> Result<Option<Credentials>> {
    let mut values = self.load()?;
    let access_token = values.remove(ACCESS_TOKEN_KEY).filter(|v| !v.is_empty());
    let user_id = values.remove(USER_ID_KEY).filter(|v| !v.is_empty());

    Ok(access_token.zip(user_id).map(|(access_token, user_id)| Credentials { access_token, user_id }))
  }

  pub fn is_authenticated(&self) -> Result<bool> {
    Ok(self.credentials()?.is_some())
  }

  /// Merges `updates` into the file, creating it when needed.
  pub fn update<K, V>(&self, updates: impl IntoIterator<Item = (K, V)>) -> Result<()>
  where
    K: Into<String>,
    V: Into<String>
  {
    let mut values = self.load()?;
    for (key, value) in updates {
      values.insert(key.into(), value.into());
    }
    self.write(&values)
  }

  pub fn save(&self, credentials: &Credentials) -> Result<()> {
    self.update([
      (ACCESS_TOKEN_KEY, credentials.access_token.as_str()),
      (USER_ID_KEY, credentials.user_id.as_str())
    ])
  }

  /// Removes `keys`. Returns whether anything was removed.
  pub fn remove(&self, keys: &[&str]) -> Result<bool> {
    let mut values = self.load()?;
    let before = values.len();
    values.retain(|key, _| !keys.contains(&key.as_str()));

    if values.len() == before {
      return Ok(false);
    }
    self.write(&values)?;
    Ok(true)
  }

  fn write(&self, values: &BTreeMap<String, String>) -> Result<()> {
    if let Some(parent) = self.path.parent() {
      fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let contents: String = values.iter().map(|(key, value)| format!("{key}={value}\n")).collect();
    fs::write(&self.path, contents).with_context(|| format!("Failed to write credentials to {}", self.path.display()))?;
    log::debug!("Wrote {} credential entries to {}", values.len(), self.path.display());
    Ok(())
  }
}
