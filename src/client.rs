//! HTTP client for the analysis backend.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::Credentials;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::retry::{retry_on, RetryPolicy, Sleeper};

const USER_AGENT: &str = concat!("rml/", env!("CARGO_PKG_VERSION"));
const UPLOAD_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(600);
const TERMINAL_STATUSES: [&str; 3] = ["success", "completed", "error"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
  pub relative_path: String,
  pub line_no:       usize
}

/// A finding returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
  pub relative_path:       String,
  pub line_no:             usize,
  pub body:                String,
  #[serde(rename = "diff_str", default)]
  pub diff_text:           String,
  #[serde(default)]
  pub documentation_url:   Option<String>,
  #[serde(default)]
  pub reference_locations: Option<Vec<SourceLocation>>
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckStatus {
  pub status:   String,
  #[serde(default)]
  pub comments: Option<Vec<Comment>>
}

impl CheckStatus {
  pub fn is_terminal(&self) -> bool {
    TERMINAL_STATUSES.contains(&self.status.as_str())
  }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
  check_id: String
}

/// Turns a non-2xx response into [`Error::Http`], keeping the body for the message.
pub(crate) async fn ensure_success(response: Response) -> Result<Response> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  let url = response.url().to_string();
  let body = response.text().await.unwrap_or_default();
  Err(Error::Http { status: status.as_u16(), url, body })
}

/// Builds the shared reqwest client with the configured timeout.
pub fn http_client(settings: &Settings) -> Result<Client> {
  Client::builder()
    .user_agent(USER_AGENT)
    .timeout(settings.http_timeout())
    .build()
    .map_err(Error::from)
}

pub struct ApiClient {
  http:          Client,
  base_url:      Url,
  credentials:   Option<Credentials>,
  policy:        RetryPolicy,
  poll_interval: std::time::Duration,
  sleeper:       Arc<dyn Sleeper>
}

impl ApiClient {
  pub fn new(settings: &Settings, http: Client, credentials: Option<Credentials>, sleeper: Arc<dyn Sleeper>) -> Result<Self> {
    let host = settings.require(&settings.host, "host")?;
    let base_url = Url::parse(host).with_context(|| format!("Invalid backend host '{host}'"))?;
    if base_url.cannot_be_a_base() {
      return Err(anyhow::anyhow!("Invalid backend host '{host}'").into());
    }
    if credentials.is_none() && !settings.skip_auth {
      return Err(Error::AuthRequired);
    }

    Ok(Self {
      http,
      base_url,
      credentials,
      policy: settings.retry_policy(),
      poll_interval: settings.poll_interval(),
      sleeper
    })
  }

  /// `segments` are percent-encoded; the trailing empty segment keeps the
  /// backend's trailing slash.
  fn endpoint(&self, segments: &[&str]) -> Url {
    let mut url = self.base_url.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }

  fn user_id(&self) -> &str {
    self.credentials.as_ref().map(|c| c.user_id.as_str()).unwrap_or_default()
  }

  fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    match &self.credentials {
      Some(credentials) => request.bearer_auth(&credentials.access_token),
      None => request
    }
  }

  /// Uploads the archive and returns the check id.
  pub async fn submit_check(&self, archive: &Path, targets: &[String]) -> Result<String> {
    let bytes = std::fs::read(archive).with_context(|| format!("Failed to read archive {}", archive.display()))?;
    let file_name = archive
      .file_name()
      .map(|name| name.to_string_lossy().to_string())
      .unwrap_or_else(|| "archive.tar.gz".to_string());
    let url = self.endpoint(&["api", "check", ""]);

    log::debug!("Uploading {} ({} bytes, {} targets)", file_name, bytes.len(), targets.len());

    let submitted = self
      .policy
      .run(self.sleeper.as_ref(), retry_on::transient_or_http_except_auth, || {
        let bytes = bytes.clone();
        let file_name = file_name.clone();
        let url = url.clone();
        async move {
          let part = Part::bytes(bytes).file_name(file_name).mime_str("application/gzip")?;
          let mut form = Form::new().part("tar_file", part);
          for target in targets {
            form = form.text("target_filenames", target.clone());
          }
          form = form.text("user_id", self.user_id().to_string());

          let request = self.http.post(url).multipart(form).timeout(UPLOAD_TIMEOUT);
          let response = self.authorize(request).send().await?;
          Ok(ensure_success(response).await?.json::<SubmitResponse>().await?)
        }
      })
      .await?;

    log::info!("Submitted check {}", submitted.check_id);
    Ok(submitted.check_id)
  }

  pub async fn check_status(&self, check_id: &str) -> Result<CheckStatus> {
    let url = self.endpoint(&["api", "check", check_id, ""]);

    let status = self
      .policy
      .run(self.sleeper.as_ref(), retry_on::transient_or_http_except_auth, || {
        let url = url.clone();
        async move {
          let request = self.http.get(url).query(&[("user_id", self.user_id())]);
          let response = self.authorize(request).send().await?;
          Ok(ensure_success(response).await?.json::<CheckStatus>().await?)
        }
      })
      .await?;

    log::debug!("Check {check_id}: {}", status.status);
    Ok(status)
  }

  /// Polls at a fixed interval until the check reaches a terminal status.
  pub async fn wait_for_results(&self, check_id: &str) -> Result<Vec<Comment>> {
    loop {
      let status = self.check_status(check_id).await?;

      if status.is_terminal() {
        return match status.comments {
          Some(comments) => Ok(comments),
          None => Err(Error::AnalysisFailed(format!("server did not respond with comments (status '{}')", status.status)))
        };
      }

      self.sleeper.sleep(self.poll_interval).await;
    }
  }
}
