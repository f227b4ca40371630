//! OAuth 2.0 device authorization against the configured provider, followed
//! by the exchange of the provider token for an rml credential.
//!
//! ```text
//! Requesting -> Displaying -> Polling -> Authorized
//!                                    \-> Denied | Expired | BackendError
//! ```

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use console::Emoji;
use parking_lot::Mutex;
use reqwest::header::ACCEPT;
use reqwest::{Client, Response};
use serde::Deserialize;

use crate::auth::store::Credentials;
use crate::client::ensure_success;
use crate::config::Settings;
use crate::error::{AuthFailure, Error, Result};
use crate::retry::{retry_on, RetryPolicy, Sleeper};

const SCOPE: &str = "read:user";
const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFlowState {
  Idle,
  Requesting,
  Displaying,
  Polling,
  Authorized,
  Denied,
  Expired,
  BackendError
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DeviceCode {
  pub device_code:      String,
  pub user_code:        String,
  pub verification_uri: String,
  #[serde(default)]
  pub expires_in:       u64,
  #[serde(default = "default_interval")]
  pub interval:         u64
}

fn default_interval() -> u64 {
  5
}

#[derive(Debug, Deserialize)]
struct TokenPoll {
  access_token:      Option<String>,
  error:             Option<String>,
  error_description: Option<String>
}

#[derive(Debug, Deserialize)]
struct ProviderUser {
  id: serde_json::Value
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
  api_key: String
}

/// Shows the user code and verification URL to the operator.
pub trait Prompt: Send + Sync {
  fn show(&self, code: &DeviceCode);
}

#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
  fn show(&self, code: &DeviceCode) {
    println!("{} First copy your one-time code: {}", Emoji("🔑", ">"), code.user_code.bold().yellow());
    println!("{} Then open {} in your browser to authorize rml", Emoji("🌐", ">"), code.verification_uri.underline());
  }
}

pub struct DeviceFlow {
  http:            Client,
  client_id:       String,
  device_code_url: String,
  token_url:       String,
  user_url:        String,
  verify_url:      String,
  policy:          RetryPolicy,
  sleeper:         Arc<dyn Sleeper>,
  prompt:          Box<dyn Prompt>,
  state:           Mutex<DeviceFlowState>
}

impl DeviceFlow {
  pub fn new(settings: &Settings, http: Client, sleeper: Arc<dyn Sleeper>, prompt: Box<dyn Prompt>) -> Self {
    Self {
      http,
      client_id: settings.oauth_client_id.clone(),
      device_code_url: settings.device_code_url.clone(),
      token_url: settings.token_url.clone(),
      user_url: settings.user_url.clone(),
      verify_url: format!("{}/api/auth/verify", settings.host.trim_end_matches('/')),
      policy: settings.retry_policy(),
      sleeper,
      prompt,
      state: Mutex::new(DeviceFlowState::Idle)
    }
  }

  pub fn state(&self) -> DeviceFlowState {
    *self.state.lock()
  }

  fn set_state(&self, state: DeviceFlowState) {
    log::debug!("Device flow: {state:?}");
    *self.state.lock() = state;
  }

  /// Runs the whole flow and returns the minted credential.
  pub async fn login(&self) -> Result<Credentials> {
    if self.client_id.trim().is_empty() {
      return Err(anyhow::anyhow!("Missing required setting: set RML_OAUTH_CLIENT_ID to log in").into());
    }

    let code = self.request_device_code().await?;

    self.set_state(DeviceFlowState::Displaying);
    self.prompt.show(&code);

    let token = self
      .poll_for_token(&code.device_code, Duration::from_secs(code.interval))
      .await?;

    let user_id = self.fetch_user_id(&token).await?;
    let access_token = self.exchange(&token, &user_id).await?;

    self.set_state(DeviceFlowState::Authorized);
    Ok(Credentials { access_token, user_id })
  }

  pub async fn request_device_code(&self) -> Result<DeviceCode> {
    self.set_state(DeviceFlowState::Requesting);

    let code = self
      .policy
      .run(self.sleeper.as_ref(), retry_on::transient_or_http_except_auth, || async move {
        let response = self
          .http
          .post(&self.device_code_url)
          .header(ACCEPT, "application/json")
          .form(&[("client_id", self.client_id.as_str()), ("scope", SCOPE)])
          .send()
          .await?;

        Ok(ensure_success(response).await?.json::<DeviceCode>().await?)
      })
      .await?;

    log::debug!("Received device code, polling every {}s", code.interval);
    Ok(code)
  }

  /// Polls the token endpoint until the operator approves or the flow ends.
  ///
  /// Each poll happens before the wait, so `n` pending answers cause exactly
  /// `n` sleeps. `slow_down` permanently extends the interval.
  pub async fn poll_for_token(&self, device_code: &str, interval: Duration) -> Result<String> {
    self.set_state(DeviceFlowState::Polling);
    let mut interval = interval;

    loop {
      let poll = self.poll_once(device_code).await?;

      if let Some(token) = poll.access_token.filter(|token| !token.is_empty()) {
        log::info!("Device authorized");
        return Ok(token);
      }

      match poll.error.as_deref() {
        Some("authorization_pending") => {},
        Some("slow_down") => {
          interval += SLOW_DOWN_INCREMENT;
          log::debug!("Asked to slow down, polling every {interval:?}");
        },
        Some("expired_token") => {
          self.set_state(DeviceFlowState::Expired);
          return Err(Error::AuthFailed(AuthFailure::Expired));
        },
        Some("access_denied") => {
          self.set_state(DeviceFlowState::Denied);
          return Err(Error::AuthFailed(AuthFailure::Denied));
        },
        other => {
          self.set_state(DeviceFlowState::BackendError);
          let code = other.unwrap_or("missing access_token").to_string();
          if let Some(description) = poll.error_description {
            log::error!("Authorization failed: {code}: {description}");
          }
          return Err(Error::AuthFailed(AuthFailure::Unexpected(code)));
        }
      }

      self.sleeper.sleep(interval).await;
    }
  }

  async fn poll_once(&self, device_code: &str) -> Result<TokenPoll> {
    self
      .policy
      .run(self.sleeper.as_ref(), retry_on::transient_or_http_except_auth, || async move {
        let response = self
          .http
          .post(&self.token_url)
          .header(ACCEPT, "application/json")
          .form(&[
            ("client_id", self.client_id.as_str()),
            ("device_code", device_code),
            ("grant_type", GRANT_TYPE)
          ])
          .send()
          .await?;

        read_token_poll(response).await
      })
      .await
  }

  /// The operator's identity at the provider.
  pub async fn fetch_user_id(&self, token: &str) -> Result<String> {
    let user = self
      .policy
      .run(self.sleeper.as_ref(), retry_on::transient_or_http_except_auth, || async move {
        let response = self
          .http
          .get(&self.user_url)
          .header(ACCEPT, "application/json")
          .bearer_auth(token)
          .send()
          .await?;

        Ok(ensure_success(response).await?.json::<ProviderUser>().await?)
      })
      .await?;

    match user.id {
      serde_json::Value::String(id) => Ok(id),
      serde_json::Value::Number(id) => Ok(id.to_string()),
      other => Err(anyhow::anyhow!("Unexpected user id in provider response: {other}").into())
    }
  }

  /// Trades the provider token for an rml credential.
  pub async fn exchange(&self, token: &str, user_id: &str) -> Result<String> {
    let result = self
      .policy
      .run(self.sleeper.as_ref(), retry_on::transient_or_http_except_auth, || async move {
        let response = self
          .http
          .post(&self.verify_url)
          .bearer_auth(token)
          .form(&[("user_id", user_id)])
          .send()
          .await?;

        Ok(ensure_success(response).await?.json::<VerifyResponse>().await?)
      })
      .await;

    match result {
      Ok(verified) => Ok(verified.api_key),
      Err(err) => {
        let failure = match err.http_status() {
          Some(402) => AuthFailure::PlanRequired,
          Some(status) => AuthFailure::Backend(status),
          None => return Err(err)
        };
        self.set_state(DeviceFlowState::BackendError);
        Err(Error::AuthFailed(failure))
      }
    }
  }
}

/// Poll answers carry their meaning in the body: providers send
/// `authorization_pending`, `slow_down` and the terminal codes with either a
/// 200 or a 400. Only a body that says neither falls back to the status.
async fn read_token_poll(response: Response) -> Result<TokenPoll> {
  let status = response.status();
  let url = response.url().to_string();
  let body = response.text().await?;

  match serde_json::from_str::<TokenPoll>(&body) {
    Ok(poll) if poll.error.is_some() || poll.access_token.is_some() => Ok(poll),
    _ if !status.is_success() => Err(Error::Http { status: status.as_u16(), url, body }),
    parsed => Ok(parsed?)
  }
}
