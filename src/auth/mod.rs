//! Login, logout and the guard that makes sure a credential exists before
//! talking to the analysis backend.

pub mod device;
pub mod store;

pub use device::{DeviceCode, DeviceFlow, DeviceFlowState, Prompt, TerminalPrompt};
pub use store::{CredentialStore, Credentials, ACCESS_TOKEN_KEY, USER_ID_KEY};

use crate::config::Settings;
use crate::error::Result;

/// Runs the device flow and stores the resulting credential.
pub async fn login(flow: &DeviceFlow, store: &CredentialStore) -> Result<Credentials> {
  let credentials = flow.login().await?;
  store.save(&credentials)?;
  log::info!("Saved credentials to {}", store.path().display());
  Ok(credentials)
}

/// Forgets the stored credential. Returns whether one was stored.
pub fn logout(store: &CredentialStore) -> Result<bool> {
  store.remove(&[ACCESS_TOKEN_KEY, USER_ID_KEY])
}

pub fn status(store: &CredentialStore) -> Result<bool> {
  store.is_authenticated()
}

/// Returns the stored credential, logging in first when there is none.
///
/// With `skip_auth` set the device flow never runs and whatever is stored
/// (possibly nothing) is returned.
pub async fn require_auth(settings: &Settings, store: &CredentialStore, flow: &DeviceFlow) -> Result<Option<Credentials>> {
  if let Some(credentials) = store.credentials()? {
    return Ok(Some(credentials));
  }

  if settings.skip_auth {
    log::debug!("No stored credentials, continuing without authentication");
    return Ok(None);
  }

  log::info!("No stored credentials, starting login");
  login(flow, store).await.map(Some)
}
