//! Error handling for the rml CLI.
//!
//! Every fallible operation in the library returns [`Error`]. The helpers at
//! the bottom of this module classify errors for retry decisions and for the
//! messages printed by the binary.

use std::fmt;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a login attempt did not produce a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
  /// The operator declined the authorization request
  Denied,
  /// The device code expired before the operator approved it
  Expired,
  /// The backend refused to mint a credential without an active plan
  PlanRequired,
  /// The backend answered the credential exchange with this status
  Backend(u16),
  /// The authorization server returned an error code we do not handle
  Unexpected(String)
}

impl fmt::Display for AuthFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AuthFailure::Denied => write!(f, "User denied authorization request"),
      AuthFailure::Expired => write!(f, "Device code has expired. Please try again"),
      AuthFailure::PlanRequired => write!(f, "An active subscription is required"),
      AuthFailure::Backend(status) => write!(f, "Failed to sync with backend (HTTP {status})"),
      AuthFailure::Unexpected(code) => write!(f, "Unexpected error: {code}")
    }
  }
}

#[derive(Error, Debug)]
pub enum Error {
  #[error("Couldn't parse diff line: '{0}'")]
  MalformedDiffLine(String),

  #[error("Diff line found before any hunk header: '{0}'")]
  MissingDiffHeader(String),

  #[error("Found {count} diff hunks containing line {line_no}, this should not happen")]
  AmbiguousDiffHunk { line_no: usize, count: usize },

  #[error("Network error: {0}")]
  Network(#[from] reqwest::Error),

  #[error("HTTP {status} from {url}: {body}")]
  Http { status: u16, url: String, body: String },

  #[error("Not authenticated. Run `rml auth login` first")]
  AuthRequired,

  #[error("Authentication failed: {0}")]
  AuthFailed(AuthFailure),

  #[error("Gave up after {attempts} attempts: {source}")]
  RetryExhausted {
    attempts: u32,
    #[source]
    source:   Box<Error>
  },

  #[error("Not a git repository. Please run this command in a git repository")]
  NotAGitRepository,

  #[error("Invalid path {0} - attempting to access file outside repository")]
  PathOutsideRepository(String),

  #[error("Archive is {size} bytes, the limit is {limit} bytes")]
  PayloadTooLarge { size: u64, limit: u64 },

  #[error("Workflow step expected output '{0}' from the previous step")]
  MissingStepOutput(&'static str),

  #[error("Could not analyze the results: {0}")]
  AnalysisFailed(String),

  #[error(transparent)]
  Git(#[from] git2::Error),

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Json(#[from] serde_json::Error),

  #[error(transparent)]
  Config(#[from] config::ConfigError),

  #[error(transparent)]
  Other(#[from] anyhow::Error)
}

impl Error {
  /// Status code of an HTTP error, looking through [`Error::RetryExhausted`].
  pub fn http_status(&self) -> Option<u16> {
    match self {
      Error::Http { status, .. } => Some(*status),
      Error::Network(err) => err.status().map(|s| s.as_u16()),
      Error::RetryExhausted { source, .. } => source.http_status(),
      _ => None
    }
  }

  /// True for diff parsing and alignment failures, which point at a
  /// mismatch between what the server sent and what the client expects.
  pub fn is_contract_violation(&self) -> bool {
    matches!(
      self,
      Error::MalformedDiffLine(_) | Error::MissingDiffHeader(_) | Error::AmbiguousDiffHunk { .. }
    )
  }
}

/// Checks if an error is a connection-level failure worth retrying.
///
/// Timeouts, refused connections and requests that never got a response
/// are transient. Anything carrying an HTTP status is not: those are
/// classified per call site, see [`crate::retry::retry_on`].
///
/// # Examples
///
/// ```
/// use rml::error::{is_transient, Error};
///
/// let error = Error::Http { status: 503, url: "https://example.com".into(), body: String::new() };
/// assert!(!is_transient(&error));
/// ```
pub fn is_transient(error: &Error) -> bool {
  match error {
    Error::Network(err) => err.status().is_none() && (err.is_timeout() || err.is_connect() || err.is_request()),
    _ => false
  }
}

/// Checks if an error means the stored credential is missing or rejected.
pub fn is_auth_error(error: &Error) -> bool {
  match error {
    Error::AuthRequired | Error::AuthFailed(_) => true,
    other => other.http_status() == Some(401)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn http(status: u16) -> Error {
    Error::Http { status, url: "https://example.com/api/check/".into(), body: String::new() }
  }

  #[test]
  fn test_http_status_is_read_through_retry_exhausted() {
    let error = Error::RetryExhausted { attempts: 5, source: Box::new(http(502)) };
    assert_eq!(error.http_status(), Some(502));
  }

  #[test]
  fn test_detects_auth_errors() {
    assert!(is_auth_error(&Error::AuthRequired));
    assert!(is_auth_error(&Error::AuthFailed(AuthFailure::Denied)));
    assert!(is_auth_error(&http(401)));
  }

  #[test]
  fn test_ignores_unrelated_errors() {
    assert!(!is_auth_error(&http(402)));
    assert!(!is_auth_error(&Error::NotAGitRepository));
    assert!(!is_transient(&http(500)));
  }

  #[test]
  fn test_contract_violations() {
    assert!(Error::MalformedDiffLine("?x".into()).is_contract_violation());
    assert!(Error::AmbiguousDiffHunk { line_no: 3, count: 2 }.is_contract_violation());
    assert!(!http(400).is_contract_violation());
  }

  #[test]
  fn test_auth_failure_messages() {
    assert_eq!(AuthFailure::Denied.to_string(), "User denied authorization request");
    assert_eq!(AuthFailure::Unexpected("bad_verification_code".into()).to_string(), "Unexpected error: bad_verification_code");
  }
}
