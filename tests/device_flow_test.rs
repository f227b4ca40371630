mod common;

use std::sync::Arc;
use std::time::Duration;

use rml::auth::{self, CredentialStore, DeviceFlow, DeviceFlowState};
use rml::error::{AuthFailure, Error};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{RecordingSleeper, SilentPrompt};

struct Fixture {
  server:  MockServer,
  sleeper: Arc<RecordingSleeper>,
  flow:    DeviceFlow,
  config:  TempDir
}

async fn fixture() -> Fixture {
  let server = MockServer::start().await;
  let config = TempDir::new().unwrap();
  let settings = common::settings(&server.uri(), config.path());
  let sleeper = common::sleeper();
  let flow = DeviceFlow::new(&settings, reqwest::Client::new(), sleeper.clone(), Box::new(SilentPrompt::default()));

  Fixture { server, sleeper, flow, config }
}

fn token_error(code: &str) -> ResponseTemplate {
  ResponseTemplate::new(200).set_body_json(json!({ "error": code }))
}

async fn mount_device_code(server: &MockServer, interval: u64) {
  Mock::given(method("POST"))
    .and(path("/login/device/code"))
    .and(body_string_contains("client_id=test-client"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "device_code": "dev-123",
      "user_code": "WDJB-MJHT",
      "verification_uri": "https://github.com/login/device",
      "expires_in": 900,
      "interval": interval
    })))
    .mount(server)
    .await;
}

async fn mount_token_sequence(server: &MockServer, first: &str, times: u64) {
  Mock::given(method("POST"))
    .and(path("/login/oauth/access_token"))
    .respond_with(token_error(first))
    .up_to_n_times(times)
    .mount(server)
    .await;

  Mock::given(method("POST"))
    .and(path("/login/oauth/access_token"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "gho_token", "token_type": "bearer" })))
    .mount(server)
    .await;
}

#[tokio::test]
async fn test_pending_three_times_then_token() {
  let fx = fixture().await;
  mount_token_sequence(&fx.server, "authorization_pending", 3).await;

  let token = fx.flow.poll_for_token("dev-123", Duration::from_secs(5)).await.unwrap();

  assert_eq!(token, "gho_token");
  assert_eq!(fx.sleeper.slept(), vec![Duration::from_secs(5); 3]);
  assert_eq!(fx.server.received_requests().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_slow_down_extends_interval() {
  let fx = fixture().await;
  mount_token_sequence(&fx.server, "slow_down", 2).await;

  fx.flow.poll_for_token("dev-123", Duration::from_secs(5)).await.unwrap();

  assert_eq!(fx.sleeper.slept(), vec![Duration::from_secs(10), Duration::from_secs(15)]);
}

#[tokio::test]
async fn test_access_denied_is_terminal() {
  let fx = fixture().await;
  Mock::given(method("POST"))
    .and(path("/login/oauth/access_token"))
    .respond_with(token_error("access_denied"))
    .expect(1)
    .mount(&fx.server)
    .await;

  let err = fx.flow.poll_for_token("dev-123", Duration::from_secs(5)).await.unwrap_err();

  assert!(matches!(err, Error::AuthFailed(AuthFailure::Denied)));
  assert_eq!(fx.flow.state(), DeviceFlowState::Denied);
  assert!(fx.sleeper.slept().is_empty());
}

#[tokio::test]
async fn test_access_denied_with_bad_request_status_is_terminal() {
  let fx = fixture().await;
  Mock::given(method("POST"))
    .and(path("/login/oauth/access_token"))
    .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "access_denied" })))
    .expect(1)
    .mount(&fx.server)
    .await;

  let err = fx.flow.poll_for_token("dev-123", Duration::from_secs(5)).await.unwrap_err();

  assert!(matches!(err, Error::AuthFailed(AuthFailure::Denied)));
  assert_eq!(fx.flow.state(), DeviceFlowState::Denied);
  assert!(fx.sleeper.slept().is_empty());
}

#[tokio::test]
async fn test_pending_with_bad_request_status_waits_the_interval() {
  let fx = fixture().await;
  Mock::given(method("POST"))
    .and(path("/login/oauth/access_token"))
    .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "authorization_pending" })))
    .up_to_n_times(1)
    .mount(&fx.server)
    .await;

  Mock::given(method("POST"))
    .and(path("/login/oauth/access_token"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "gho_token" })))
    .mount(&fx.server)
    .await;

  let token = fx.flow.poll_for_token("dev-123", Duration::from_secs(5)).await.unwrap();

  assert_eq!(token, "gho_token");
  assert_eq!(fx.sleeper.slept(), vec![Duration::from_secs(5)]);
  assert_eq!(fx.server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_token_poll_without_error_body_retries_on_status() {
  let fx = fixture().await;
  Mock::given(method("POST"))
    .and(path("/login/oauth/access_token"))
    .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
    .expect(3)
    .mount(&fx.server)
    .await;

  let err = fx.flow.poll_for_token("dev-123", Duration::from_secs(5)).await.unwrap_err();

  match err {
    Error::RetryExhausted { attempts, source } => {
      assert_eq!(attempts, 3);
      assert_eq!(source.http_status(), Some(503));
    },
    other => panic!("expected exhausted retries, got {other:?}")
  }
  assert_eq!(fx.sleeper.slept(), vec![Duration::from_millis(10), Duration::from_millis(20)]);
}

#[tokio::test]
async fn test_expired_token_is_terminal() {
  let fx = fixture().await;
  Mock::given(method("POST"))
    .and(path("/login/oauth/access_token"))
    .respond_with(token_error("expired_token"))
    .mount(&fx.server)
    .await;

  let err = fx.flow.poll_for_token("dev-123", Duration::from_secs(5)).await.unwrap_err();

  assert!(matches!(err, Error::AuthFailed(AuthFailure::Expired)));
  assert_eq!(fx.flow.state(), DeviceFlowState::Expired);
}

#[tokio::test]
async fn test_unknown_error_code_is_unexpected() {
  let fx = fixture().await;
  Mock::given(method("POST"))
    .and(path("/login/oauth/access_token"))
    .respond_with(token_error("incorrect_client_credentials"))
    .mount(&fx.server)
    .await;

  let err = fx.flow.poll_for_token("dev-123", Duration::from_secs(5)).await.unwrap_err();

  match err {
    Error::AuthFailed(AuthFailure::Unexpected(code)) => assert_eq!(code, "incorrect_client_credentials"),
    other => panic!("expected an unexpected-error failure, got {other:?}")
  }
  assert_eq!(fx.flow.state(), DeviceFlowState::BackendError);
}

#[tokio::test]
async fn test_login_persists_minted_credential() {
  let fx = fixture().await;
  mount_device_code(&fx.server, 1).await;
  mount_token_sequence(&fx.server, "authorization_pending", 1).await;

  Mock::given(method("GET"))
    .and(path("/user"))
    .and(header("authorization", "Bearer gho_token"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 4242, "login": "octocat" })))
    .mount(&fx.server)
    .await;

  Mock::given(method("POST"))
    .and(path("/api/auth/verify"))
    .and(header("authorization", "Bearer gho_token"))
    .and(body_string_contains("user_id=4242"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "api_key": "rml_key" })))
    .mount(&fx.server)
    .await;

  let store = CredentialStore::new(fx.config.path().join("credentials"));
  let credentials = auth::login(&fx.flow, &store).await.unwrap();

  assert_eq!(credentials.access_token, "rml_key");
  assert_eq!(credentials.user_id, "4242");
  assert_eq!(store.credentials().unwrap(), Some(credentials));
  assert_eq!(fx.flow.state(), DeviceFlowState::Authorized);
  assert_eq!(fx.sleeper.slept(), vec![Duration::from_secs(1)]);
}

#[tokio::test]
async fn test_exchange_requires_plan_on_402() {
  let fx = fixture().await;
  Mock::given(method("POST"))
    .and(path("/api/auth/verify"))
    .respond_with(ResponseTemplate::new(402))
    .expect(1)
    .mount(&fx.server)
    .await;

  let err = fx.flow.exchange("gho_token", "4242").await.unwrap_err();

  assert!(matches!(err, Error::AuthFailed(AuthFailure::PlanRequired)));
  assert!(fx.sleeper.slept().is_empty());
}

#[tokio::test]
async fn test_exchange_reports_backend_status() {
  let fx = fixture().await;
  Mock::given(method("POST"))
    .and(path("/api/auth/verify"))
    .respond_with(ResponseTemplate::new(500))
    .mount(&fx.server)
    .await;

  let err = fx.flow.exchange("gho_token", "4242").await.unwrap_err();

  assert!(matches!(err, Error::AuthFailed(AuthFailure::Backend(500))));
  assert_eq!(fx.sleeper.slept().len(), 2);
}

#[tokio::test]
async fn test_require_auth_uses_stored_credential() {
  let fx = fixture().await;
  let store = CredentialStore::new(fx.config.path().join("credentials"));
  store
    .save(&auth::Credentials { access_token: "stored".into(), user_id: "1".into() })
    .unwrap();

  let settings = common::settings(&fx.server.uri(), fx.config.path());
  let credentials = auth::require_auth(&settings, &store, &fx.flow).await.unwrap();

  assert_eq!(credentials.map(|c| c.access_token).as_deref(), Some("stored"));
  assert!(fx.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_require_auth_skips_login_when_disabled() {
  let fx = fixture().await;
  let store = CredentialStore::new(fx.config.path().join("credentials"));
  let mut settings = common::settings(&fx.server.uri(), fx.config.path());
  settings.skip_auth = true;

  assert_eq!(auth::require_auth(&settings, &store, &fx.flow).await.unwrap(), None);
  assert!(fx.server.received_requests().await.unwrap().is_empty());
}
