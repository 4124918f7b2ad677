#![allow(clippy::unwrap_used)]
// Integration tests for `TokenAuthority` flows using wiremock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use secrecy::ExposeSecret;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use homeconnect_api::{
    AuthConfig, AuthState, CredentialRecord, KeyValueStore, MemoryStore, RateGate, Server,
    TokenAuthority, TransportConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────

struct Harness {
    server: MockServer,
    store: Arc<MemoryStore>,
    auth: TokenAuthority,
    cancel: CancellationToken,
}

impl Harness {
    async fn new(server_kind: Server, record: Option<CredentialRecord>) -> Self {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryStore::new());
        if let Some(record) = record {
            store
                .set("token client", serde_json::to_value(record).unwrap(), None)
                .unwrap();
        }
        let config = AuthConfig {
            server: server_kind,
            base_url: Some(Url::parse(&server.uri()).unwrap()),
            client_id: "client".into(),
            client_secret: Some("secret".to_string().into()),
            ..AuthConfig::default()
        };
        let auth = TokenAuthority::new(
            config,
            store.clone(),
            RateGate::new(),
            &TransportConfig::default(),
        )
        .unwrap();
        Self {
            server,
            store,
            auth,
            cancel: CancellationToken::new(),
        }
    }

    fn run(&self) -> tokio::task::JoinHandle<()> {
        let auth = self.auth.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move { auth.run(cancel).await })
    }

    async fn wait_for(&self, predicate: impl Fn(&AuthState) -> bool) -> AuthState {
        let mut rx = self.auth.watch_state();
        let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| predicate(s)))
            .await
            .unwrap()
            .unwrap();
        state.clone()
    }
}

fn token_response(access: &str, refresh: Option<&str>) -> serde_json::Value {
    let mut body = json!({
        "access_token": access,
        "expires_in": 86400,
        "scope": "IdentifyAppliance Monitor Settings",
        "token_type": "Bearer"
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = json!(refresh);
    }
    body
}

// ── Initial authorisation ───────────────────────────────────────────

#[tokio::test]
async fn test_simulator_code_flow() {
    let h = Harness::new(Server::Simulator, None).await;

    Mock::given(method("GET"))
        .and(path("/security/oauth/authorize"))
        .and(query_param("client_id", "client"))
        .and(query_param("response_type", "code"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "https://apiclient.home-connect.com/o2c.html?code=abc&state="),
        )
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/security/oauth/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=abc"))
        .and(body_string_contains("client_secret=secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response("access-1", Some("refresh-1"))))
        .expect(1)
        .mount(&h.server)
        .await;

    let runner = h.run();
    tokio::time::timeout(Duration::from_secs(5), h.auth.wait_until_authorised())
        .await
        .unwrap();

    assert_eq!(h.auth.get_authorisation().unwrap().expose_secret(), "access-1");
    assert!(h.auth.has_scope("Settings"));
    assert!(!h.auth.has_scope("Control"));
    let persisted = h.store.get("token client").unwrap();
    assert_eq!(persisted["refresh_token"], json!("refresh-1"));

    h.cancel.cancel();
    runner.await.unwrap();
}

#[tokio::test]
async fn test_device_flow_exposes_user_action() {
    let h = Harness::new(Server::Production, None).await;

    Mock::given(method("POST"))
        .and(path("/security/oauth/device_authorization"))
        .and(body_string_contains("client_id=client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "dev-1",
            "user_code": "WXYZ-1234",
            "verification_uri": "https://verify.example/",
            "verification_uri_complete": "https://verify.example/?user_code=WXYZ-1234",
            "expires_in": 300,
            "interval": 1
        })))
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/security/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "authorization_pending",
            "error_description": "The user has not approved yet"
        })))
        .mount(&h.server)
        .await;

    let runner = h.run();
    let state = h
        .wait_for(|s| matches!(s, AuthState::PendingUserAction(_)))
        .await;
    let AuthState::PendingUserAction(action) = state else {
        unreachable!()
    };
    assert_eq!(action.user_code, "WXYZ-1234");
    assert_eq!(
        action.verification_uri,
        "https://verify.example/?user_code=WXYZ-1234"
    );
    assert!(!h.auth.is_authorised());

    h.cancel.cancel();
    runner.await.unwrap();
}

#[tokio::test]
async fn test_device_flow_polls_until_approved() {
    let h = Harness::new(Server::Production, None).await;

    Mock::given(method("POST"))
        .and(path("/security/oauth/device_authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "dev-1",
            "user_code": "WXYZ-1234",
            "verification_uri": "https://verify.example/",
            "expires_in": 300,
            "interval": 0
        })))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/security/oauth/token"))
        .and(body_string_contains("device_code=dev-1"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "authorization_pending"})))
        .up_to_n_times(2)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/security/oauth/token"))
        .and(body_string_contains("device_code=dev-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response("access-1", Some("refresh-1"))))
        .expect(1)
        .mount(&h.server)
        .await;

    let runner = h.run();
    tokio::time::timeout(Duration::from_secs(5), h.auth.wait_until_authorised())
        .await
        .unwrap();
    assert!(matches!(h.auth.state(), AuthState::Authorised { .. }));

    h.cancel.cancel();
    runner.await.unwrap();
}

// ── Refresh ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_refresh_inside_window_keeps_refresh_token() {
    let record = CredentialRecord {
        refresh_token: "refresh-1".into(),
        access_token: Some("access-1".into()),
        // Default window is one hour, so this is due now.
        access_expires: Utc::now() + TimeDelta::minutes(30),
        scopes: vec!["Monitor".into()],
    };
    let h = Harness::new(Server::Production, Some(record)).await;

    Mock::given(method("POST"))
        .and(path("/security/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response("access-2", None)))
        .expect(1)
        .mount(&h.server)
        .await;

    let runner = h.run();
    let mut rx = h.auth.watch_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|_| {
            h.auth
                .get_authorisation()
                .is_ok_and(|t| t.expose_secret() == "access-2")
        }),
    )
    .await
    .unwrap()
    .unwrap();

    let persisted = h.store.get("token client").unwrap();
    assert_eq!(persisted["refresh_token"], json!("refresh-1"));
    assert_eq!(persisted["access_token"], json!("access-2"));

    h.cancel.cancel();
    runner.await.unwrap();
}

#[tokio::test]
async fn test_rejected_refresh_token_discards_credentials() {
    let record = CredentialRecord {
        refresh_token: "revoked".into(),
        access_token: None,
        access_expires: Utc::now(),
        scopes: vec!["Monitor".into()],
    };
    let h = Harness::new(Server::Production, Some(record)).await;

    Mock::given(method("POST"))
        .and(path("/security/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Refresh token revoked"
        })))
        .expect(1)
        .mount(&h.server)
        .await;
    // The flow restarts from scratch; keep it waiting for the user.
    Mock::given(method("POST"))
        .and(path("/security/oauth/device_authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "dev-2",
            "user_code": "NEW-CODE",
            "verification_uri": "https://verify.example/",
            "expires_in": 300,
            "interval": 60
        })))
        .mount(&h.server)
        .await;

    let runner = h.run();
    h.wait_for(|s| matches!(s, AuthState::PendingUserAction(_)))
        .await;
    assert!(h.store.get("token client").is_none());
    assert!(h.auth.scopes().is_empty());

    h.cancel.cancel();
    runner.await.unwrap();
}

#[tokio::test]
async fn test_misconfigured_client_is_reported_not_retried_hot() {
    let h = Harness::new(Server::Production, None).await;

    Mock::given(method("POST"))
        .and(path("/security/oauth/device_authorization"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "unauthorized_client",
            "error_description": "client not authorized for device flow"
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let runner = h.run();
    // The fresh-start retry delay is minutes, so only one attempt lands.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.auth.state(), AuthState::Unauthorised);

    h.cancel.cancel();
    runner.await.unwrap();
}

#[tokio::test]
async fn test_rejected_code_exchange_waits_before_retrying() {
    let h = Harness::new(Server::Simulator, None).await;

    Mock::given(method("GET"))
        .and(path("/security/oauth/authorize"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "https://apiclient.home-connect.com/o2c.html?code=abc&state="),
        )
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/security/oauth/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "redirect_uri mismatch"
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let runner = h.run();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.auth.state(), AuthState::Unauthorised);
    assert_eq!(h.server.received_requests().await.unwrap().len(), 2);

    h.cancel.cancel();
    runner.await.unwrap();
}

#[tokio::test]
async fn test_failed_refresh_discards_access_token_keeps_refresh_token() {
    let record = CredentialRecord {
        refresh_token: "refresh-1".into(),
        access_token: Some("access-1".into()),
        access_expires: Utc::now() + TimeDelta::minutes(30),
        scopes: vec!["Monitor".into()],
    };
    let h = Harness::new(Server::Production, Some(record)).await;

    Mock::given(method("POST"))
        .and(path("/security/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&h.server)
        .await;

    assert!(matches!(h.auth.state(), AuthState::Authorised { .. }));
    let runner = h.run();
    h.wait_for(|s| matches!(s, AuthState::Unauthorised)).await;

    assert!(h.auth.get_authorisation().is_err());
    assert!(h.auth.has_credentials());
    let persisted = h.store.get("token client").unwrap();
    assert_eq!(persisted["refresh_token"], json!("refresh-1"));
    assert!(persisted["access_token"].is_null());

    h.cancel.cancel();
    runner.await.unwrap();
}
