use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use tnse::{ApiRequest, Authenticator, Error, Session, TokenSet, TokenUpdateCallback};
use wiremock::matchers::{body_json, body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate, Times};

const EMAIL: &str = "user@example.com";
const PASSWORD: &str = "testpassword";
const REGION: &str = "rostov";

#[derive(Default)]
struct Recorder {
    updates: Mutex<Vec<TokenSet>>,
}

impl Recorder {
    fn updates(&self) -> Vec<TokenSet> {
        self.updates.lock().unwrap().clone()
    }
}

impl TokenUpdateCallback for Recorder {
    fn on_tokens_updated(&self, tokens: &TokenSet) {
        self.updates.lock().unwrap().push(tokens.clone());
    }
}

fn valid_tokens() -> TokenSet {
    TokenSet {
        access_token: Some("test_access_token".to_string()),
        refresh_token: Some("test_refresh_token".to_string()),
        access_token_expires: Some(Utc::now() + Duration::hours(1)),
        refresh_token_expires: Some(Utc::now() + Duration::days(30)),
    }
}

fn expired_access_tokens() -> TokenSet {
    TokenSet {
        access_token_expires: Some(Utc::now() - Duration::minutes(1)),
        ..valid_tokens()
    }
}

fn fully_expired_tokens() -> TokenSet {
    TokenSet {
        access_token_expires: Some(Utc::now() - Duration::days(2)),
        refresh_token_expires: Some(Utc::now() - Duration::days(1)),
        ..valid_tokens()
    }
}

async fn assert_no_requests(server: &MockServer) {
    let requests = server.received_requests().await.unwrap();
    assert!(requests.is_empty(), "unexpected requests: {}", requests.len());
}

async fn mount_auth(server: &MockServer, delay_ms: u64, expected: impl Into<Times>) {
    Mock::given(method("POST"))
        .and(path("/api/v1/user/auth"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(include_str!("fixtures/auth_response.json"))
                .set_delay(StdDuration::from_millis(delay_ms)),
        )
        .expect(expected)
        .mount(server)
        .await;
}

async fn mount_refresh(server: &MockServer, delay_ms: u64, expected: impl Into<Times>) {
    Mock::given(method("POST"))
        .and(path("/api/v1/user/refresh-token"))
        .and(body_json(json!({"refreshToken": "test_refresh_token"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(include_str!("fixtures/refresh_token_response.json"))
                .set_delay(StdDuration::from_millis(delay_ms)),
        )
        .expect(expected)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_success_updates_tokens_and_notifies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/user/auth"))
        .and(body_partial_json(json!({
            "login": EMAIL,
            "authType": "email",
            "password": PASSWORD,
            "region": REGION,
            "platform": "android",
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(include_str!("fixtures/auth_response.json")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let session = Session::builder(reqwest::Client::new(), REGION)
        .credentials(EMAIL, PASSWORD)
        .callback(recorder.clone())
        .base_url(server.uri())
        .build();

    let tokens = session.login().await.unwrap();
    assert_eq!(tokens.access_token.as_deref(), Some("test_access_token_new"));
    assert_eq!(tokens.refresh_token.as_deref(), Some("test_refresh_token_new"));
    assert_eq!(
        tokens.access_token_expires,
        Some(Utc.with_ymd_and_hms(2099, 6, 9, 19, 42, 16).unwrap())
    );
    assert_eq!(
        tokens.refresh_token_expires,
        Some(Utc.with_ymd_and_hms(2099, 10, 9, 19, 42, 16).unwrap())
    );
    assert_eq!(session.tokens(), tokens);
    assert_eq!(recorder.updates(), vec![tokens]);

    // The login call itself carries no bearer token
    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("authorizationtest").is_none());
    assert!(requests[0].headers.get("x-device-id").is_some());
}

#[tokio::test]
async fn test_login_wrong_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/user/auth"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(include_str!("fixtures/auth_error_response.json")),
        )
        .mount(&server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let session = Session::builder(reqwest::Client::new(), REGION)
        .credentials(EMAIL, "wrongpassword")
        .callback(recorder.clone())
        .base_url(server.uri())
        .build();

    let err = session.login().await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
    assert!(err.to_string().contains("Неверный логин или пароль"));
    assert!(session.tokens().is_empty());
    assert!(recorder.updates().is_empty());
}

#[tokio::test]
async fn test_login_http_error_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/user/auth"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .mount(&server)
        .await;

    let session = Session::builder(reqwest::Client::new(), REGION)
        .credentials(EMAIL, PASSWORD)
        .base_url(server.uri())
        .build();

    let err = session.login().await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
}

#[tokio::test]
async fn test_login_with_empty_password_makes_no_request() {
    let server = MockServer::start().await;
    let session = Session::builder(reqwest::Client::new(), REGION)
        .credentials(EMAIL, "")
        .base_url(server.uri())
        .build();

    let err = session.login().await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
    assert_no_requests(&server).await;
}

#[tokio::test]
async fn test_refresh_updates_access_token_only() {
    let server = MockServer::start().await;
    mount_refresh(&server, 0, 1).await;

    let recorder = Arc::new(Recorder::default());
    let seeded = expired_access_tokens();
    let session = Session::builder(reqwest::Client::new(), REGION)
        .tokens(seeded.clone())
        .callback(recorder.clone())
        .base_url(server.uri())
        .build();

    let tokens = session.refresh().await.unwrap();
    assert_eq!(tokens.access_token.as_deref(), Some("test_access_token_refreshed"));
    assert_eq!(
        tokens.access_token_expires,
        Some(Utc.with_ymd_and_hms(2099, 6, 9, 19, 42, 16).unwrap())
    );
    assert_eq!(tokens.refresh_token, seeded.refresh_token);
    assert_eq!(tokens.refresh_token_expires, seeded.refresh_token_expires);
    assert_eq!(recorder.updates(), vec![tokens]);
}

#[tokio::test]
async fn test_refresh_without_refresh_token_makes_no_request() {
    let server = MockServer::start().await;
    let session = Session::builder(reqwest::Client::new(), REGION)
        .base_url(server.uri())
        .build();

    let err = session.refresh().await.unwrap_err();
    assert!(matches!(err, Error::TokenRefresh(_)));
    assert_no_requests(&server).await;
}

#[tokio::test]
async fn test_refresh_rejected_is_refresh_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/user/refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": false,
            "statusCode": 401,
            "error": {"description": "Refresh token expired"}
        })))
        .mount(&server)
        .await;

    let session = Session::builder(reqwest::Client::new(), REGION)
        .tokens(expired_access_tokens())
        .base_url(server.uri())
        .build();

    let err = session.refresh().await.unwrap_err();
    assert!(matches!(err, Error::TokenRefresh(_)));
    assert!(err.to_string().contains("Refresh token expired"));
}

#[tokio::test]
async fn test_logout_clears_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/user/logout"))
        .and(header("authorizationtest", "Bearer test_access_token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(include_str!("fixtures/logout_response.json")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let session = Session::builder(reqwest::Client::new(), REGION)
        .tokens(valid_tokens())
        .callback(recorder.clone())
        .base_url(server.uri())
        .build();

    session.logout().await.unwrap();

    let tokens = session.tokens();
    assert!(tokens.access_token.is_none());
    assert!(tokens.refresh_token.is_none());
    assert!(tokens.access_token_expires.is_none());
    assert!(tokens.refresh_token_expires.is_none());
    assert_eq!(recorder.updates(), vec![TokenSet::default()]);
}

#[tokio::test]
async fn test_failed_logout_keeps_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/user/logout"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .expect(1)
        .mount(&server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let seeded = valid_tokens();
    let session = Session::builder(reqwest::Client::new(), REGION)
        .tokens(seeded.clone())
        .callback(recorder.clone())
        .base_url(server.uri())
        .build();

    let err = session.logout().await.unwrap_err();
    assert!(matches!(err, Error::Transport { status: 500, .. }));
    assert_eq!(session.tokens(), seeded);
    assert!(recorder.updates().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_logout_waits_for_inflight_refresh() {
    let server = MockServer::start().await;
    mount_refresh(&server, 200, 1).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/user/logout"))
        .and(header("authorizationtest", "Bearer test_access_token_refreshed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(include_str!("fixtures/logout_response.json")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let session = Arc::new(
        Session::builder(reqwest::Client::new(), REGION)
            .tokens(expired_access_tokens())
            .base_url(server.uri())
            .build(),
    );

    let refreshing = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.get_access_token().await })
    };
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    session.logout().await.unwrap();

    let token = refreshing.await.unwrap().unwrap();
    assert_eq!(token.as_deref(), Some("test_access_token_refreshed"));
    assert!(session.tokens().is_empty());
    server.verify().await;
}

#[tokio::test]
async fn test_valid_token_needs_no_network() {
    let server = MockServer::start().await;
    let seeded = valid_tokens();
    let session = Session::builder(reqwest::Client::new(), REGION)
        .tokens(seeded.clone())
        .base_url(server.uri())
        .build();

    let token = session.get_access_token().await.unwrap();
    assert_eq!(token, seeded.access_token);
    assert_no_requests(&server).await;
}

#[tokio::test]
async fn test_token_without_expiry_is_trusted() {
    let server = MockServer::start().await;
    let session = Session::builder(reqwest::Client::new(), REGION)
        .tokens(TokenSet {
            access_token: Some("no_expiry".to_string()),
            ..TokenSet::default()
        })
        .credentials(EMAIL, PASSWORD)
        .base_url(server.uri())
        .build();

    let token = session.get_access_token().await.unwrap();
    assert_eq!(token.as_deref(), Some("no_expiry"));
    assert_no_requests(&server).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_refresh() {
    let server = MockServer::start().await;
    mount_refresh(&server, 200, 1).await;

    let session = Arc::new(
        Session::builder(reqwest::Client::new(), REGION)
            .tokens(expired_access_tokens())
            .credentials(EMAIL, PASSWORD)
            .base_url(server.uri())
            .build(),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.get_access_token().await })
        })
        .collect();

    for handle in handles {
        let token = handle.await.unwrap().unwrap();
        assert_eq!(token.as_deref(), Some("test_access_token_refreshed"));
    }
    server.verify().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_login() {
    let server = MockServer::start().await;
    mount_auth(&server, 200, 1).await;
    mount_refresh(&server, 0, 0).await;

    let session = Arc::new(
        Session::builder(reqwest::Client::new(), REGION)
            .tokens(fully_expired_tokens())
            .credentials(EMAIL, PASSWORD)
            .base_url(server.uri())
            .build(),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.get_access_token().await })
        })
        .collect();

    for handle in handles {
        let token = handle.await.unwrap().unwrap();
        assert_eq!(token.as_deref(), Some("test_access_token_new"));
    }
    server.verify().await;
}

#[tokio::test]
async fn test_expired_tokens_without_credentials_return_stale_token() {
    let server = MockServer::start().await;
    let session = Session::builder(reqwest::Client::new(), REGION)
        .tokens(fully_expired_tokens())
        .base_url(server.uri())
        .build();

    let token = session.get_access_token().await.unwrap();
    assert_eq!(token.as_deref(), Some("test_access_token"));
    assert_no_requests(&server).await;
}

#[tokio::test]
async fn test_cancelled_renewal_releases_guard() {
    let server = MockServer::start().await;
    mount_refresh(&server, 300, 1..=2).await;

    let session = Session::builder(reqwest::Client::new(), REGION)
        .tokens(expired_access_tokens())
        .base_url(server.uri())
        .build();

    let timed_out =
        tokio::time::timeout(StdDuration::from_millis(50), session.get_access_token()).await;
    assert!(timed_out.is_err());

    let token = tokio::time::timeout(StdDuration::from_secs(5), session.get_access_token())
        .await
        .expect("renewal guard was not released")
        .unwrap();
    assert_eq!(token.as_deref(), Some("test_access_token_refreshed"));
}

#[tokio::test]
async fn test_request_attaches_headers_and_unwraps_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/accounts"))
        .and(header("authorizationtest", "Bearer test_access_token"))
        .and(header("x-api-hash", "b4c9554247f14b9a281f5f60df923f5e"))
        .and(header("user-agent", "Dart/3.9 (dart:io)"))
        .and(header(
            "authorization",
            "Basic bW9iaWxlLWFwaS1yb3N0b3Y6bW9iaWxlLWFwaS1yb3N0b3Y=",
        ))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(include_str!("fixtures/accounts_response.json")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let session = Session::builder(reqwest::Client::new(), REGION)
        .tokens(valid_tokens())
        .base_url(server.uri())
        .build();

    let data = session.request(ApiRequest::get("accounts")).await.unwrap();
    assert_eq!(data[0]["number"], "610000000001");
}

#[tokio::test]
async fn test_request_error_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/some-endpoint"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": false,
            "statusCode": 400,
            "error": {"code": 100, "description": "Some API error"}
        })))
        .mount(&server)
        .await;

    let session = Session::builder(reqwest::Client::new(), REGION)
        .tokens(valid_tokens())
        .base_url(server.uri())
        .build();

    let err = session
        .request(ApiRequest::get("some-endpoint"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Api { .. }));
    assert!(err.to_string().contains("Some API error"));
}

#[tokio::test]
async fn test_request_server_error_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/accounts"))
        .respond_with(ResponseTemplate::new(500).set_body_string("<html>Internal Server Error</html>"))
        .mount(&server)
        .await;

    let session = Session::builder(reqwest::Client::new(), REGION)
        .tokens(valid_tokens())
        .base_url(server.uri())
        .build();

    let err = session.request(ApiRequest::get("accounts")).await.unwrap_err();
    assert!(matches!(err, Error::Transport { status: 500, .. }));
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/accounts"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let session = Session::builder(reqwest::Client::new(), REGION)
        .tokens(valid_tokens())
        .credentials(EMAIL, PASSWORD)
        .base_url(server.uri())
        .build();

    let err = session.request(ApiRequest::get("accounts")).await.unwrap_err();
    assert_eq!(err.status(), Some(401));
}
