use std::collections::VecDeque;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http::StatusCode;
use marginalia_common::{HttpClient, TransportError};
use marginalia_identity::ResolverOptions;
use marginalia_oauth::client::{ClientConfig, OAuthClient};
use marginalia_oauth::error::OAuthError;
use marginalia_oauth::store::{AuthStore, MemoryAuthStore, StateError};
use marginalia_oauth::types::CallbackParams;

#[derive(Clone, Default)]
struct MockClient {
    queue: Arc<tokio::sync::Mutex<VecDeque<http::Response<Vec<u8>>>>>,
    seen: Arc<tokio::sync::Mutex<Vec<http::Request<Vec<u8>>>>>,
}

impl MockClient {
    async fn push(&self, status: StatusCode, body: serde_json::Value) {
        self.push_with_headers(status, body, &[]).await;
    }

    async fn push_with_headers(
        &self,
        status: StatusCode,
        body: serde_json::Value,
        headers: &[(&str, &str)],
    ) {
        let mut builder = http::Response::builder().status(status);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.queue
            .lock()
            .await
            .push_back(builder.body(serde_json::to_vec(&body).unwrap()).unwrap());
    }

    async fn requests_to(&self, path: &str) -> Vec<http::Request<Vec<u8>>> {
        self.seen
            .lock()
            .await
            .iter()
            .filter(|r| r.uri().path() == path)
            .map(|r| {
                let mut builder = http::Request::builder().uri(r.uri().clone());
                for (name, value) in r.headers() {
                    builder = builder.header(name, value);
                }
                builder.body(r.body().clone()).unwrap()
            })
            .collect()
    }
}

impl HttpClient for MockClient {
    async fn send_http(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>, TransportError> {
        let response = self
            .queue
            .lock()
            .await
            .pop_front()
            .expect("no queued response");
        self.seen.lock().await.push(request);
        Ok(response)
    }
}

fn config() -> ClientConfig {
    ClientConfig::builder()
        .client_id("https://comments.example.com/client-metadata.json".into())
        .redirect_uri("https://comments.example.com/oauth/callback".into())
        .build()
}

fn oauth(http: MockClient) -> OAuthClient<MemoryAuthStore, MockClient> {
    OAuthClient::new(
        MemoryAuthStore::new(),
        http,
        ResolverOptions::default(),
        config(),
    )
}

/// Queue the four responses `start_login` needs: handle resolution, DID
/// document, protected-resource metadata, authorization-server metadata.
async fn queue_login(http: &MockClient, did: &str, pds: &str, issuer: &str) {
    http.push(StatusCode::OK, serde_json::json!({ "did": did })).await;
    http.push(
        StatusCode::OK,
        serde_json::json!({
            "id": did,
            "service": [{
                "id": "#atproto_pds",
                "type": "AtprotoPersonalDataServer",
                "serviceEndpoint": pds
            }]
        }),
    )
    .await;
    http.push(
        StatusCode::OK,
        serde_json::json!({
            "resource": pds,
            "authorization_servers": [issuer]
        }),
    )
    .await;
    http.push(
        StatusCode::OK,
        serde_json::json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}/oauth/authorize"),
            "token_endpoint": format!("{issuer}/oauth/token"),
            "revocation_endpoint": format!("{issuer}/oauth/revoke"),
        }),
    )
    .await;
}

fn token_body(did: &str) -> serde_json::Value {
    serde_json::json!({
        "access_token": "at-123",
        "token_type": "DPoP",
        "expires_in": 3600,
        "refresh_token": "rt-456",
        "scope": "atproto transition:generic",
        "sub": did
    })
}

fn dpop_claims(request: &http::Request<Vec<u8>>) -> serde_json::Value {
    let proof = request.headers().get("DPoP").unwrap().to_str().unwrap();
    let payload = proof.split('.').nth(1).unwrap();
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap()
}

#[tokio::test]
async fn login_redirect_carries_challenge_and_state() {
    let http = MockClient::default();
    queue_login(&http, "did:plc:alice123", "https://pds.example.com", "https://auth.example.com").await;

    let client = oauth(http);
    let redirect = client
        .start_login("alice.example.com", "client-1", None)
        .await
        .unwrap();

    assert!(redirect.url.starts_with("https://auth.example.com/oauth/authorize?"));
    assert!(redirect.url.contains("response_type=code"));
    assert!(redirect.url.contains("code_challenge="));
    assert!(redirect.url.contains("code_challenge_method=S256"));
    assert!(redirect.url.contains(&format!("state={}", redirect.state)));
    assert!(redirect.url.contains("login_hint=alice.example.com"));
}

#[tokio::test]
async fn callback_with_unknown_state_fails() {
    let client = oauth(MockClient::default());
    let err = client
        .callback(CallbackParams {
            code: Some("abc".into()),
            state: Some("never-issued".into()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, OAuthError::State(StateError::Unknown)));
}

#[tokio::test]
async fn callback_with_provider_error_terminates() {
    let client = oauth(MockClient::default());
    let err = client
        .callback(CallbackParams {
            error: Some("access_denied".into()),
            error_description: Some("user rejected the request".into()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    match err {
        OAuthError::Provider { error, description } => {
            assert_eq!(error, "access_denied");
            assert_eq!(description.as_deref(), Some("user rejected the request"));
        }
        other => panic!("expected provider error, got {other:?}"),
    }
}

#[tokio::test]
async fn full_exchange_establishes_session_once() {
    let http = MockClient::default();
    queue_login(&http, "did:plc:alice123", "https://pds.example.com", "https://auth.example.com").await;
    http.push(StatusCode::OK, token_body("did:plc:alice123")).await;

    let client = oauth(http);
    let redirect = client
        .start_login("alice.example.com", "client-1", Some("/contracts/42".into()))
        .await
        .unwrap();

    let session = client
        .callback(CallbackParams {
            code: Some("authcode".into()),
            state: Some(redirect.state.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(session.did.as_str(), "did:plc:alice123");
    assert_eq!(session.access_token, "at-123");
    assert_eq!(session.refresh_token.as_deref(), Some("rt-456"));
    assert!(client.get_session(&session.session_id).await.unwrap().is_some());

    // The state was consumed: replaying the callback fails.
    let err = client
        .callback(CallbackParams {
            code: Some("authcode".into()),
            state: Some(redirect.state.to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, OAuthError::State(StateError::Unknown)));
}

#[tokio::test]
async fn token_exchange_retries_once_on_nonce_challenge() {
    let http = MockClient::default();
    queue_login(&http, "did:plc:alice123", "https://pds.example.com", "https://auth.example.com").await;
    http.push_with_headers(
        StatusCode::BAD_REQUEST,
        serde_json::json!({ "error": "use_dpop_nonce" }),
        &[("DPoP-Nonce", "fresh-nonce")],
    )
    .await;
    http.push(StatusCode::OK, token_body("did:plc:alice123")).await;

    let client = oauth(http.clone());
    let redirect = client
        .start_login("alice.example.com", "client-1", None)
        .await
        .unwrap();
    let session = client
        .callback(CallbackParams {
            code: Some("authcode".into()),
            state: Some(redirect.state.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(session.access_token, "at-123");

    let attempts = http.requests_to("/oauth/token").await;
    assert_eq!(attempts.len(), 2, "exactly one retry");
    assert_eq!(dpop_claims(&attempts[0]).get("nonce"), None);
    assert_eq!(
        dpop_claims(&attempts[1])
            .get("nonce")
            .and_then(|v| v.as_str()),
        Some("fresh-nonce")
    );
}

#[tokio::test]
async fn second_nonce_failure_is_final() {
    let http = MockClient::default();
    queue_login(&http, "did:plc:alice123", "https://pds.example.com", "https://auth.example.com").await;
    http.push_with_headers(
        StatusCode::BAD_REQUEST,
        serde_json::json!({ "error": "use_dpop_nonce" }),
        &[("DPoP-Nonce", "nonce-1")],
    )
    .await;
    http.push_with_headers(
        StatusCode::BAD_REQUEST,
        serde_json::json!({ "error": "use_dpop_nonce" }),
        &[("DPoP-Nonce", "nonce-2")],
    )
    .await;

    let client = oauth(http.clone());
    let redirect = client
        .start_login("alice.example.com", "client-1", None)
        .await
        .unwrap();
    let err = client
        .callback(CallbackParams {
            code: Some("authcode".into()),
            state: Some(redirect.state.to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, OAuthError::TokenExchange(_)));
    assert_eq!(http.requests_to("/oauth/token").await.len(), 2);
}

#[tokio::test]
async fn token_issued_for_wrong_account_is_rejected() {
    let http = MockClient::default();
    queue_login(&http, "did:plc:alice123", "https://pds.example.com", "https://auth.example.com").await;
    http.push(StatusCode::OK, token_body("did:plc:mallory")).await;

    let client = oauth(http);
    let redirect = client
        .start_login("alice.example.com", "client-1", None)
        .await
        .unwrap();
    let err = client
        .callback(CallbackParams {
            code: Some("authcode".into()),
            state: Some(redirect.state.to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, OAuthError::TokenExchange(_)));
}

#[tokio::test]
async fn new_provider_session_revokes_the_old_one() {
    let http = MockClient::default();
    let client = oauth(http.clone());

    queue_login(&http, "did:plc:alice123", "https://pds.example.com", "https://auth.example.com").await;
    http.push(StatusCode::OK, token_body("did:plc:alice123")).await;
    let first = client
        .start_login("alice.example.com", "client-1", None)
        .await
        .unwrap();
    let first = client
        .callback(CallbackParams {
            code: Some("code-1".into()),
            state: Some(first.state.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    queue_login(&http, "did:plc:alice123", "https://pds.example.com", "https://other.example.com").await;
    http.push(StatusCode::OK, token_body("did:plc:alice123")).await;
    let second = client
        .start_login("alice.example.com", "client-1", None)
        .await
        .unwrap();
    let second = client
        .callback(CallbackParams {
            code: Some("code-2".into()),
            state: Some(second.state.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(client.get_session(&first.session_id).await.unwrap().is_none());
    let active = client.active_session("client-1").await.unwrap().unwrap();
    assert_eq!(active.session_id, second.session_id);
    assert_eq!(active.issuer, "https://other.example.com/");

    // Sessions for a different client are untouched.
    assert_eq!(
        client
            .store
            .sessions_for_client("client-1")
            .await
            .unwrap()
            .len(),
        1
    );
}
