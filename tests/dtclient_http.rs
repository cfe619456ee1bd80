//! # Monitoring API Client Tests
//!
//! Drives [`DtHttpClient`] against a lightweight Axum mock of the monitoring
//! API listening on a random local port.
//!
//! These tests verify:
//! - Request paths and the `Api-Token` authorization header
//! - Response decoding, including the host list cache
//! - 401 and 429 mapping to distinguishable errors

mod common;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use common::init_rustls;
use oneagent_operator::dtclient::{DtClient, DtClientError, DtClientOptions, DtHttpClient};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const API_TOKEN: &str = "api-token";
const PAAS_TOKEN: &str = "paas-token";

#[derive(Default)]
struct MockState {
    /// Status every endpoint answers with instead of its payload
    fail_with: Mutex<Option<StatusCode>>,
    host_requests: AtomicUsize,
}

type AppState = Arc<MockState>;

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({"error": {"code": status.as_u16(), "message": message}})),
    )
        .into_response()
}

/// Reject requests lacking the expected token, or fail as configured
fn check(state: &MockState, headers: &HeaderMap, token: &str) -> Option<Response> {
    if let Some(status) = *state.fail_with.lock().unwrap() {
        return Some(error_response(status, "scripted failure"));
    }
    let expected = format!("Api-Token {token}");
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    (!authorized).then(|| error_response(StatusCode::UNAUTHORIZED, "Token Authentication failed"))
}

async fn latest_version(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(response) = check(&state, &headers, PAAS_TOKEN) {
        return response;
    }
    Json(json!({"latestAgentVersion": "1.187.0.20200101-120000"})).into_response()
}

async fn hosts(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(response) = check(&state, &headers, API_TOKEN) {
        return response;
    }
    state.host_requests.fetch_add(1, Ordering::SeqCst);
    Json(json!([
        {
            "ipAddresses": ["10.0.0.1"],
            "agentVersion": {"major": 1, "minor": 187, "revision": 0, "timestamp": "20200101-120000"}
        },
        {
            "ipAddresses": ["10.0.0.2"]
        }
    ]))
    .into_response()
}

#[derive(Deserialize)]
struct TokenLookup {
    token: String,
}

/// Known tokens answer with their own scopes; a lookup must authenticate with
/// the token it asks about
async fn token_lookup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<TokenLookup>,
) -> Response {
    if let Some(response) = check(&state, &headers, &body.token) {
        return response;
    }
    match body.token.as_str() {
        API_TOKEN => Json(json!({"scopes": ["DataExport", "LogExport"]})).into_response(),
        PAAS_TOKEN => Json(json!({"scopes": ["InstallerDownload"]})).into_response(),
        _ => error_response(StatusCode::UNAUTHORIZED, "Token Authentication failed"),
    }
}

async fn connection_info(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(response) = check(&state, &headers, PAAS_TOKEN) {
        return response;
    }
    Json(json!({
        "tenantUUID": "abc12345",
        "communicationEndpoints": ["https://ag.example.com:9999/communication", "not a url"]
    }))
    .into_response()
}

/// Start the mock and return its API URL plus the shared state
async fn start_mock_server() -> (String, AppState) {
    init_rustls();
    let state = AppState::default();
    let app = Router::new()
        .route(
            "/api/v1/deployment/installer/agent/unix/default/latest/metainfo",
            get(latest_version),
        )
        .route("/api/v1/entity/infrastructure/hosts", get(hosts))
        .route("/api/v1/tokens/lookup", post(token_lookup))
        .route(
            "/api/v1/deployment/installer/agent/connectioninfo",
            get(connection_info),
        )
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/api"), state)
}

fn client(api_url: &str, api_token: &str) -> DtHttpClient {
    DtHttpClient::new(DtClientOptions {
        api_url: api_url.to_string(),
        api_token: api_token.to_string(),
        paas_token: PAAS_TOKEN.to_string(),
        ..DtClientOptions::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_latest_agent_version() {
    let (api_url, _state) = start_mock_server().await;
    let version = client(&api_url, API_TOKEN)
        .get_latest_agent_version("unix", "default")
        .await
        .unwrap();
    assert_eq!(version, "1.187.0.20200101-120000");
}

#[tokio::test]
async fn test_latest_agent_version_rejects_empty_arguments() {
    let (api_url, _state) = start_mock_server().await;
    let err = client(&api_url, API_TOKEN)
        .get_latest_agent_version("", "default")
        .await
        .unwrap_err();
    assert!(matches!(err, DtClientError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_agent_version_for_ip_uses_cached_host_list() {
    let (api_url, state) = start_mock_server().await;
    let client = client(&api_url, API_TOKEN);

    assert_eq!(
        client.get_agent_version_for_ip("10.0.0.1").await.unwrap(),
        "1.187.0.20200101-120000"
    );
    let err = client.get_agent_version_for_ip("10.0.0.2").await.unwrap_err();
    assert!(matches!(err, DtClientError::VersionUnset(_)));
    let err = client.get_agent_version_for_ip("10.0.0.9").await.unwrap_err();
    assert!(matches!(err, DtClientError::HostNotFound(_)));

    assert_eq!(state.host_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_token_scopes() {
    let (api_url, _state) = start_mock_server().await;
    let client = client(&api_url, API_TOKEN);

    let scopes = client.get_token_scopes(API_TOKEN).await.unwrap();
    assert!(scopes.contains("DataExport"));
    assert!(!scopes.contains("InstallerDownload"));

    let scopes = client.get_token_scopes(PAAS_TOKEN).await.unwrap();
    assert!(scopes.contains("InstallerDownload"));
    assert!(!scopes.contains("DataExport"));
}

#[tokio::test]
async fn test_connection_info_skips_unparsable_endpoints() {
    let (api_url, _state) = start_mock_server().await;
    let info = client(&api_url, API_TOKEN).get_connection_info().await.unwrap();

    assert_eq!(info.tenant_uuid, "abc12345");
    assert_eq!(info.communication_hosts.len(), 1);
    let host = &info.communication_hosts[0];
    assert_eq!(host.host, "ag.example.com");
    assert_eq!(host.port, 9999);
}

#[tokio::test]
async fn test_wrong_token_is_unauthorized() {
    let (api_url, _state) = start_mock_server().await;
    let err = client(&api_url, API_TOKEN)
        .get_token_scopes("wrong-token")
        .await
        .unwrap_err();
    assert!(err.is_unauthorized(), "expected unauthorized, got {err:?}");
    assert!(!err.is_rate_limited());
}

#[tokio::test]
async fn test_token_lookup_is_independent_of_api_token() {
    let (api_url, _state) = start_mock_server().await;
    let client = client(&api_url, "revoked-api-token");

    let scopes = client.get_token_scopes(PAAS_TOKEN).await.unwrap();
    assert!(scopes.contains("InstallerDownload"));
    assert!(client.get_token_scopes("revoked-api-token").await.unwrap_err().is_unauthorized());
}

#[tokio::test]
async fn test_too_many_requests_is_rate_limited() {
    let (api_url, state) = start_mock_server().await;
    *state.fail_with.lock().unwrap() = Some(StatusCode::TOO_MANY_REQUESTS);

    let err = client(&api_url, API_TOKEN)
        .get_agent_version_for_ip("10.0.0.1")
        .await
        .unwrap_err();
    assert!(err.is_rate_limited(), "expected rate limited, got {err:?}");
}

#[tokio::test]
async fn test_server_error_keeps_code_and_message() {
    let (api_url, state) = start_mock_server().await;
    *state.fail_with.lock().unwrap() = Some(StatusCode::BAD_GATEWAY);

    let err = client(&api_url, API_TOKEN).get_connection_info().await.unwrap_err();
    assert!(
        matches!(err, DtClientError::Server { code: 502, ref message } if message == "scripted failure"),
        "got {err:?}"
    );
}
