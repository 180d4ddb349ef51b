//! Axum-based HTTP gateway for issuing and rotating credential pairs.
//!
//! - `GET /tokens?id=<identity>` issues a fresh pair
//! - `GET /refresh` rotates the pair named by the `Authorization` header,
//!   whose value is `base64("Bearer <refresh>")`
//! - `GET /health` liveness probe
//!
//! Refresh artifacts travel base64-encoded in both directions. Request body
//! size and request duration are bounded by tower-http layers.

use crate::auth::{AuthError, Authenticator, HmacSigner, RotationPolicy, TokenPair};
use crate::config::Config;
use crate::notify;
use crate::store;
use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB). No route reads a body.
pub const MAX_BODY_SIZE: usize = 65_536;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<Authenticator>,
    /// Take the caller address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only safe behind a proxy that overwrites those headers.
    pub trust_forwarded_headers: bool,
}

/// Which flow produced an error; identity lookups fail differently on each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Issue,
    Refresh,
}

type AuthResponse = (StatusCode, Json<serde_json::Value>);

/// Build the authenticator and its collaborators from config.
pub fn build_authenticator(config: &Config) -> Result<Authenticator> {
    let signer = HmacSigner::new(config.signing_key_bytes()?)?;
    let store = store::create_user_store(&config.store)?;
    let notifier = notify::create_notifier(&config.notifier)?;
    tracing::info!(
        store = store.name(),
        notifier = notifier.name(),
        "Authenticator ready"
    );
    Ok(Authenticator::new(
        store,
        notifier,
        Arc::new(signer),
        RotationPolicy::from_config(&config.rotation),
    ))
}

pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/tokens", get(handle_tokens))
        .route("/refresh", get(handle_refresh))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
}

/// Run the HTTP gateway until Ctrl-C.
pub async fn run_gateway(config: Config) -> Result<()> {
    config.validate()?;

    let authenticator = build_authenticator(&config)?;
    let state = AppState {
        authenticator: Arc::new(authenticator),
        trust_forwarded_headers: config.gateway.trust_forwarded_headers,
    };
    let app = router(
        state,
        Duration::from_secs(config.gateway.request_timeout_secs),
    );

    let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                config.gateway.host, config.gateway.port
            )
        })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "Gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET /health
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
pub struct TokensQuery {
    pub id: Option<String>,
}

/// GET /tokens?id=<identity> — issue a fresh pair.
async fn handle_tokens(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<TokensQuery>,
) -> AuthResponse {
    let Some(id) = query.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) else {
        tracing::info!("Token pair request without id");
        return error_body(
            StatusCode::BAD_REQUEST,
            "You must provide user id in query params",
        );
    };

    let origin = caller_address(&state, &headers, peer);
    tracing::info!(identity = id, origin = %origin, "Token pair request");

    match state.authenticator.issue(id, &origin).await {
        Ok(pair) => pair_body(&pair),
        Err(e) => error_response(Flow::Issue, &e),
    }
}

/// GET /refresh — rotate using the refresh artifact in `Authorization`.
async fn handle_refresh(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> AuthResponse {
    let raw = match extract_refresh(&headers) {
        Ok(raw) => raw,
        Err(resp) => return resp,
    };

    let origin = caller_address(&state, &headers, peer);
    tracing::info!(origin = %origin, "Refresh request");

    match state.authenticator.refresh(&raw, &origin).await {
        Ok(pair) => pair_body(&pair),
        Err(e) => error_response(Flow::Refresh, &e),
    }
}

// ── Helpers ─────────────────────────────────────────────────────

/// Decode `Authorization: base64("Bearer <refresh>")`. The inner `Bearer `
/// prefix is optional.
fn extract_refresh(headers: &HeaderMap) -> Result<String, AuthResponse> {
    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            error_body(
                StatusCode::BAD_REQUEST,
                "You must provide Authorization header",
            )
        })?;

    let decoded = STANDARD
        .decode(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| {
            tracing::info!("Refresh request with undecodable Authorization header");
            error_body(
                StatusCode::BAD_REQUEST,
                "Authorization header must be base64-encoded",
            )
        })?;

    let decoded = decoded.trim();
    let raw = decoded.strip_prefix("Bearer ").unwrap_or(decoded);
    Ok(raw.to_owned())
}

/// Caller address: forwarded headers when trusted, else the peer IP.
fn caller_address(state: &AppState, headers: &HeaderMap, peer: SocketAddr) -> String {
    if state.trust_forwarded_headers {
        if let Some(forwarded) = forwarded_address(headers) {
            return forwarded;
        }
    }
    peer.ip().to_string()
}

fn forwarded_address(headers: &HeaderMap) -> Option<String> {
    for header_name in ["X-Forwarded-For", "X-Real-IP"] {
        if let Some(value) = headers.get(header_name).and_then(|v| v.to_str().ok()) {
            let first = value.split(',').next().unwrap_or("").trim();
            if !first.is_empty() {
                return Some(first.to_owned());
            }
        }
    }
    None
}

/// HTTP status for an authenticator error.
pub fn status_for(flow: Flow, err: &AuthError) -> StatusCode {
    match (flow, err) {
        (Flow::Issue, AuthError::NoSuchIdentity) => StatusCode::NOT_FOUND,
        (Flow::Refresh, AuthError::NoSuchIdentity)
        | (_, AuthError::InvalidRefresh | AuthError::WrongRefresh) => StatusCode::FORBIDDEN,
        (_, AuthError::RotationPersistFailed) => StatusCode::SERVICE_UNAVAILABLE,
        (_, AuthError::Internal(_)) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(flow: Flow, err: &AuthError) -> AuthResponse {
    let message = match err {
        AuthError::NoSuchIdentity => "No such user",
        AuthError::InvalidRefresh => "Invalid refresh token",
        AuthError::WrongRefresh => "Use last refresh token",
        AuthError::RotationPersistFailed => "Could not rotate tokens, try again",
        AuthError::Internal(e) => {
            tracing::error!(flow = ?flow, "Authenticator failure: {e:#}");
            "Internal server error"
        }
    };
    (
        status_for(flow, err),
        Json(serde_json::json!({
            "error": message,
            "code": err.code(),
            "retryable": err.is_transient(),
        })),
    )
}

fn error_body(status: StatusCode, message: &str) -> AuthResponse {
    (status, Json(serde_json::json!({"error": message})))
}

fn pair_body(pair: &TokenPair) -> AuthResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "access_token": pair.access,
            "refresh_token": STANDARD.encode(&pair.refresh),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Notifier;
    use crate::store::MemoryUserStore;
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use axum::response::IntoResponse;
    use http_body_util::BodyExt;
    use parking_lot::Mutex;

    const KEY: &[u8] = b"gateway-test-signing-key-0123456789abcdef";

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, address: &str, message: &str) -> anyhow::Result<()> {
            self.sent.lock().push((address.to_owned(), message.to_owned()));
            Ok(())
        }
    }

    fn test_state(trust_forwarded_headers: bool) -> (AppState, Arc<RecordingNotifier>) {
        let store = Arc::new(MemoryUserStore::new());
        store.insert_user("u1", "u1@mail").unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let policy = RotationPolicy {
            digest_rounds: 1_000,
            ..RotationPolicy::default()
        };
        let authenticator = Authenticator::new(
            store,
            notifier.clone(),
            Arc::new(HmacSigner::new(KEY).unwrap()),
            policy,
        );
        let state = AppState {
            authenticator: Arc::new(authenticator),
            trust_forwarded_headers,
        };
        (state, notifier)
    }

    fn peer(ip: &str) -> ConnectInfo<SocketAddr> {
        ConnectInfo(format!("{ip}:40000").parse().unwrap())
    }

    fn auth_header(raw_refresh: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let value = STANDARD.encode(format!("Bearer {raw_refresh}"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());
        headers
    }

    async fn json_of(resp: AuthResponse) -> (StatusCode, serde_json::Value) {
        let response = resp.into_response();
        let status = response.status();
        let payload = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&payload).unwrap())
    }

    async fn issue(
        state: &AppState,
        id: Option<&str>,
        ip: &str,
    ) -> (StatusCode, serde_json::Value) {
        let query = TokensQuery {
            id: id.map(str::to_owned),
        };
        json_of(handle_tokens(State(state.clone()), peer(ip), HeaderMap::new(), Query(query)).await)
            .await
    }

    fn decode_refresh(body: &serde_json::Value) -> String {
        let encoded = body["refresh_token"].as_str().unwrap();
        String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap()
    }

    #[test]
    fn security_body_limit_is_64kb() {
        assert_eq!(MAX_BODY_SIZE, 65_536);
    }

    #[test]
    fn app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn status_mapping_per_flow() {
        assert_eq!(status_for(Flow::Issue, &AuthError::NoSuchIdentity), StatusCode::NOT_FOUND);
        assert_eq!(status_for(Flow::Refresh, &AuthError::NoSuchIdentity), StatusCode::FORBIDDEN);
        assert_eq!(status_for(Flow::Refresh, &AuthError::InvalidRefresh), StatusCode::FORBIDDEN);
        assert_eq!(status_for(Flow::Refresh, &AuthError::WrongRefresh), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(Flow::Refresh, &AuthError::RotationPersistFailed),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(Flow::Issue, &AuthError::Internal(anyhow::anyhow!("db down"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn forwarded_address_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", HeaderValue::from_static("10.0.0.1, 10.0.0.2"));
        assert_eq!(forwarded_address(&headers).as_deref(), Some("10.0.0.1"));

        let mut headers = HeaderMap::new();
        headers.insert("X-Real-IP", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(forwarded_address(&headers).as_deref(), Some("10.0.0.9"));

        assert!(forwarded_address(&HeaderMap::new()).is_none());
    }

    #[test]
    fn extract_refresh_accepts_optional_bearer_prefix() {
        assert_eq!(extract_refresh(&auth_header("abc.def.ghi")).unwrap(), "abc.def.ghi");

        let mut headers = HeaderMap::new();
        let value = STANDARD.encode("abc.def.ghi");
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());
        assert_eq!(extract_refresh(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn extract_refresh_trims_decoded_value() {
        let mut headers = HeaderMap::new();
        let value = STANDARD.encode("Bearer abc.def.ghi\n");
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());
        assert_eq!(extract_refresh(&headers).unwrap(), "abc.def.ghi");
    }

    #[tokio::test]
    async fn error_body_flags_transient_failures() {
        let (status, body) = json_of(error_response(
            Flow::Refresh,
            &AuthError::RotationPersistFailed,
        ))
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["retryable"], true);

        let (status, body) = json_of(error_response(Flow::Refresh, &AuthError::WrongRefresh)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["retryable"], false);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = handle_health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let payload = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(parsed["status"], "ok");
    }

    #[tokio::test]
    async fn tokens_returns_encoded_pair() {
        let (state, _notifier) = test_state(false);
        let (status, body) = issue(&state, Some("u1"), "1.2.3.4").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["access_token"].as_str().unwrap().split('.').count() == 3);
        assert_eq!(decode_refresh(&body).split('.').count(), 3);
    }

    #[tokio::test]
    async fn tokens_without_id_is_bad_request() {
        let (state, _notifier) = test_state(false);
        let (status, _) = issue(&state, None, "1.2.3.4").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = issue(&state, Some("  "), "1.2.3.4").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn tokens_for_unknown_user_is_not_found() {
        let (state, _notifier) = test_state(false);
        let (status, body) = issue(&state, Some("u2"), "1.2.3.4").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NO_SUCH_IDENTITY");
        assert_eq!(body["retryable"], false);
    }

    #[tokio::test]
    async fn refresh_accepts_header_encoded_with_trailing_newline() {
        let (state, _notifier) = test_state(false);
        let (_, body) = issue(&state, Some("u1"), "1.2.3.4").await;
        let refresh = decode_refresh(&body);

        let mut headers = HeaderMap::new();
        let value = STANDARD.encode(format!("Bearer {refresh}\n"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());
        let (status, _) =
            json_of(handle_refresh(State(state), peer("1.2.3.4"), headers).await).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn refresh_rotates_then_rejects_replay() {
        let (state, notifier) = test_state(false);
        let (_, body) = issue(&state, Some("u1"), "1.2.3.4").await;
        let refresh = decode_refresh(&body);

        let (status, _) = json_of(
            handle_refresh(State(state.clone()), peer("1.2.3.4"), auth_header(&refresh)).await,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = json_of(
            handle_refresh(State(state.clone()), peer("1.2.3.4"), auth_header(&refresh)).await,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Use last refresh token");
        assert!(notifier.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn refresh_without_header_is_bad_request() {
        let (state, _notifier) = test_state(false);
        let (status, _) =
            json_of(handle_refresh(State(state), peer("1.2.3.4"), HeaderMap::new()).await).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn refresh_with_undecodable_header_is_bad_request() {
        let (state, _notifier) = test_state(false);
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer %%%"));
        let (status, _) =
            json_of(handle_refresh(State(state), peer("1.2.3.4"), headers).await).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn refresh_with_garbage_is_forbidden() {
        let (state, _notifier) = test_state(false);
        let (status, body) = json_of(
            handle_refresh(State(state), peer("1.2.3.4"), auth_header("garbage")).await,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "INVALID_REFRESH");
    }

    #[tokio::test]
    async fn refresh_from_new_address_alerts_contact() {
        let (state, notifier) = test_state(false);
        let (_, body) = issue(&state, Some("u1"), "1.2.3.4").await;
        let refresh = decode_refresh(&body);

        let (status, _) = json_of(
            handle_refresh(State(state), peer("5.6.7.8"), auth_header(&refresh)).await,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let sent = notifier.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "u1@mail");
        assert_eq!(sent[0].1, "Auth from unknown IP address: 5.6.7.8");
    }

    #[tokio::test]
    async fn trusted_forwarded_header_sets_origin() {
        let (state, notifier) = test_state(true);
        let (_, body) = issue(&state, Some("u1"), "127.0.0.1").await;
        let refresh = decode_refresh(&body);

        let mut headers = auth_header(&refresh);
        headers.insert("X-Forwarded-For", HeaderValue::from_static("9.9.9.9"));
        let (status, _) =
            json_of(handle_refresh(State(state), peer("127.0.0.1"), headers).await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            notifier.sent.lock()[0].1,
            "Auth from unknown IP address: 9.9.9.9"
        );
    }

    #[tokio::test]
    async fn untrusted_forwarded_header_is_ignored() {
        let (state, notifier) = test_state(false);
        let (_, body) = issue(&state, Some("u1"), "127.0.0.1").await;
        let refresh = decode_refresh(&body);

        let mut headers = auth_header(&refresh);
        headers.insert("X-Forwarded-For", HeaderValue::from_static("9.9.9.9"));
        let (status, _) =
            json_of(handle_refresh(State(state), peer("127.0.0.1"), headers).await).await;
        assert_eq!(status, StatusCode::OK);
        assert!(notifier.sent.lock().is_empty());
    }
}
