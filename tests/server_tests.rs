//! # HTTP Server Integration Tests
//!
//! The router with a bootstrapped token manager installed:
//! - Readiness once the token manager is available
//! - Token refresh success and error mapping

#[macro_use]
mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use common::*;
use dashboard_auth::runtime::bootstrap;
use dashboard_auth::server::{router, ErrorResponse, RefreshResponse, ServerState};
use dashboard_auth::sync::Overwatch;
use dashboard_auth::{AuthInfo, TokenManager};
use std::sync::Arc;
use tower::ServiceExt;

async fn ready_state() -> (Arc<ServerState>, Arc<dyn TokenManager>, Arc<Overwatch>) {
    let store = Arc::new(Store::new());
    let overwatch = Overwatch::new(supervisor_config());
    let token_manager = bootstrap(store, &auth_config(900), &overwatch).await.unwrap();
    let state = ServerState::new();
    assert!(state.install_token_manager(Arc::clone(&token_manager)));
    (state, token_manager, overwatch)
}

async fn post_refresh(state: Arc<ServerState>, body: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/token/refresh")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn test_ready_after_token_manager_installed() {
    let (state, _, overwatch) = ready_state().await;

    let request = Request::builder().uri("/readyz").body(Body::empty()).unwrap();
    let response = router(state).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    overwatch.shutdown();
}

#[tokio::test]
async fn test_refresh_returns_renewed_token() {
    let (state, tokens, overwatch) = ready_state().await;
    let auth_info = AuthInfo::bearer("abc");
    let token = tokens.generate(&auth_info).unwrap();

    let (status, body) = post_refresh(state, &serde_json::json!({ "jweToken": token }).to_string()).await;

    assert_eq!(status, StatusCode::OK);
    let renewed: RefreshResponse = serde_json::from_str(&body).unwrap();
    assert_ne!(renewed.jwe_token, token);
    assert_eq!(tokens.decrypt(&renewed.jwe_token).await.unwrap(), auth_info);
    overwatch.shutdown();
}

#[tokio::test]
async fn test_refresh_with_garbage_token_is_unauthorized() {
    let (state, _, overwatch) = ready_state().await;

    let (status, body) = post_refresh(state, r#"{"jweToken":"a.b.c.d.e"}"#).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let error: ErrorResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(error.status, 401);
    assert_eq!(error.reason, "MSG_LOGIN_UNAUTHORIZED_ERROR");
    overwatch.shutdown();
}

#[tokio::test]
async fn test_refresh_without_token_is_bad_request() {
    let (state, _, overwatch) = ready_state().await;

    let (status, body) = post_refresh(state, "{}").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: ErrorResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(error.reason, "MSG_INVALID_INPUT_ERROR");
    overwatch.shutdown();
}
