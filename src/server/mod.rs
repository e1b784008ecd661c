//! # HTTP Server
//!
//! Health probes, Prometheus metrics and the token refresh endpoint.
//!
//! | Route | Method | Purpose |
//! |---|---|---|
//! | `/healthz` | GET | liveness, always `200` once listening |
//! | `/readyz` | GET | `200` once the token manager is installed |
//! | `/metrics` | GET | Prometheus text exposition |
//! | `/api/v1/token/refresh` | POST | exchange `{"jweToken"}` for a renewed token |

use crate::jwe::{TokenError, TokenManager};
use crate::observability::metrics;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// State shared between the server and the bootstrap
#[derive(Default)]
pub struct ServerState {
    /// Set by [`start_server`] once the listener is bound
    pub is_listening: AtomicBool,
    token_manager: OnceLock<Arc<dyn TokenManager>>,
}

impl fmt::Debug for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerState")
            .field("is_listening", &self.is_listening.load(Ordering::Relaxed))
            .field("is_ready", &self.is_ready())
            .finish()
    }
}

impl ServerState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the token API available. Only the first installation takes effect.
    pub fn install_token_manager(&self, token_manager: Arc<dyn TokenManager>) -> bool {
        self.token_manager.set(token_manager).is_ok()
    }

    pub fn token_manager(&self) -> Option<&Arc<dyn TokenManager>> {
        self.token_manager.get()
    }

    pub fn is_ready(&self) -> bool {
        self.token_manager.get().is_some()
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    #[serde(rename = "jweToken", default)]
    pub jwe_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshResponse {
    #[serde(rename = "jweToken")]
    pub jwe_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub reason: String,
    pub message: String,
}

fn error_response(status: StatusCode, reason: &str, message: String) -> Response {
    (
        status,
        Json(ErrorResponse {
            status: status.as_u16(),
            reason: reason.to_string(),
            message,
        }),
    )
        .into_response()
}

impl IntoResponse for TokenError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        error_response(status, self.reason(), self.to_string())
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<Arc<ServerState>>) -> Response {
    if state.is_ready() {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics_handler() -> Response {
    match metrics::gather_text() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn refresh_token(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<RefreshRequest>,
) -> Response {
    let Some(token_manager) = state.token_manager() else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "MSG_SERVICE_UNAVAILABLE",
            "token manager is not initialized".to_string(),
        );
    };

    match token_manager.refresh(&request.jwe_token).await {
        Ok(jwe_token) => Json(RefreshResponse { jwe_token }).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Routes served by the HTTP server
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .route("/api/v1/token/refresh", post(refresh_token))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on `0.0.0.0:port` until the task is aborted
pub async fn start_server(port: u16, state: Arc<ServerState>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {addr}"))?;

    state.is_listening.store(true, Ordering::Relaxed);
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, router(state))
        .await
        .context("HTTP server terminated")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn send(state: Arc<ServerState>, request: Request<Body>) -> (StatusCode, String) {
        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_healthz() {
        let (status, body) = send(ServerState::new(), get_request("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_not_ready_without_token_manager() {
        let (status, _) = send(ServerState::new(), get_request("/readyz")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_refresh_unavailable_without_token_manager() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/token/refresh")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"jweToken":"abc"}"#))
            .unwrap();

        let (status, body) = send(ServerState::new(), request).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let error: ErrorResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(error.status, 503);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_responds() {
        let (status, _) = send(ServerState::new(), get_request("/metrics")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn test_token_errors_render_reason() {
        let response = TokenError::Expired.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = TokenError::NoTokenProvided.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
