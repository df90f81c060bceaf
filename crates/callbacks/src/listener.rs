//! HTTP endpoint receiving callbacks from remote jobs.
//!
//! [`CallbackListener::bind`] claims the socket before any job is
//! dispatched; [`CallbackListener::serve`] then runs until the supplied
//! [`CancellationToken`] fires.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use runcheck_core::CorrelationKey;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::ListenerError;
use crate::messages::{parse_payload, CallbackPayload};
use crate::registry::{CallbackRegistry, DeliveryOutcome};

/// Path remote jobs POST their events to.
pub const CALLBACK_PATH: &str = "/callback";

/// Request header carrying the correlation key.
pub const CORRELATION_HEADER: &str = "x-correlation-key";

/// Acknowledgement returned for every accepted callback.
#[derive(Debug, Serialize)]
pub struct CallbackAck {
    pub outcome: DeliveryOutcome,
}

/// Health check response payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Attempts still waiting for a terminal callback.
    pub pending: usize,
}

/// Build the listener router around a shared registry.
pub fn router(registry: Arc<CallbackRegistry>) -> Router {
    Router::new()
        .route(CALLBACK_PATH, post(receive_callback))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

/// POST /callback -- route one event to its pending attempt.
async fn receive_callback(
    State(registry): State<Arc<CallbackRegistry>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CallbackAck>, ListenerError> {
    let payload = parse_payload(&body).inspect_err(|e| {
        tracing::warn!(
            error = %e,
            raw = %String::from_utf8_lossy(&body),
            "Dropping malformed callback",
        );
    })?;

    let key = correlation_key(&headers, &payload).ok_or_else(|| {
        tracing::warn!(status = ?payload.status, "Dropping callback without correlation key");
        ListenerError::MissingCorrelationKey
    })?;

    let outcome = registry.deliver(&key, payload)?;
    Ok(Json(CallbackAck { outcome }))
}

/// GET /health -- liveness plus the number of pending attempts.
async fn health_check(State(registry): State<Arc<CallbackRegistry>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        pending: registry.pending_count(),
    })
}

/// The header wins over the body field when both are present.
fn correlation_key(headers: &HeaderMap, payload: &CallbackPayload) -> Option<CorrelationKey> {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(CorrelationKey::from_wire)
        .or_else(|| {
            payload
                .correlation_key
                .as_deref()
                .filter(|value| !value.is_empty())
                .map(CorrelationKey::from_wire)
        })
}

/// A bound, not yet serving, callback endpoint.
pub struct CallbackListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl CallbackListener {
    /// Bind the listener socket.
    pub async fn bind(addr: SocketAddr) -> Result<Self, ListenerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind { addr, source })?;

        tracing::info!(%local_addr, "Callback listener bound");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve callbacks until `cancel` is triggered.
    pub async fn serve(
        self,
        registry: Arc<CallbackRegistry>,
        cancel: CancellationToken,
    ) -> std::io::Result<()> {
        let addr = self.local_addr;
        axum::serve(self.listener, router(registry))
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;
        tracing::info!(%addr, "Callback listener stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use runcheck_core::TestCombination;
    use tower::ServiceExt;

    use super::*;

    fn key(attempt: u32) -> CorrelationKey {
        let combination = TestCombination::new("X", "chrome", "plan1").unwrap();
        CorrelationKey::new(&combination, attempt)
    }

    fn callback_request(key: Option<&CorrelationKey>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(CALLBACK_PATH)
            .header("content-type", "application/json");
        if let Some(key) = key {
            builder = builder.header(CORRELATION_HEADER, key.as_str());
        }
        builder.body(Body::from(body.to_owned())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn partial_then_completed_resolves_attempt() {
        let registry = Arc::new(CallbackRegistry::new());
        let registration = registry.register(key(0)).unwrap();
        let app = router(Arc::clone(&registry));

        let response = app
            .clone()
            .oneshot(callback_request(
                Some(&key(0)),
                r#"{"status":"RUNNING_PARTIAL","rowId":1,"responseValues":["alpha"]}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["outcome"], "accumulated");

        let response = app
            .oneshot(callback_request(
                Some(&key(0)),
                r#"{"status":"COMPLETED","logUrl":"https://ci.example/runs/5"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["outcome"], "resolved");

        let result = registration.completion().await.unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.log_url.as_deref(), Some("https://ci.example/runs/5"));
    }

    #[tokio::test]
    async fn event_for_other_key_does_not_resolve_registration() {
        let registry = Arc::new(CallbackRegistry::new());
        let registration = registry.register(key(0)).unwrap();

        let response = router(Arc::clone(&registry))
            .oneshot(callback_request(Some(&key(7)), r#"{"status":"COMPLETED"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["outcome"], "ignored");
        assert!(registry.is_pending(&key(0)));
        assert!(
            tokio::time::timeout(Duration::from_millis(50), registration.completion())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn body_field_is_used_when_header_missing() {
        let registry = Arc::new(CallbackRegistry::new());
        let registration = registry.register(key(2)).unwrap();

        let body = format!(r#"{{"status":"COMPLETED","correlationKey":"{}"}}"#, key(2));
        let response = router(Arc::clone(&registry))
            .oneshot(callback_request(None, &body))
            .await
            .unwrap();

        assert_eq!(body_json(response).await["outcome"], "resolved");
        assert!(registration.completion().await.is_ok());
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let registry = Arc::new(CallbackRegistry::new());
        let _registration = registry.register(key(0)).unwrap();

        let response = router(Arc::clone(&registry))
            .oneshot(callback_request(Some(&key(0)), "{not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "MALFORMED_CALLBACK");
        assert!(registry.is_pending(&key(0)));
    }

    #[tokio::test]
    async fn missing_key_is_rejected() {
        let registry = Arc::new(CallbackRegistry::new());
        let response = router(registry)
            .oneshot(callback_request(None, r#"{"status":"COMPLETED"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["code"], "MALFORMED_CALLBACK");
        assert!(json["error"].as_str().unwrap().contains("correlation key"));
    }

    #[tokio::test]
    async fn health_reports_pending_attempts() {
        let registry = Arc::new(CallbackRegistry::new());
        let _a = registry.register(key(0)).unwrap();
        let _b = registry.register(key(1)).unwrap();

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = router(registry).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["pending"], 2);
    }

    #[tokio::test]
    async fn serve_stops_on_cancellation() {
        let listener = CallbackListener::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        assert_ne!(listener.local_addr().port(), 0);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            listener.serve(Arc::new(CallbackRegistry::new()), cancel.clone()),
        );
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("serve should exit after cancellation")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn binding_a_taken_port_fails() {
        let first = CallbackListener::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let taken = first.local_addr();

        let err = CallbackListener::bind(taken).await.err().unwrap();
        assert!(matches!(err, ListenerError::Bind { addr, .. } if addr == taken));
    }
}
