use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::messages::MessageError;

/// Errors produced by the callback listener.
///
/// Implements [`IntoResponse`] so handlers can return it directly and
/// remote jobs get a consistent JSON error body.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The listener socket could not be bound. Fatal at startup.
    #[error("Failed to bind callback listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The request body could not be interpreted.
    #[error(transparent)]
    Malformed(#[from] MessageError),

    /// Neither the header nor the body carried a correlation key.
    #[error("Callback carries no correlation key")]
    MissingCorrelationKey,
}

impl IntoResponse for ListenerError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ListenerError::Malformed(_) | ListenerError::MissingCorrelationKey => {
                (StatusCode::BAD_REQUEST, "MALFORMED_CALLBACK")
            }
            ListenerError::Bind { .. } => {
                tracing::error!(error = %self, "Listener error surfaced to a request");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let body = json!({
            "error": self.to_string(),
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
