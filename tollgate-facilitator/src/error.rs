//! HTTP error mapping for the facilitator API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tollgate::error::EngineError;

/// Errors surfaced by the facilitator's HTTP handlers.
///
/// Domain verdicts (invalid payment, failed settlement) are 200 responses
/// with negative bodies; these errors are only for requests the engine
/// could not answer at all.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request body or the embedded payment header could not be
    /// decoded. Nothing reached the engine.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The engine could not produce a verdict. No payment state changed;
    /// the caller may retry.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Malformed(_) => StatusCode::BAD_REQUEST,
            Self::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
