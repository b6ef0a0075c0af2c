//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become a JSON body
//! `{"error": "...", "code": "..."}` with a status matching the failure class.
//!
//! Engine stderr, file paths and other internals are logged here and never
//! returned to the caller.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use docconv_core::ConversionError;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// All errors that can occur in the docconv-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from the conversion core.
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Status code and stable error class for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ServerError::Conversion(e) => {
                let status = match e {
                    ConversionError::NoFileProvided | ConversionError::InvalidFilterHint { .. } => {
                        StatusCode::BAD_REQUEST
                    }
                    ConversionError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                    ConversionError::ConversionTimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.code())
            }
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ServerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let client_message = match &self {
            ServerError::NotFound(m) | ServerError::BadRequest(m) => m.clone(),
            ServerError::Conversion(e) => client_message(e),
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                "An unexpected server error occurred.".to_owned()
            }
        };
        (status, Json(json!({ "error": client_message, "code": code }))).into_response()
    }
}

/// Human-readable message for a conversion failure. Internals stay in the log.
fn client_message(e: &ConversionError) -> String {
    match e {
        ConversionError::NoFileProvided => "No file uploaded.".to_owned(),
        ConversionError::PayloadTooLarge { limit_bytes } => format!(
            "File too large. Max size is {}MB.",
            limit_bytes / (1024 * 1024)
        ),
        ConversionError::InvalidFilterHint { .. } => {
            "Invalid import filter. Use letters, digits, '_', ':', '.', '-' or spaces.".to_owned()
        }
        ConversionError::ConversionTimedOut { after } => {
            warn!(after_secs = after.as_secs(), "conversion timed out");
            "Conversion process timed out or ran out of memory.".to_owned()
        }
        ConversionError::ConversionProcessFailed { reason } => {
            error!(reason = %reason, "conversion process failed");
            "File conversion failed. The file may be unsupported or corrupt.".to_owned()
        }
        ConversionError::OutputArtifactMissing { extension } => {
            error!(extension = %extension, "conversion output missing");
            "Conversion succeeded, but the output file could not be found.".to_owned()
        }
        other => {
            error!(error = %other, "conversion request failed");
            "An unexpected server error occurred.".to_owned()
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use http_body_util::BodyExt;

    use super::*;

    async fn body_json(err: ServerError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[tokio::test]
    async fn failure_classes_map_to_distinct_statuses() {
        let cases = [
            (ConversionError::NoFileProvided, StatusCode::BAD_REQUEST),
            (
                ConversionError::PayloadTooLarge {
                    limit_bytes: 25 * 1024 * 1024,
                },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                ConversionError::ConversionTimedOut {
                    after: Duration::from_secs(120),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                ConversionError::ConversionProcessFailed {
                    reason: "exit 1".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            let code = error.code();
            let (status, body) = body_json(ServerError::from(error)).await;
            assert_eq!(status, expected);
            assert_eq!(body["code"], code);
        }
    }

    #[tokio::test]
    async fn too_large_message_names_the_limit() {
        let (_, body) = body_json(
            ConversionError::PayloadTooLarge {
                limit_bytes: 25 * 1024 * 1024,
            }
            .into(),
        )
        .await;
        assert_eq!(body["error"], "File too large. Max size is 25MB.");
    }

    #[tokio::test]
    async fn engine_details_are_not_exposed() {
        let (_, body) = body_json(
            ConversionError::ConversionProcessFailed {
                reason: "failed to start '/opt/secret/soffice'".into(),
            }
            .into(),
        )
        .await;
        let message = body["error"].as_str().unwrap_or_default();
        assert!(!message.contains("/opt/secret"));
    }
}
