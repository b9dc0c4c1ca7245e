//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use colloquy_types::error::ChatError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Errors surfaced by the conversation pipeline.
    Chat(ChatError),
    /// Malformed request input (bad path parameter, bad body).
    Validation(String),
    /// Generic internal error.
    Internal(String),
}

impl From<ChatError> for AppError {
    fn from(e: ChatError) -> Self {
        AppError::Chat(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            AppError::Chat(e @ ChatError::LockTimeout) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "CONVERSATION_BUSY",
                e.to_string(),
                None,
            ),
            AppError::Chat(
                e @ ChatError::QuotaExceeded {
                    window,
                    limit,
                    reset_at,
                },
            ) => (
                StatusCode::TOO_MANY_REQUESTS,
                "QUOTA_EXCEEDED",
                e.to_string(),
                Some(json!({
                    "window": window.to_string(),
                    "limit": limit,
                    "reset_at": reset_at.to_rfc3339(),
                })),
            ),
            // Per-provider failure reasons go to the structured log when the
            // router exhausts the chain, never into the response body.
            AppError::Chat(e @ ChatError::AllProvidersFailed(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "NO_PROVIDER_AVAILABLE",
                e.to_string(),
                None,
            ),
            AppError::Chat(e @ ChatError::Unauthorized) => {
                (StatusCode::FORBIDDEN, "FORBIDDEN", e.to_string(), None)
            }
            AppError::Chat(e @ ChatError::UnknownProvider(_)) => (
                StatusCode::BAD_REQUEST,
                "UNKNOWN_PROVIDER",
                e.to_string(),
                None,
            ),
            AppError::Chat(e @ ChatError::InvalidRequest(_)) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                e.to_string(),
                None,
            ),
            AppError::Chat(e @ ChatError::Persistence(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                e.to_string(),
                None,
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                None,
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
                None,
            ),
        };

        let mut error = json!({
            "code": code,
            "message": message,
        });
        if let Some(details) = details {
            error["details"] = details;
        }

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [error]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AppError::Chat(ChatError::LockTimeout), StatusCode::SERVICE_UNAVAILABLE),
            (AppError::Chat(ChatError::Unauthorized), StatusCode::FORBIDDEN),
            (
                AppError::Chat(ChatError::UnknownProvider("x".to_string())),
                StatusCode::BAD_REQUEST,
            ),
            (AppError::Validation("bad key".to_string()), StatusCode::BAD_REQUEST),
            (AppError::Internal("boom".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn test_quota_details_carry_reset_time() {
        let reset_at = chrono::Utc::now();
        let error = AppError::Chat(ChatError::QuotaExceeded {
            window: colloquy_types::error::QuotaWindow::Hourly,
            limit: 40,
            reset_at,
        });
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
