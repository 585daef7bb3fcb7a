//! Error responses for HTTP handlers.
//!
//! Every failure leaves the API as `{"code", "message", "details"?}` so
//! callers can branch on `code` without parsing messages.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

use crate::error::Error;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(self, details: Value) -> Self {
        Self {
            details: Some(details),
            ..self
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// The request parsed but its content was rejected.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "BAD_GATEWAY", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code,
            message: &self.message,
            details: self.details.as_ref(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::ChannelNotFound(key) => Self::not_found(format!("Channel '{}' not found", key)),
            Error::Validation(msg) => Self::validation(msg),
            Error::Cue(cue) => Self::validation(cue.to_string()),
            Error::Upstream(msg) => {
                warn!(error = %msg, "Upstream failure");
                Self::bad_gateway(msg)
            }
            Error::Http(http) => {
                warn!(error = %http, "Upstream request failed");
                Self::bad_gateway("Upstream request failed")
            }
            Error::Timeout(msg) | Error::ActorUnavailable(msg) => Self::service_unavailable(msg),
            other => {
                error!(error = %other, "Unhandled error in request");
                Self::internal("An unexpected error occurred")
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::channel_not_found("acme/news"), StatusCode::NOT_FOUND),
            (Error::Validation("bad seconds".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (Error::upstream("origin returned 500"), StatusCode::BAD_GATEWAY),
            (Error::Timeout("snapshot".into()), StatusCode::SERVICE_UNAVAILABLE),
            (Error::ActorUnavailable("stopped".into()), StatusCode::SERVICE_UNAVAILABLE),
            (Error::other("boom"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_not_found_names_channel() {
        let err = ApiError::from(Error::channel_not_found("acme/news"));
        assert_eq!(err.code, "NOT_FOUND");
        assert!(err.message.contains("acme/news"));
    }

    #[tokio::test]
    async fn test_response_body() {
        let response = ApiError::validation("Invalid cue")
            .with_details(serde_json::json!({"field": "payload"}))
            .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert_eq!(body["message"], "Invalid cue");
        assert_eq!(body["details"]["field"], "payload");
    }

    #[tokio::test]
    async fn test_details_omitted_when_absent() {
        let response = ApiError::not_found("gone").into_response();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body.get("details").is_none());
    }
}
