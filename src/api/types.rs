//! HTTP response types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::session::SessionInfo;

/// Error body returned by every HTTP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "AUTH_REQUIRED").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// A [`RelayError`] on its way to an HTTP client.
#[derive(Debug)]
pub struct ApiError(pub RelayError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            RelayError::AuthRequired | RelayError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            RelayError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            RelayError::InvalidInput(_) | RelayError::InvalidDimensions { .. } => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::new(self.0.code(), self.0.to_string());
        (self.status(), Json(body)).into_response()
    }
}

/// One session in a listing. Resumption tokens are never included.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub client_terminal_id: String,
    pub session_id: String,
    pub pid: u32,
    pub attached: bool,
    pub idle_seconds: u64,
    pub age_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

impl From<SessionInfo> for SessionSummary {
    fn from(info: SessionInfo) -> Self {
        Self {
            client_terminal_id: info.terminal_id,
            session_id: info.session_id.to_string(),
            pid: info.pid,
            attached: info.attached,
            idle_seconds: info.idle.as_secs(),
            age_seconds: info.age.as_secs(),
            cwd: info.cwd,
        }
    }
}

/// Response for `GET /api/v1/sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSessionsResponse {
    pub identity: String,
    pub sessions: Vec<SessionSummary>,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;
    use std::time::Duration;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(ApiError(RelayError::AuthRequired).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError(RelayError::AuthFailed("x".into())).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError(RelayError::SessionNotFound("u/t".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(RelayError::LockPoisoned).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_response_body() {
        let err = ErrorResponse::new("AUTH_REQUIRED", "authentication required");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("AUTH_REQUIRED"));
        assert!(json.contains("authentication required"));
    }

    #[test]
    fn test_summary_is_camel_case() {
        let summary = SessionSummary::from(SessionInfo {
            terminal_id: "t1".into(),
            session_id: SessionId::from_raw(1),
            pid: 42,
            attached: false,
            idle: Duration::from_secs(5),
            age: Duration::from_secs(60),
            cwd: None,
        });
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["clientTerminalId"], "t1");
        assert_eq!(json["sessionId"], "sess-00000001");
        assert_eq!(json["idleSeconds"], 5);
        assert_eq!(json["ageSeconds"], 60);
        assert!(json.get("cwd").is_none());
    }
}
