use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error envelope returned by every endpoint on failure.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "success": false,
    "error": "Bad Request",
    "code": "validation_error",
    "message": "Validation failed",
    "errors": ["Postal code must be 6 digits and cannot start with 0"],
    "request_id": "req-abc123xyz",
    "timestamp": "2026-01-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    pub success: bool,
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// Every failed validation reason, when the failure is a validation failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

/// Failures talking to the remote payment gateway.
///
/// The checkout saga compensates on both variants; the split exists so callers and
/// operators can tell a bad request apart from an outage.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The gateway answered with a 4xx (bad amount, bad credentials, ...).
    #[error("gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Network failure, timeout or 5xx.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.is_client_error() => GatewayError::Rejected {
                status: status.as_u16(),
                message: err.to_string(),
            },
            _ => GatewayError::Unavailable(err.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Database call timed out after {0:?}")]
    DatabaseTimeout(Duration),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error("Malformed request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Payment signature verification failed")]
    SignatureMismatch,

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    /// Convenience constructor for a single validation reason.
    pub fn validation(reason: impl Into<String>) -> Self {
        ServiceError::ValidationFailed(vec![reason.into()])
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationFailed(_) | Self::BadRequest(_) | Self::SignatureMismatch => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::Gateway(GatewayError::Rejected { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Gateway(GatewayError::Unavailable(_)) => StatusCode::BAD_GATEWAY,
            Self::DatabaseTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::DatabaseError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "order_not_found",
            Self::ValidationFailed(_) => "validation_error",
            Self::BadRequest(_) => "malformed_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::RateLimitExceeded => "rate_limited",
            Self::Gateway(GatewayError::Rejected { .. }) => "gateway_rejected",
            Self::Gateway(GatewayError::Unavailable(_)) => "gateway_unavailable",
            Self::SignatureMismatch => "signature_mismatch",
            Self::DatabaseTimeout(_) => "database_timeout",
            Self::DatabaseError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::DatabaseTimeout(_) => "Database is temporarily unavailable".to_string(),
            Self::SerializationError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            Self::ValidationFailed(_) => "Validation failed".to_string(),
            Self::Gateway(GatewayError::Rejected { .. }) => {
                "Payment gateway rejected the order".to_string()
            }
            Self::Gateway(GatewayError::Unavailable(_)) => {
                "Payment gateway is temporarily unavailable".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        }

        let errors = match &self {
            ServiceError::ValidationFailed(reasons) => Some(reasons.clone()),
            _ => None,
        };

        let body = ErrorResponse {
            success: false,
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            errors,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::NotFound("missing".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
        assert!(!payload.success);
        assert_eq!(payload.code, "order_not_found");
    }

    #[tokio::test]
    async fn validation_failure_lists_every_reason() {
        let response = ServiceError::ValidationFailed(vec![
            "Name must be at least 2 characters".into(),
            "Invalid email address".into(),
        ])
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.code, "validation_error");
        assert_eq!(payload.errors.map(|e| e.len()), Some(2));
    }

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::validation("x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::RateLimitExceeded.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ServiceError::SignatureMismatch.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::Gateway(GatewayError::Rejected {
                status: 400,
                message: "bad amount".into()
            })
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::Gateway(GatewayError::Unavailable("timeout".into())).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::InternalError("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::DatabaseTimeout(Duration::from_secs(5)).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn service_error_response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::InternalError("sensitive".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::Gateway(GatewayError::Unavailable("10.0.0.3 refused".into()))
                .response_message(),
            "Payment gateway is temporarily unavailable"
        );
        let timeout = ServiceError::DatabaseTimeout(Duration::from_secs(5));
        assert_eq!(timeout.code(), "database_timeout");
        assert_eq!(timeout.response_message(), "Database is temporarily unavailable");
        assert_eq!(
            ServiceError::NotFound("Order not found".into()).response_message(),
            "Not found: Order not found"
        );
    }
}
