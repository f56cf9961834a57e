use crate::rate_limit::RateLimitDecision;
use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway error taxonomy.
///
/// Every variant maps to exactly one HTTP status and one stable JSON envelope;
/// clients never see a body-less 500 or a raw internal error in production.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Rate limit exceeded")]
    AdmissionDenied(RateLimitDecision),

    #[error("Rate limit store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Missing authentication credentials")]
    Unauthenticated,

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Expired credential")]
    ExpiredCredential,

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::AdmissionDenied(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GatewayError::InvalidCredential(_) => StatusCode::UNAUTHORIZED,
            GatewayError::ExpiredCredential => StatusCode::UNAUTHORIZED,
            GatewayError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Proxy(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert to the client-facing response.
    ///
    /// `expose_detail` gates the `error` field on 502/504 bodies: upstream
    /// failure detail is only surfaced in development mode, never in
    /// production.
    pub fn into_response_with(self, expose_detail: bool) -> Response {
        let status = self.status_code();

        match &self {
            GatewayError::AdmissionDenied(decision) => {
                let mut response = (
                    status,
                    Json(json!({
                        "success": false,
                        "message": "Too Many Requests",
                    })),
                )
                    .into_response();
                decision.apply_headers(response.headers_mut());
                if let Ok(retry) = HeaderValue::from_str(&decision.retry_after_secs().to_string())
                {
                    response.headers_mut().insert("Retry-After", retry);
                }
                response
            }
            GatewayError::Unauthenticated
            | GatewayError::InvalidCredential(_)
            | GatewayError::ExpiredCredential => (
                status,
                Json(json!({
                    "success": false,
                    "message": "Authentication required",
                })),
            )
                .into_response(),
            GatewayError::RouteNotFound(_) => (
                status,
                Json(json!({
                    "success": false,
                    "message": "Route not found",
                })),
            )
                .into_response(),
            GatewayError::StoreUnavailable(_) => (
                status,
                Json(json!({
                    "success": false,
                    "message": "Service Unavailable",
                })),
            )
                .into_response(),
            GatewayError::UpstreamUnreachable(detail) | GatewayError::Proxy(detail) => {
                let body = if expose_detail {
                    json!({ "message": "Internal Server Error", "error": detail })
                } else {
                    json!({ "message": "Internal Server Error" })
                };
                (status, Json(body)).into_response()
            }
            GatewayError::UpstreamTimeout(detail) => {
                let body = if expose_detail {
                    json!({ "message": "Gateway Timeout", "error": detail })
                } else {
                    json!({ "message": "Gateway Timeout" })
                };
                (status, Json(body)).into_response()
            }
            _ => (
                status,
                Json(json!({
                    "success": false,
                    "message": "Internal Server Error",
                })),
            )
                .into_response(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        // Production defaults: no internal detail.
        self.into_response_with(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            GatewayError::RouteNotFound("/nope".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::Unauthenticated.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::ExpiredCredential.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::UpstreamTimeout("deadline".to_string()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::UpstreamUnreachable("refused".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::StoreUnavailable("down".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_admission_denied_carries_rate_limit_headers() {
        let decision = RateLimitDecision::denied(100, 1_700_000_060_000, 1_700_000_000_000);
        let response = GatewayError::AdmissionDenied(decision).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers.get("X-RateLimit-Limit").unwrap(), "100");
        assert_eq!(headers.get("X-RateLimit-Remaining").unwrap(), "0");
        assert!(headers.contains_key("X-RateLimit-Reset"));
        assert!(headers.contains_key("Retry-After"));
    }

    #[test]
    fn test_error_display() {
        let err = GatewayError::RouteNotFound("/nope".to_string());
        assert_eq!(err.to_string(), "Route not found: /nope");
    }
}
