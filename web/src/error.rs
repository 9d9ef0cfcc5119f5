//! Error types for web handlers.
//!
//! [`AppError`] bridges domain errors and HTTP responses. Every error renders
//! as `{"code": "...", "message": "..."}`; rate-limit errors also carry a
//! `Retry-After` header.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use flashsale_core::{SeckillError, StoreError};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```
/// use flashsale_web::AppError;
/// use axum::http::StatusCode;
///
/// let err = AppError::conflict("Seat already taken");
/// assert_eq!(err.status(), StatusCode::CONFLICT);
/// assert_eq!(err.code(), "CONFLICT");
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: String,
    /// Suggested wait, rendered as `Retry-After`
    retry_after: Option<Duration>,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: code.into(),
            retry_after: None,
            source: None,
        }
    }

    /// Create a new error with a source error.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Attach a `Retry-After` hint.
    #[must_use]
    pub const fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Retry hint, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "BAD_REQUEST")
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message, "UNAUTHORIZED")
    }

    /// Create a 403 Forbidden error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message, "FORBIDDEN")
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND",
        )
    }

    /// Create a 409 Conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message, "CONFLICT")
    }

    /// Create a 429 Too Many Requests error with a `Retry-After` hint.
    #[must_use]
    pub fn too_many_requests(retry_after: Duration) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests, slow down",
            "RATE_LIMITED",
        )
        .with_retry_after(retry_after)
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
            "INTERNAL_SERVER_ERROR",
        )
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message,
            "SERVICE_UNAVAILABLE",
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: String,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log internal errors
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                );
            } else {
                tracing::warn!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Request failed"
                );
            }
        }

        let retry_after = self.retry_after;
        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        let mut response = (self.status, Json(body)).into_response();
        if let Some(retry_after) = retry_after {
            // Whole seconds rounded up, never zero
            let seconds = (retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0)).max(1);
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

/// Shared-store failures fail closed.
impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        Self::unavailable("Service temporarily unavailable").with_source(err.into())
    }
}

/// Retryable failures without their own hint tell the client to wait this long.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

impl From<SeckillError> for AppError {
    fn from(err: SeckillError) -> Self {
        let message = err.to_string();
        let retryable = err.is_retryable();
        let mapped = match err {
            SeckillError::NotOpen(_) => Self::new(StatusCode::NOT_FOUND, message, "SALE_NOT_OPEN"),
            SeckillError::SoldOut(_) => Self::new(StatusCode::CONFLICT, message, "SOLD_OUT"),
            SeckillError::AlreadyParticipated(_) => {
                Self::new(StatusCode::CONFLICT, message, "ALREADY_PARTICIPATED")
            }
            SeckillError::RateLimited { retry_after } => Self::too_many_requests(retry_after),
            SeckillError::CircuitOpen(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, message, "CIRCUIT_OPEN")
            }
            SeckillError::SystemBusy => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, message, "SYSTEM_BUSY")
            }
            SeckillError::ProductNotFound(_) => Self::new(StatusCode::NOT_FOUND, message, "NOT_FOUND"),
            SeckillError::PersistenceConflict(_) => {
                Self::internal("An internal error occurred").with_source(err.into())
            }
            SeckillError::Store(store) => store.into(),
        };

        if retryable && mapped.retry_after.is_none() {
            mapped.with_retry_after(DEFAULT_RETRY_AFTER)
        } else {
            mapped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashsale_core::ProductId;

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid input");
    }

    #[test]
    fn test_not_found() {
        let err = AppError::not_found("Product", "123");
        assert_eq!(err.to_string(), "[NOT_FOUND] Product with id 123 not found");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn seckill_errors_map_to_documented_statuses() {
        let product = ProductId::new(1);
        let cases = [
            (SeckillError::NotOpen(product), StatusCode::NOT_FOUND, "SALE_NOT_OPEN"),
            (SeckillError::SoldOut(product), StatusCode::CONFLICT, "SOLD_OUT"),
            (
                SeckillError::AlreadyParticipated(product),
                StatusCode::CONFLICT,
                "ALREADY_PARTICIPATED",
            ),
            (
                SeckillError::RateLimited {
                    retry_after: Duration::from_secs(1),
                },
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
            ),
            (
                SeckillError::CircuitOpen("queue".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
                "CIRCUIT_OPEN",
            ),
            (SeckillError::SystemBusy, StatusCode::SERVICE_UNAVAILABLE, "SYSTEM_BUSY"),
            (SeckillError::ProductNotFound(product), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (
                SeckillError::Store(StoreError::Timeout(Duration::from_millis(50))),
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
            ),
        ];

        for (err, status, code) in cases {
            let app_err = AppError::from(err);
            assert_eq!(app_err.status(), status);
            assert_eq!(app_err.code(), code);
        }
    }

    #[test]
    fn only_retryable_failures_advise_a_retry() {
        let busy = AppError::from(SeckillError::SystemBusy).into_response();
        assert_eq!(
            busy.headers().get(header::RETRY_AFTER).map(HeaderValue::as_bytes),
            Some(b"1".as_slice())
        );

        let store_down =
            AppError::from(SeckillError::Store(StoreError::Unavailable("refused".into())));
        assert!(store_down.into_response().headers().contains_key(header::RETRY_AFTER));

        let sold_out = AppError::from(SeckillError::SoldOut(ProductId::new(1))).into_response();
        assert!(!sold_out.headers().contains_key(header::RETRY_AFTER));

        let limited = AppError::from(SeckillError::RateLimited {
            retry_after: Duration::from_secs(4),
        })
        .into_response();
        assert_eq!(
            limited.headers().get(header::RETRY_AFTER).map(HeaderValue::as_bytes),
            Some(b"4".as_slice())
        );
    }

    #[test]
    fn rate_limited_response_carries_retry_after() {
        let response = AppError::too_many_requests(Duration::from_millis(1500)).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).map(HeaderValue::as_bytes),
            Some(b"2".as_slice())
        );
    }

    #[test]
    fn sub_second_retry_after_rounds_up_to_one() {
        let response = AppError::too_many_requests(Duration::from_millis(200)).into_response();
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).map(HeaderValue::as_bytes),
            Some(b"1".as_slice())
        );
    }
}
