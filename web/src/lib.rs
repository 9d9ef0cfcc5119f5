//! Axum glue for the flash-sale service.
//!
//! This crate holds the HTTP-facing pieces that are independent of the
//! pipeline itself:
//!
//! - [`AppError`]: status + code + message, rendered as `{code, message}`,
//!   with the mapping from [`SeckillError`](flashsale_core::SeckillError)
//! - [`extractors`]: [`CorrelationId`] and [`ClientIp`]
//! - [`middleware`]: correlation-id tracking and per-route admission control
//! - [`handlers::health`]: liveness and readiness report types
//!
//! # Request Flow
//!
//! 1. **Correlation layer** assigns the request an id and opens a span
//! 2. **Admission middleware** asks the route's gate; `429`/`503` stop here
//! 3. **Handler** extracts identity and body, calls the pipeline
//! 4. **`AppError`** maps any failure to its status and code

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{ClientIp, CorrelationId, TrustedProxies};
pub use middleware::{CORRELATION_ID_HEADER, RouteLimit, admission_limit, correlation_id_layer};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
