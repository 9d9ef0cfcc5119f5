//! # Flash Sale Runtime
//!
//! In-process resilience and observability building blocks shared by the
//! flash-sale service:
//!
//! - [`circuit_breaker`]: named breakers wrapping queue and persistence calls
//! - [`token_bucket`]: keyed token bucket, the local admission gate
//! - [`retry`]: exponential backoff for best-effort compensation steps
//! - [`metrics`]: Prometheus recorder and metric recorders per component

/// Circuit breaker for queue and persistence calls
pub mod circuit_breaker;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry logic with exponential backoff
pub mod retry;

/// Keyed token bucket admission gate
pub mod token_bucket;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use token_bucket::{KeyedTokenBucket, TokenBucketConfig};
