//! # Flash Sale Redis
//!
//! Redis implementations of the shared low-latency store collaborators:
//!
//! - [`RedisFlashStore`]: [`StockLedger`](flashsale_core::ledger::StockLedger),
//!   [`DedupGuard`](flashsale_core::dedup::DedupGuard) and
//!   [`ProcessedMarkers`](flashsale_core::markers::ProcessedMarkers)
//! - [`RedisSlidingWindow`]: distributed
//!   [`AdmissionGate`](flashsale_core::admission::AdmissionGate)
//!
//! Every state change that must be atomic runs as a Lua script
//! ([`scripts`]). Every call carries a timeout and reports
//! [`StoreError`](flashsale_core::StoreError) on failure, never a default.
//!
//! # Key layout
//!
//! Product keys carry a `{product}` hash tag so the stock counter and all
//! markers for one product live in the same cluster slot:
//!
//! ```text
//! seckill:stock:{42}          -> remaining units
//! seckill:dedup:{42}:7        -> "1"          (TTL)
//! seckill:processed:{42}:7    -> order number (TTL)
//! ratelimit:seckill:10.0.0.1  -> sorted set of request timestamps (TTL)
//! ```

pub mod keys;
pub mod limiter;
pub mod scripts;
pub mod store;

pub use limiter::RedisSlidingWindow;
pub use store::RedisFlashStore;

use flashsale_core::StoreError;
use redis::aio::ConnectionManager;
use redis::Client;
use std::future::Future;
use std::time::Duration;

/// Open a managed, auto-reconnecting connection.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if the URL is invalid or the first
/// connection cannot be established.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager, StoreError> {
    let client = Client::open(redis_url)
        .map_err(|e| StoreError::Unavailable(format!("Failed to create Redis client: {e}")))?;

    ConnectionManager::new(client).await.map_err(|e| {
        StoreError::Unavailable(format!("Failed to create Redis connection manager: {e}"))
    })
}

/// Run one store call under `timeout`, mapping transport errors.
pub(crate) async fn bounded<T, F>(op: &'static str, timeout: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::warn!(op, error = %e, "Redis call failed");
            Err(StoreError::Unavailable(format!("{op}: {e}")))
        }
        Err(_) => {
            tracing::warn!(op, timeout_ms = timeout.as_millis(), "Redis call timed out");
            Err(StoreError::Timeout(timeout))
        }
    }
}
