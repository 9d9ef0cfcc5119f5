//! Distributed sliding-window admission gate.
//!
//! # Algorithm
//!
//! One sorted set per key, scored by request time in milliseconds:
//! 1. Drop entries older than the window (ZREMRANGEBYSCORE)
//! 2. Count what is left (ZCARD)
//! 3. Under capacity: record this request (ZADD) and refresh the TTL
//!
//! All three steps run in one Lua script, so concurrent instances cannot
//! both pass the count before either records.

use crate::scripts::SLIDING_WINDOW;
use crate::{bounded, keys};
use async_trait::async_trait;
use flashsale_core::StoreError;
use flashsale_core::admission::{Admission, AdmissionGate};
use redis::Script;
use redis::aio::ConnectionManager;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Sliding-window limiter shared by every service instance.
///
/// Store failures are returned as errors; callers fail closed.
#[derive(Clone)]
pub struct RedisSlidingWindow {
    conn_manager: ConnectionManager,
    script: Script,
    capacity: u32,
    window: Duration,
    timeout: Duration,
}

impl RedisSlidingWindow {
    /// Admit at most `capacity` requests per key within any `window`.
    #[must_use]
    pub fn new(
        conn_manager: ConnectionManager,
        capacity: u32,
        window: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            conn_manager,
            script: Script::new(SLIDING_WINDOW),
            capacity,
            window: window.max(Duration::from_secs(1)),
            timeout,
        }
    }

    #[allow(clippy::cast_possible_truncation)] // Safe: timestamps fit in u64 until year 2554
    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64
    }
}

#[async_trait]
impl AdmissionGate for RedisSlidingWindow {
    async fn admit(&self, key: &str) -> Result<Admission, StoreError> {
        let mut conn = self.conn_manager.clone();
        let window_key = keys::rate_limit(key);
        let now_ms = Self::now_ms();
        let member = format!("{now_ms}-{}", uuid::Uuid::new_v4().simple());

        let admitted: i64 = bounded(
            "sliding_window",
            self.timeout,
            self.script
                .key(&window_key)
                .arg(now_ms)
                .arg(self.window.as_secs())
                .arg(self.capacity)
                .arg(&member)
                .invoke_async(&mut conn),
        )
        .await?;

        if admitted == 1 {
            Ok(Admission::Allowed)
        } else {
            tracing::debug!(key, capacity = self.capacity, "Sliding window full");
            Ok(Admission::Denied {
                retry_after: self.window,
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // Note: These tests require a running Redis instance
    // Run with: docker run -d -p 6379:6379 redis:7-alpine

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn admits_capacity_then_denies() {
        let conn = crate::connect("redis://127.0.0.1:6379").await.unwrap();
        let gate = RedisSlidingWindow::new(conn, 3, Duration::from_secs(60), Duration::from_secs(1));
        let key = format!("test:{}", uuid::Uuid::new_v4());

        for _ in 0..3 {
            assert_eq!(gate.admit(&key).await.unwrap(), Admission::Allowed);
        }
        assert!(matches!(gate.admit(&key).await.unwrap(), Admission::Denied { .. }));
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn window_slides() {
        let conn = crate::connect("redis://127.0.0.1:6379").await.unwrap();
        let gate = RedisSlidingWindow::new(conn, 1, Duration::from_secs(1), Duration::from_secs(1));
        let key = format!("test:{}", uuid::Uuid::new_v4());

        assert!(gate.admit(&key).await.unwrap().is_allowed());
        assert!(!gate.admit(&key).await.unwrap().is_allowed());

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(gate.admit(&key).await.unwrap().is_allowed());
    }
}
