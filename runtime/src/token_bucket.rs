//! Keyed token bucket: the in-process admission gate.
//!
//! ```text
//! Bucket per key (burst: 10 tokens, rate: 5/s)
//! ├─ Tokens refill continuously at `rate`, capped at `burst`
//! ├─ Each request takes one token
//! └─ No token → request denied, caller told how long until the next one
//! ```
//!
//! Buckets are created on first use and removed by [`KeyedTokenBucket::evict_idle`]
//! once a key has been quiet for `idle_ttl`. A background janitor
//! ([`KeyedTokenBucket::spawn_janitor`]) runs the eviction on an interval.
//!
//! The map is guarded by a `std::sync::Mutex`; the lock is never held across
//! an `.await`, so `allow` is effectively non-blocking.

use async_trait::async_trait;
use flashsale_core::StoreError;
use flashsale_core::admission::{Admission, AdmissionGate};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Token bucket parameters, shared by every key of one limiter.
#[derive(Debug, Clone)]
pub struct TokenBucketConfig {
    /// Tokens refilled per second
    pub rate: f64,
    /// Bucket capacity (maximum burst)
    pub burst: u32,
    /// Quiet period after which a key's bucket is dropped
    pub idle_ttl: Duration,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            rate: 5.0,
            burst: 10,
            idle_ttl: Duration::from_secs(300),
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

/// Token bucket limiter keyed by client.
///
/// Cheap to clone; clones share buckets.
#[derive(Clone)]
pub struct KeyedTokenBucket {
    name: Arc<str>,
    config: Arc<TokenBucketConfig>,
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
}

impl KeyedTokenBucket {
    /// Create a limiter. `name` labels logs and metrics.
    #[must_use]
    pub fn new(name: impl Into<String>, config: TokenBucketConfig) -> Self {
        Self {
            name: Arc::from(name.into()),
            config: Arc::new(config),
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Bucket>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take one token for `key` if available.
    #[must_use]
    pub fn allow(&self, key: &str) -> bool {
        self.check(key).is_allowed()
    }

    /// Take one token for `key`, reporting how long to wait when denied.
    #[must_use]
    pub fn check(&self, key: &str) -> Admission {
        let now = Instant::now();
        let capacity = f64::from(self.config.burst);
        let mut buckets = self.lock();

        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: capacity,
            last_refill: now,
            last_seen: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.config.rate).min(capacity);
        bucket.last_refill = now;
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Admission::Allowed;
        }

        let missing = 1.0 - bucket.tokens;
        let retry_after = if self.config.rate > 0.0 {
            Duration::from_secs_f64(missing / self.config.rate)
        } else {
            self.config.idle_ttl
        };
        drop(buckets);

        tracing::debug!(limiter = %self.name, key, "Token bucket empty");
        Admission::Denied { retry_after }
    }

    /// Drop buckets idle longer than `idle_ttl`. Returns how many were removed.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let idle_ttl = self.config.idle_ttl;
        let mut buckets = self.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_seen) < idle_ttl);
        before - buckets.len()
    }

    /// Number of live buckets.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.lock().len()
    }

    /// Run [`evict_idle`](Self::evict_idle) every `interval` until shutdown.
    #[must_use]
    pub fn spawn_janitor(
        &self,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::debug!(limiter = %limiter.name, "Token bucket janitor stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = limiter.evict_idle();
                        if evicted > 0 {
                            tracing::debug!(limiter = %limiter.name, evicted, "Evicted idle buckets");
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl AdmissionGate for KeyedTokenBucket {
    async fn admit(&self, key: &str) -> Result<Admission, StoreError> {
        Ok(self.check(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rate: f64, burst: u32) -> KeyedTokenBucket {
        KeyedTokenBucket::new(
            "test",
            TokenBucketConfig {
                rate,
                burst,
                idle_ttl: Duration::from_millis(50),
            },
        )
    }

    #[test]
    fn allows_burst_then_denies() {
        let limiter = limiter(1.0, 10);

        for _ in 0..10 {
            assert!(limiter.allow("seckill:10.0.0.1"));
        }
        assert!(!limiter.allow("seckill:10.0.0.1"));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = limiter(1.0, 1);

        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        assert!(limiter.allow("b"));
    }

    #[test]
    fn denial_reports_wait_until_next_token() {
        let limiter = limiter(2.0, 1);
        assert!(limiter.allow("k"));

        let decision = limiter.check("k");
        assert!(matches!(
            decision,
            Admission::Denied { retry_after }
                if retry_after > Duration::ZERO && retry_after <= Duration::from_millis(500)
        ));
    }

    #[tokio::test]
    async fn refills_over_time() {
        let limiter = limiter(20.0, 1);
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(limiter.allow("k"));
    }

    #[tokio::test]
    async fn evicts_idle_keys() {
        let limiter = limiter(1.0, 1);
        let _ = limiter.allow("a");
        let _ = limiter.allow("b");
        assert_eq!(limiter.tracked_keys(), 2);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let _ = limiter.allow("b");

        assert_eq!(limiter.evict_idle(), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[tokio::test]
    async fn janitor_stops_on_shutdown() {
        let limiter = limiter(1.0, 1);
        let (tx, rx) = broadcast::channel(1);
        let handle = limiter.spawn_janitor(Duration::from_millis(10), rx);

        let _ = tx.send(());

        assert!(tokio::time::timeout(Duration::from_secs(1), handle).await.is_ok());
    }

    #[tokio::test]
    async fn gate_never_fails() {
        let limiter = limiter(1.0, 1);

        assert_eq!(limiter.admit("k").await, Ok(Admission::Allowed));
        assert!(matches!(limiter.admit("k").await, Ok(Admission::Denied { .. })));
    }

    proptest::proptest! {
        #[test]
        fn never_admits_more_than_burst_at_once(burst in 1u32..50, requests in 0usize..200) {
            // A negligible refill rate isolates the burst capacity
            let limiter = limiter(0.000_001, burst);
            let admitted = (0..requests).filter(|_| limiter.allow("k")).count();
            proptest::prop_assert_eq!(admitted, requests.min(burst as usize));
        }
    }
}
