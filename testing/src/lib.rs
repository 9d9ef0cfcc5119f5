//! # Flash Sale Testing
//!
//! In-memory collaborators and helpers for testing the flash-sale pipeline
//! without Redis, a broker or a database.
//!
//! This crate provides:
//! - [`InMemoryFlashStore`]: stock ledger, dedup guard and processed markers
//! - [`InMemoryIntentBus`]: competing-consumer queue with ack/nack redelivery
//! - [`InMemoryOrderRepository`] and [`InMemoryDeadLetters`]
//! - [`ScriptedGate`]: admission gate with a fixed answer
//! - Fault injection on each of the above
//! - Deterministic clocks and proptest strategies
//!
//! ## Example
//!
//! ```
//! use flashsale_testing::InMemoryFlashStore;
//! use flashsale_core::ledger::{DecrementOutcome, StockLedger};
//! use flashsale_core::ProductId;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryFlashStore::new();
//! store.open_sale(ProductId::new(1), 3).await?;
//!
//! let outcome = store.decrement(ProductId::new(1), 1).await?;
//! assert_eq!(outcome, DecrementOutcome::Decremented { remaining: 2 });
//! # Ok(())
//! # }
//! ```

mod bus;
mod gate;
mod orders;
mod store;

pub use bus::InMemoryIntentBus;
pub use gate::ScriptedGate;
pub use orders::{InMemoryDeadLetters, InMemoryOrderRepository, ParkedIntent, ParkedMessage};
pub use store::InMemoryFlashStore;

use chrono::{DateTime, Utc};
use flashsale_core::environment::Clock;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use flashsale_testing::mocks::FixedClock;
    /// use flashsale_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers.
pub mod helpers {
    use std::future::Future;
    use std::time::Duration;

    /// Install a `tracing` subscriber that writes through the test harness.
    ///
    /// Safe to call from every test; only the first call installs.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }

    /// Poll `condition` every few milliseconds until it holds or `timeout` passes.
    ///
    /// Returns whether the condition was met.
    pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition().await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Property-based testing strategies.
pub mod properties {
    use flashsale_core::UserId;
    use proptest::prelude::*;

    /// `count` buyers, possibly with repeats so one buyer can try several times.
    pub fn buyers(count: std::ops::Range<usize>) -> impl Strategy<Value = Vec<UserId>> {
        prop::collection::vec((1_i64..50).prop_map(UserId::new), count)
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[tokio::test]
    async fn eventually_reports_timeout() {
        let met = helpers::eventually(std::time::Duration::from_millis(20), || async { false }).await;
        assert!(!met);
    }
}
