//! # Flash Sale Core
//!
//! Domain types, the error taxonomy, and the collaborator traits for the
//! flash-sale admission-and-fulfillment pipeline.
//!
//! The pipeline lets a very large number of concurrent buyers compete for a
//! small, fixed inventory without ever selling more units than exist:
//!
//! ```text
//! Admission Gate ─▶ Circuit Breaker ─▶ Stock Ledger ─▶ Dedup Guard
//!                                                         │
//!                                                         ▼
//!  persisted Order ◀─ Order Materializer ◀─ Durable Queue ◀─ Intent Publisher
//! ```
//!
//! This crate holds no I/O. Every external collaborator is a trait:
//!
//! - [`ledger::StockLedger`]: shared per-product stock counter
//! - [`dedup::DedupGuard`]: per-(user, product) participation marker
//! - [`markers::ProcessedMarkers`]: per-(user, product) materialization marker
//! - [`intent_bus::IntentBus`]: durable at-least-once intent queue
//! - [`orders::OrderRepository`]: authoritative order persistence
//! - [`dead_letter::DeadLetterSink`]: parking lot for poisoned intents
//! - [`admission::AdmissionGate`]: per-key request throttling
//!
//! Production implementations live in `flashsale-redis`, `flashsale-redpanda`
//! and `flashsale-postgres`; in-memory ones live in `flashsale-testing`.

pub mod admission;
pub mod dead_letter;
pub mod dedup;
pub mod error;
pub mod intent_bus;
pub mod ledger;
pub mod markers;
pub mod orders;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::{SeckillError, StoreError};
pub use types::{
    Order, OrderNo, OrderStatus, Product, ProductId, PurchaseIntent, RequestId, UserId,
};

/// Environment abstractions injected into the pipeline.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let clock = SystemClock;
    ///
    /// // Test - fixed time for deterministic tests
    /// let clock = FixedClock::new(Utc::now());
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock backed by [`Utc::now`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
