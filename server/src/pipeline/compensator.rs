//! Compensating actions for a seat that was taken but never published.
//!
//! Each step is retried with exponential backoff. A step that still fails is
//! logged with `critical = true` and counted; the caller's answer does not
//! change, it has already lost the seat.

use flashsale_core::dedup::DedupGuard;
use flashsale_core::ledger::StockLedger;
use flashsale_core::{ProductId, UserId};
use flashsale_runtime::metrics::CompensationMetrics;
use flashsale_runtime::{RetryPolicy, retry_with_backoff};
use std::sync::Arc;

/// What a compensation run managed to undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompensationReport {
    /// The unit went back to the ledger (or the sale no longer exists)
    pub stock_restored: bool,
    /// The dedup marker was removed (always `true` when not requested)
    pub marker_released: bool,
}

impl CompensationReport {
    /// Both steps succeeded.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.stock_restored && self.marker_released
    }
}

/// Undoes ledger and dedup writes.
#[derive(Clone)]
pub struct Compensator {
    ledger: Arc<dyn StockLedger>,
    dedup: Arc<dyn DedupGuard>,
    policy: RetryPolicy,
}

impl Compensator {
    /// Create a compensator retrying each step under `policy`.
    #[must_use]
    pub fn new(ledger: Arc<dyn StockLedger>, dedup: Arc<dyn DedupGuard>, policy: RetryPolicy) -> Self {
        Self {
            ledger,
            dedup,
            policy,
        }
    }

    /// Give the unit back and release the buyer's marker.
    ///
    /// Used when the intent could not be published.
    pub async fn release_seat(&self, user_id: UserId, product_id: ProductId) -> CompensationReport {
        CompensationMetrics::record_compensation();
        let stock_restored = self.restore_stock(user_id, product_id).await;
        let marker_released = self.release_marker(user_id, product_id).await;

        let report = CompensationReport {
            stock_restored,
            marker_released,
        };
        if report.is_complete() {
            tracing::info!(%user_id, %product_id, "Seat released after failed publish");
        }
        report
    }

    /// Give the unit back, leaving the marker alone.
    ///
    /// Used when a concurrent request by the same buyer already holds the
    /// marker; that marker belongs to the winning request.
    pub async fn return_stock(&self, user_id: UserId, product_id: ProductId) -> CompensationReport {
        CompensationMetrics::record_compensation();
        CompensationReport {
            stock_restored: self.restore_stock(user_id, product_id).await,
            marker_released: true,
        }
    }

    async fn restore_stock(&self, user_id: UserId, product_id: ProductId) -> bool {
        let ledger = &self.ledger;
        match retry_with_backoff(&self.policy, "restore_stock", move || ledger.restore(product_id, 1)).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(%user_id, %product_id, "Sale closed before stock could be restored");
                true
            }
            Err(e) => {
                CompensationMetrics::record_failure("restore_stock");
                tracing::error!(
                    critical = true,
                    %user_id,
                    %product_id,
                    error = %e,
                    "Failed to restore stock, ledger is one unit short"
                );
                false
            }
        }
    }

    async fn release_marker(&self, user_id: UserId, product_id: ProductId) -> bool {
        let dedup = &self.dedup;
        match retry_with_backoff(&self.policy, "release_marker", move || dedup.unmark(user_id, product_id)).await {
            Ok(()) => true,
            Err(e) => {
                CompensationMetrics::record_failure("release_marker");
                tracing::error!(
                    critical = true,
                    %user_id,
                    %product_id,
                    error = %e,
                    "Failed to release dedup marker, buyer is locked out until it expires"
                );
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flashsale_core::ledger::DecrementOutcome;
    use flashsale_testing::InMemoryFlashStore;
    use std::time::Duration;

    const PRODUCT: ProductId = ProductId(1);
    const USER: UserId = UserId(7);

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(2))
            .build()
    }

    async fn taken_seat(store: &InMemoryFlashStore) {
        store.open_sale(PRODUCT, 1).await.unwrap();
        let outcome = store.decrement(PRODUCT, 1).await.unwrap();
        assert_eq!(outcome, DecrementOutcome::Decremented { remaining: 0 });
        assert!(store.mark(USER, PRODUCT, Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn release_seat_restores_stock_and_marker() {
        let store = InMemoryFlashStore::new();
        taken_seat(&store).await;
        let compensator = Compensator::new(Arc::new(store.clone()), Arc::new(store.clone()), fast_policy());

        let report = compensator.release_seat(USER, PRODUCT).await;

        assert!(report.is_complete());
        assert_eq!(store.stock(PRODUCT), Some(1));
        assert!(!store.is_marked(USER, PRODUCT));
    }

    #[tokio::test]
    async fn failing_restore_is_retried_then_reported() {
        let store = InMemoryFlashStore::new();
        taken_seat(&store).await;
        store.fail_restore(true);
        let compensator = Compensator::new(Arc::new(store.clone()), Arc::new(store.clone()), fast_policy());

        let report = compensator.release_seat(USER, PRODUCT).await;

        assert!(!report.stock_restored);
        assert!(report.marker_released);
        assert_eq!(store.restore_calls(), 3);
        assert_eq!(store.stock(PRODUCT), Some(0));
    }

    #[tokio::test]
    async fn return_stock_keeps_the_winners_marker() {
        let store = InMemoryFlashStore::new();
        taken_seat(&store).await;
        let compensator = Compensator::new(Arc::new(store.clone()), Arc::new(store.clone()), fast_policy());

        let report = compensator.return_stock(USER, PRODUCT).await;

        assert!(report.is_complete());
        assert_eq!(store.stock(PRODUCT), Some(1));
        assert!(store.is_marked(USER, PRODUCT));
    }

    #[tokio::test]
    async fn closed_sale_counts_as_restored() {
        let store = InMemoryFlashStore::new();
        taken_seat(&store).await;
        store.close_sale(PRODUCT);
        let compensator = Compensator::new(Arc::new(store.clone()), Arc::new(store.clone()), fast_policy());

        let report = compensator.release_seat(USER, PRODUCT).await;

        assert!(report.stock_restored);
        assert_eq!(store.stock(PRODUCT), None);
    }
}
