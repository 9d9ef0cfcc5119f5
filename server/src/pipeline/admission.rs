//! The admission path: take a seat, publish the intent, or compensate.
//!
//! ```text
//! sale open? ─▶ catalog ─▶ dedup check ─▶ ledger decrement ─▶ dedup mark ─▶ publish (queue breaker)
//!                                   │                 │             │
//!                                   │           lost race      failure
//!                                   │                 ▼             ▼
//!                                   │          return stock    release seat
//! ```
//!
//! In [`DedupMode::Atomic`] the check, decrement and mark are one store-side
//! script. A product without a ledger counter is rejected before the catalog
//! is consulted, so unknown ids never reach the database, and a cached
//! product is served without one.

use super::catalog::SaleCatalog;
use super::compensator::Compensator;
use crate::config::DedupMode;
use flashsale_core::dedup::DedupGuard;
use flashsale_core::environment::{Clock, SystemClock};
use flashsale_core::intent_bus::IntentBus;
use flashsale_core::ledger::{ClaimOutcome, DecrementOutcome, StockLedger};
use flashsale_core::orders::OrderRepository;
use flashsale_core::{Product, ProductId, PurchaseIntent, SeckillError, UserId};
use flashsale_runtime::metrics::AdmissionMetrics;
use flashsale_runtime::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, RetryPolicy};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// A purchase attempt that won a seat and was queued.
#[derive(Debug, Clone)]
pub struct Admitted {
    /// The published intent
    pub intent: PurchaseIntent,
    /// Product as cached at admission time
    pub product: Product,
}

/// A sale that was (re)opened.
#[derive(Debug, Clone)]
pub struct SaleOpened {
    /// Product the sale is for
    pub product: Product,
    /// Units seeded into the ledger
    pub stock: u64,
}

/// Missing collaborator when building a [`SeckillPipeline`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Seckill pipeline is missing its {0}")]
pub struct MissingComponent(&'static str);

/// Admission pipeline for flash-sale purchase attempts.
pub struct SeckillPipeline {
    catalog: SaleCatalog,
    ledger: Arc<dyn StockLedger>,
    dedup: Arc<dyn DedupGuard>,
    bus: Arc<dyn IntentBus>,
    queue_breaker: CircuitBreaker,
    compensator: Compensator,
    clock: Arc<dyn Clock>,
    dedup_mode: DedupMode,
    marker_ttl: Duration,
}

impl SeckillPipeline {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> SeckillPipelineBuilder {
        SeckillPipelineBuilder::default()
    }

    /// Seed (or overwrite) the ledger for a product.
    ///
    /// `stock` defaults to the product row's stock.
    ///
    /// # Errors
    ///
    /// [`SeckillError::ProductNotFound`] for an unknown product, or a store
    /// error if the ledger cannot be written.
    pub async fn open_sale(
        &self,
        product_id: ProductId,
        stock: Option<u64>,
    ) -> Result<SaleOpened, SeckillError> {
        let product = self.catalog.refresh(product_id).await?;
        let stock = stock.unwrap_or_else(|| product.stock.max(0).unsigned_abs());

        self.ledger.open_sale(product_id, stock).await?;
        tracing::info!(%product_id, stock, name = %product.name, "Flash sale opened");

        Ok(SaleOpened { product, stock })
    }

    /// Units left in the ledger.
    ///
    /// # Errors
    ///
    /// [`SeckillError::NotOpen`] if no sale was opened for the product.
    pub async fn remaining(&self, product_id: ProductId) -> Result<u64, SeckillError> {
        self.ledger
            .remaining(product_id)
            .await?
            .ok_or(SeckillError::NotOpen(product_id))
    }

    /// Attempt to buy one unit of `product_id` for `user_id`.
    ///
    /// Returns once the intent is durably queued; the order is created later
    /// by the materializer.
    ///
    /// # Errors
    ///
    /// - [`SeckillError::ProductNotFound`] / [`SeckillError::NotOpen`]
    /// - [`SeckillError::SoldOut`] when the ledger is exhausted
    /// - [`SeckillError::AlreadyParticipated`] for a repeat buyer
    /// - [`SeckillError::CircuitOpen`] / [`SeckillError::SystemBusy`] when the
    ///   queue is unavailable; the seat has been given back
    /// - [`SeckillError::Store`] when the shared store failed
    pub async fn submit(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Admitted, SeckillError> {
        let started = Instant::now();
        let result = self.admit(user_id, product_id).await;
        AdmissionMetrics::record_duration(started.elapsed());

        match &result {
            Ok(admitted) => {
                AdmissionMetrics::record_outcome("queued");
                tracing::info!(
                    %user_id,
                    %product_id,
                    request_id = %admitted.intent.request_id,
                    "Purchase intent queued"
                );
            }
            Err(e) => {
                AdmissionMetrics::record_outcome(e.reason());
                tracing::debug!(%user_id, %product_id, reason = e.reason(), "Purchase attempt rejected");
            }
        }
        result
    }

    async fn admit(&self, user_id: UserId, product_id: ProductId) -> Result<Admitted, SeckillError> {
        if self.ledger.remaining(product_id).await?.is_none() {
            return Err(SeckillError::NotOpen(product_id));
        }
        let product = self.catalog.product(product_id).await?;

        let remaining = match self.dedup_mode {
            DedupMode::Sequential => self.take_seat_sequential(user_id, product_id).await?,
            DedupMode::Atomic => self.take_seat_atomic(user_id, product_id).await?,
        };
        tracing::debug!(%user_id, %product_id, remaining, "Seat taken");

        let intent = PurchaseIntent::new(user_id, product_id, self.clock.now());
        self.publish(&intent).await?;

        Ok(Admitted { intent, product })
    }

    async fn take_seat_sequential(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<u64, SeckillError> {
        if self.dedup.has_participated(user_id, product_id).await? {
            return Err(SeckillError::AlreadyParticipated(product_id));
        }

        let remaining = match self.ledger.decrement(product_id, 1).await? {
            DecrementOutcome::Decremented { remaining } => remaining,
            DecrementOutcome::Insufficient => return Err(SeckillError::SoldOut(product_id)),
            DecrementOutcome::NotFound => return Err(SeckillError::NotOpen(product_id)),
        };

        match self.dedup.mark(user_id, product_id, self.marker_ttl).await {
            Ok(true) => Ok(remaining),
            Ok(false) => {
                // A concurrent request by the same buyer marked first
                self.compensator.return_stock(user_id, product_id).await;
                Err(SeckillError::AlreadyParticipated(product_id))
            }
            Err(e) => {
                tracing::warn!(%user_id, %product_id, error = %e, "Dedup mark failed after decrement");
                self.compensator.return_stock(user_id, product_id).await;
                Err(SeckillError::SystemBusy)
            }
        }
    }

    async fn take_seat_atomic(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<u64, SeckillError> {
        match self
            .ledger
            .claim(product_id, user_id, 1, self.marker_ttl)
            .await?
        {
            ClaimOutcome::Claimed { remaining } => Ok(remaining),
            ClaimOutcome::AlreadyClaimed => Err(SeckillError::AlreadyParticipated(product_id)),
            ClaimOutcome::Insufficient => Err(SeckillError::SoldOut(product_id)),
            ClaimOutcome::NotFound => Err(SeckillError::NotOpen(product_id)),
        }
    }

    async fn publish(&self, intent: &PurchaseIntent) -> Result<(), SeckillError> {
        let bus = &self.bus;
        match self.queue_breaker.execute(|| bus.publish(intent)).await {
            Ok(()) => {
                AdmissionMetrics::record_published();
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %intent.user_id,
                    product_id = %intent.product_id,
                    request_id = %intent.request_id,
                    error = %e,
                    "Intent not published, compensating"
                );
                self.compensator
                    .release_seat(intent.user_id, intent.product_id)
                    .await;

                Err(match e {
                    CircuitBreakerError::Open { name } => SeckillError::CircuitOpen(name),
                    CircuitBreakerError::Timeout { .. } | CircuitBreakerError::Inner(_) => {
                        SeckillError::SystemBusy
                    }
                })
            }
        }
    }
}

/// Builder for [`SeckillPipeline`].
#[derive(Default)]
pub struct SeckillPipelineBuilder {
    ledger: Option<Arc<dyn StockLedger>>,
    dedup: Option<Arc<dyn DedupGuard>>,
    bus: Option<Arc<dyn IntentBus>>,
    repository: Option<Arc<dyn OrderRepository>>,
    queue_breaker: Option<CircuitBreaker>,
    clock: Option<Arc<dyn Clock>>,
    dedup_mode: Option<DedupMode>,
    marker_ttl: Option<Duration>,
    catalog_timeout: Option<Duration>,
    compensation_policy: Option<RetryPolicy>,
}

impl SeckillPipelineBuilder {
    /// Stock ledger.
    #[must_use]
    pub fn ledger(mut self, ledger: Arc<dyn StockLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Dedup guard.
    #[must_use]
    pub fn dedup(mut self, dedup: Arc<dyn DedupGuard>) -> Self {
        self.dedup = Some(dedup);
        self
    }

    /// Intent queue.
    #[must_use]
    pub fn bus(mut self, bus: Arc<dyn IntentBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Product source for the sale catalog.
    #[must_use]
    pub fn repository(mut self, repository: Arc<dyn OrderRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Breaker around publishing (default: a breaker named `queue` with
    /// default settings).
    #[must_use]
    pub fn queue_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.queue_breaker = Some(breaker);
        self
    }

    /// Clock for `enqueued_at` (default: system clock).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Dedup ordering (default: atomic).
    #[must_use]
    pub const fn dedup_mode(mut self, mode: DedupMode) -> Self {
        self.dedup_mode = Some(mode);
        self
    }

    /// Dedup marker TTL (default: 24h).
    #[must_use]
    pub const fn marker_ttl(mut self, ttl: Duration) -> Self {
        self.marker_ttl = Some(ttl);
        self
    }

    /// Deadline for loading an uncached product on the admission path
    /// (default: 250ms).
    #[must_use]
    pub const fn catalog_timeout(mut self, timeout: Duration) -> Self {
        self.catalog_timeout = Some(timeout);
        self
    }

    /// Retry policy for compensating steps.
    #[must_use]
    pub fn compensation_policy(mut self, policy: RetryPolicy) -> Self {
        self.compensation_policy = Some(policy);
        self
    }

    /// Build the pipeline.
    ///
    /// # Errors
    ///
    /// [`MissingComponent`] if the ledger, dedup guard, bus or repository
    /// was not set.
    pub fn build(self) -> Result<SeckillPipeline, MissingComponent> {
        let ledger = self.ledger.ok_or(MissingComponent("stock ledger"))?;
        let dedup = self.dedup.ok_or(MissingComponent("dedup guard"))?;
        let bus = self.bus.ok_or(MissingComponent("intent bus"))?;
        let repository = self.repository.ok_or(MissingComponent("order repository"))?;

        let compensator = Compensator::new(
            Arc::clone(&ledger),
            Arc::clone(&dedup),
            self.compensation_policy.unwrap_or_default(),
        );

        Ok(SeckillPipeline {
            catalog: SaleCatalog::new(
                repository,
                self.catalog_timeout.unwrap_or(Duration::from_millis(250)),
            ),
            ledger,
            dedup,
            bus,
            queue_breaker: self
                .queue_breaker
                .unwrap_or_else(|| CircuitBreaker::new("queue", CircuitBreakerConfig::default())),
            compensator,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            dedup_mode: self.dedup_mode.unwrap_or(DedupMode::Atomic),
            marker_ttl: self.marker_ttl.unwrap_or(Duration::from_secs(86_400)),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flashsale_testing::{FixedClock, InMemoryFlashStore, InMemoryIntentBus, InMemoryOrderRepository, test_clock};

    const PRODUCT: ProductId = ProductId(1);

    fn repository() -> InMemoryOrderRepository {
        InMemoryOrderRepository::new().with_product(Product {
            id: PRODUCT,
            name: "Phone".to_string(),
            price_cents: 19_900,
            stock: 5,
        })
    }

    fn pipeline(store: &InMemoryFlashStore, bus: &InMemoryIntentBus, mode: DedupMode) -> SeckillPipeline {
        builder(store, bus, &repository()).dedup_mode(mode).build().unwrap()
    }

    fn builder(
        store: &InMemoryFlashStore,
        bus: &InMemoryIntentBus,
        repository: &InMemoryOrderRepository,
    ) -> SeckillPipelineBuilder {
        SeckillPipeline::builder()
            .ledger(Arc::new(store.clone()))
            .dedup(Arc::new(store.clone()))
            .bus(Arc::new(bus.clone()))
            .repository(Arc::new(repository.clone()))
            .clock(Arc::new(test_clock()))
            .compensation_policy(
                RetryPolicy::builder()
                    .max_retries(1)
                    .initial_delay(Duration::from_millis(1))
                    .build(),
            )
    }

    #[tokio::test]
    async fn open_sale_defaults_to_product_stock() {
        let store = InMemoryFlashStore::new();
        let pipeline = pipeline(&store, &InMemoryIntentBus::new(), DedupMode::Atomic);

        let opened = pipeline.open_sale(PRODUCT, None).await.unwrap();

        assert_eq!(opened.stock, 5);
        assert_eq!(pipeline.remaining(PRODUCT).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn unopened_sale_is_not_open() {
        let pipeline = pipeline(&InMemoryFlashStore::new(), &InMemoryIntentBus::new(), DedupMode::Atomic);

        let err = pipeline.submit(UserId::new(1), PRODUCT).await.unwrap_err();

        assert_eq!(err, SeckillError::NotOpen(PRODUCT));
    }

    #[tokio::test]
    async fn unknown_products_never_reach_the_database() {
        let repository = repository();
        let pipeline = builder(&InMemoryFlashStore::new(), &InMemoryIntentBus::new(), &repository)
            .build()
            .unwrap();

        for id in 100..150 {
            let err = pipeline.submit(UserId::new(1), ProductId::new(id)).await.unwrap_err();
            assert_eq!(err, SeckillError::NotOpen(ProductId::new(id)));
        }

        assert_eq!(repository.product_calls(), 0);
    }

    #[tokio::test]
    async fn open_ledger_without_product_row_is_looked_up_once() {
        let store = InMemoryFlashStore::new();
        let repository = repository();
        let pipeline = builder(&store, &InMemoryIntentBus::new(), &repository).build().unwrap();
        store.open_sale(ProductId::new(99), 5).await.unwrap();

        for user in 1..=5 {
            let err = pipeline.submit(UserId::new(user), ProductId::new(99)).await.unwrap_err();
            assert_eq!(err, SeckillError::ProductNotFound(ProductId::new(99)));
        }

        assert_eq!(repository.product_calls(), 1);
        assert_eq!(store.stock(ProductId::new(99)), Some(5));
    }

    #[tokio::test]
    async fn intent_is_stamped_by_the_pipeline_clock() {
        let clock = FixedClock::new(test_clock().now() + chrono::Duration::minutes(5));
        let bus = InMemoryIntentBus::new();
        let pipeline = builder(&InMemoryFlashStore::new(), &bus, &repository())
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap();
        pipeline.open_sale(PRODUCT, Some(1)).await.unwrap();

        let admitted = pipeline.submit(UserId::new(7), PRODUCT).await.unwrap();

        assert_eq!(admitted.intent.enqueued_at, clock.now());
        assert_eq!(bus.published()[0].enqueued_at, clock.now());
    }

    #[tokio::test]
    async fn winner_is_queued_and_marked_in_both_modes() {
        for mode in [DedupMode::Sequential, DedupMode::Atomic] {
            let store = InMemoryFlashStore::new();
            let bus = InMemoryIntentBus::new();
            let pipeline = pipeline(&store, &bus, mode);
            pipeline.open_sale(PRODUCT, Some(2)).await.unwrap();

            let admitted = pipeline.submit(UserId::new(7), PRODUCT).await.unwrap();

            assert_eq!(admitted.product.name, "Phone");
            assert_eq!(bus.published(), vec![admitted.intent.clone()]);
            assert_eq!(store.stock(PRODUCT), Some(1));
            assert!(store.is_marked(UserId::new(7), PRODUCT));
        }
    }

    #[tokio::test]
    async fn repeat_buyer_does_not_touch_the_ledger() {
        for mode in [DedupMode::Sequential, DedupMode::Atomic] {
            let store = InMemoryFlashStore::new();
            let pipeline = pipeline(&store, &InMemoryIntentBus::new(), mode);
            pipeline.open_sale(PRODUCT, Some(5)).await.unwrap();
            pipeline.submit(UserId::new(7), PRODUCT).await.unwrap();

            let err = pipeline.submit(UserId::new(7), PRODUCT).await.unwrap_err();

            assert_eq!(err, SeckillError::AlreadyParticipated(PRODUCT));
            assert_eq!(store.stock(PRODUCT), Some(4));
        }
    }

    #[tokio::test]
    async fn failed_publish_gives_the_seat_back() {
        let store = InMemoryFlashStore::new();
        let bus = InMemoryIntentBus::new();
        let pipeline = pipeline(&store, &bus, DedupMode::Atomic);
        pipeline.open_sale(PRODUCT, Some(1)).await.unwrap();
        bus.fail_publish(true);

        let err = pipeline.submit(UserId::new(7), PRODUCT).await.unwrap_err();

        assert_eq!(err, SeckillError::SystemBusy);
        assert_eq!(store.stock(PRODUCT), Some(1));
        assert!(!store.is_marked(UserId::new(7), PRODUCT));

        bus.fail_publish(false);
        assert!(pipeline.submit(UserId::new(7), PRODUCT).await.is_ok());
    }

    #[tokio::test]
    async fn store_outage_is_surfaced_without_compensation() {
        let store = InMemoryFlashStore::new();
        let pipeline = pipeline(&store, &InMemoryIntentBus::new(), DedupMode::Atomic);
        pipeline.open_sale(PRODUCT, Some(1)).await.unwrap();
        store.fail_all(true);

        let err = pipeline.submit(UserId::new(7), PRODUCT).await.unwrap_err();

        assert!(matches!(err, SeckillError::Store(_)));
        assert_eq!(store.restore_calls(), 0);
    }
}
