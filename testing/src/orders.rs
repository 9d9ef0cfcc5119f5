//! In-memory order repository and dead-letter sink.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use crate::mocks::test_clock;
use async_trait::async_trait;
use flashsale_core::dead_letter::DeadLetterSink;
use flashsale_core::environment::Clock;
use flashsale_core::orders::{MaterializeOutcome, OrderRepository, RepositoryError};
use flashsale_core::{Order, Product, ProductId, PurchaseIntent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    orders: Vec<Order>,
}

/// Products and orders behind one mutex, with the same rules as the
/// database transaction: existing order wins, then the stock check, then
/// decrement and insert.
///
/// # Fault injection
///
/// - [`fail_next`](Self::fail_next): the next `n` calls to `materialize`
///   return [`RepositoryError::Database`]
/// - [`fail_always`](Self::fail_always): every call fails until switched back
#[derive(Clone)]
pub struct InMemoryOrderRepository {
    tables: Arc<Mutex<Tables>>,
    clock: Arc<dyn Clock>,
    fail_next: Arc<AtomicU32>,
    fail_always: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
    product_calls: Arc<AtomicUsize>,
}

impl Default for InMemoryOrderRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOrderRepository {
    /// Create an empty repository using the fixed test clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(test_clock()))
    }

    /// Create an empty repository with the given clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            clock,
            fail_next: Arc::new(AtomicU32::new(0)),
            fail_always: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(AtomicUsize::new(0)),
            product_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add or replace a catalog row.
    #[must_use]
    pub fn with_product(self, product: Product) -> Self {
        self.upsert_product(product);
        self
    }

    /// Add or replace a catalog row.
    pub fn upsert_product(&self, product: Product) {
        self.tables.lock().unwrap().products.insert(product.id, product);
    }

    /// Fail the next `count` materializations.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Fail every materialization until switched back.
    pub fn fail_always(&self, fail: bool) {
        self.fail_always.store(fail, Ordering::SeqCst);
    }

    /// All committed orders.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.tables.lock().unwrap().orders.clone()
    }

    /// Authoritative stock of a product.
    #[must_use]
    pub fn stock(&self, product_id: ProductId) -> Option<i64> {
        self.tables
            .lock()
            .unwrap()
            .products
            .get(&product_id)
            .map(|product| product.stock)
    }

    /// Calls to `materialize`, failed ones included.
    #[must_use]
    pub fn materialize_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls to `product`.
    #[must_use]
    pub fn product_calls(&self) -> usize {
        self.product_calls.load(Ordering::SeqCst)
    }

    fn injected_failure(&self) -> bool {
        if self.fail_always.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn product(&self, product_id: ProductId) -> Result<Option<Product>, RepositoryError> {
        self.product_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tables.lock().unwrap().products.get(&product_id).cloned())
    }

    async fn materialize(
        &self,
        intent: &PurchaseIntent,
    ) -> Result<MaterializeOutcome, RepositoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.injected_failure() {
            return Err(RepositoryError::Database("injected fault".to_string()));
        }

        let mut tables = self.tables.lock().unwrap();
        let Tables { products, orders } = &mut *tables;

        let Some(product) = products.get_mut(&intent.product_id) else {
            return Err(RepositoryError::ProductNotFound(intent.product_id));
        };

        if let Some(existing) = orders.iter().find(|order| {
            order.request_id == intent.request_id
                || (order.user_id == intent.user_id && order.product_id == intent.product_id)
        }) {
            return Ok(MaterializeOutcome::AlreadyExists(existing.order_no.clone()));
        }

        if product.stock < 1 {
            return Err(RepositoryError::InsufficientStock {
                product_id: intent.product_id,
            });
        }

        product.stock -= 1;
        let order = Order::for_intent(intent, product, self.clock.now());
        orders.push(order.clone());
        Ok(MaterializeOutcome::Created(order))
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        if self.fail_always.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database("injected fault".to_string()));
        }
        Ok(())
    }
}

/// A parked intent as recorded by [`InMemoryDeadLetters`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParkedIntent {
    /// The intent
    pub intent: PurchaseIntent,
    /// Last failure
    pub error: String,
    /// Delivery attempts made
    pub attempts: u32,
}

/// An undecodable message as recorded by [`InMemoryDeadLetters`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParkedMessage {
    /// Raw payload bytes
    pub payload: Vec<u8>,
    /// Queue position
    pub source: String,
    /// Decode failure
    pub error: String,
    /// Delivery attempts made
    pub attempts: u32,
}

/// Dead-letter sink that keeps entries in vectors, one per request id or
/// per source.
#[derive(Clone, Default)]
pub struct InMemoryDeadLetters {
    entries: Arc<Mutex<Vec<ParkedIntent>>>,
    raw: Arc<Mutex<Vec<ParkedMessage>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryDeadLetters {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `park` fail until switched back.
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Parked entries.
    #[must_use]
    pub fn entries(&self) -> Vec<ParkedIntent> {
        self.entries.lock().unwrap().clone()
    }

    /// Parked undecodable messages.
    #[must_use]
    pub fn raw_entries(&self) -> Vec<ParkedMessage> {
        self.raw.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetters {
    async fn park(
        &self,
        intent: &PurchaseIntent,
        error: &str,
        attempts: u32,
    ) -> Result<(), RepositoryError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database("injected fault".to_string()));
        }

        let mut entries = self.entries.lock().unwrap();
        let parked = ParkedIntent {
            intent: intent.clone(),
            error: error.to_string(),
            attempts,
        };
        match entries
            .iter_mut()
            .find(|entry| entry.intent.request_id == intent.request_id)
        {
            Some(entry) => *entry = parked,
            None => entries.push(parked),
        }
        Ok(())
    }

    async fn park_raw(
        &self,
        payload: &[u8],
        source: &str,
        error: &str,
        attempts: u32,
    ) -> Result<(), RepositoryError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database("injected fault".to_string()));
        }

        let mut raw = self.raw.lock().unwrap();
        let parked = ParkedMessage {
            payload: payload.to_vec(),
            source: source.to_string(),
            error: error.to_string(),
            attempts,
        };
        match raw.iter_mut().find(|entry| entry.source == source) {
            Some(entry) => *entry = parked,
            None => raw.push(parked),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashsale_core::{UserId, Utc};

    fn phone(stock: i64) -> Product {
        Product {
            id: ProductId::new(1),
            name: "Phone".to_string(),
            price_cents: 19_900,
            stock,
        }
    }

    #[tokio::test]
    async fn materialize_is_idempotent_per_request() {
        let repo = InMemoryOrderRepository::new().with_product(phone(2));
        let intent = PurchaseIntent::new(UserId::new(1), ProductId::new(1), Utc::now());

        let first = repo.materialize(&intent).await.unwrap();
        let second = repo.materialize(&intent).await.unwrap();

        assert!(matches!(first, MaterializeOutcome::Created(_)));
        assert_eq!(second, MaterializeOutcome::AlreadyExists(first.order_no().clone()));
        assert_eq!(repo.stock(ProductId::new(1)), Some(1));
    }

    #[tokio::test]
    async fn exhausted_stock_is_reported() {
        let repo = InMemoryOrderRepository::new().with_product(phone(0));
        let intent = PurchaseIntent::new(UserId::new(1), ProductId::new(1), Utc::now());

        assert_eq!(
            repo.materialize(&intent).await,
            Err(RepositoryError::InsufficientStock {
                product_id: ProductId::new(1)
            })
        );
        assert!(repo.orders().is_empty());
    }

    #[tokio::test]
    async fn fail_next_counts_down() {
        let repo = InMemoryOrderRepository::new().with_product(phone(5));
        repo.fail_next(2);
        let intent = PurchaseIntent::new(UserId::new(1), ProductId::new(1), Utc::now());

        assert!(repo.materialize(&intent).await.is_err());
        assert!(repo.materialize(&intent).await.is_err());
        assert!(repo.materialize(&intent).await.is_ok());
        assert_eq!(repo.materialize_calls(), 3);
    }

    #[tokio::test]
    async fn parking_twice_keeps_one_entry() {
        let dlq = InMemoryDeadLetters::new();
        let intent = PurchaseIntent::new(UserId::new(1), ProductId::new(1), Utc::now());

        dlq.park(&intent, "first", 1).await.unwrap();
        dlq.park(&intent, "second", 2).await.unwrap();

        let entries = dlq.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].error, "second");
        assert_eq!(entries[0].attempts, 2);
    }
}
