//! In-memory stand-in for the shared low-latency store.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use async_trait::async_trait;
use flashsale_core::dedup::DedupGuard;
use flashsale_core::ledger::{ClaimOutcome, DecrementOutcome, StockLedger};
use flashsale_core::markers::ProcessedMarkers;
use flashsale_core::{OrderNo, ProductId, StoreError, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct State {
    stock: HashMap<ProductId, u64>,
    dedup: HashSet<(UserId, ProductId)>,
    processed: HashMap<(UserId, ProductId), OrderNo>,
}

#[derive(Default)]
struct Faults {
    unavailable: AtomicBool,
    restore: AtomicBool,
    unmark: AtomicBool,
    record: AtomicBool,
}

/// Ledger, dedup guard and processed markers behind one mutex.
///
/// Every operation is atomic with respect to the others, matching the
/// store-side scripts. TTLs are accepted and ignored.
///
/// # Fault injection
///
/// - [`fail_all`](Self::fail_all): every call returns [`StoreError::Unavailable`]
/// - [`fail_restore`](Self::fail_restore) / [`fail_unmark`](Self::fail_unmark):
///   only the compensating calls fail
/// - [`fail_record`](Self::fail_record): processed-marker writes fail
#[derive(Clone, Default)]
pub struct InMemoryFlashStore {
    state: Arc<Mutex<State>>,
    faults: Arc<Faults>,
    restore_calls: Arc<AtomicUsize>,
}

impl InMemoryFlashStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail.
    pub fn fail_all(&self, fail: bool) {
        self.faults.unavailable.store(fail, Ordering::SeqCst);
    }

    /// Make `restore` fail.
    pub fn fail_restore(&self, fail: bool) {
        self.faults.restore.store(fail, Ordering::SeqCst);
    }

    /// Make `unmark` fail.
    pub fn fail_unmark(&self, fail: bool) {
        self.faults.unmark.store(fail, Ordering::SeqCst);
    }

    /// Make processed-marker writes fail.
    pub fn fail_record(&self, fail: bool) {
        self.faults.record.store(fail, Ordering::SeqCst);
    }

    /// Current counter, `None` if the sale is not open.
    #[must_use]
    pub fn stock(&self, product_id: ProductId) -> Option<u64> {
        self.state.lock().unwrap().stock.get(&product_id).copied()
    }

    /// Whether a dedup marker exists.
    #[must_use]
    pub fn is_marked(&self, user_id: UserId, product_id: ProductId) -> bool {
        self.state.lock().unwrap().dedup.contains(&(user_id, product_id))
    }

    /// Number of dedup markers for a product.
    #[must_use]
    pub fn marker_count(&self, product_id: ProductId) -> usize {
        self.state
            .lock()
            .unwrap()
            .dedup
            .iter()
            .filter(|(_, product)| *product == product_id)
            .count()
    }

    /// Number of `restore` calls, failed ones included.
    #[must_use]
    pub fn restore_calls(&self) -> usize {
        self.restore_calls.load(Ordering::SeqCst)
    }

    /// Close a sale by removing its counter.
    pub fn close_sale(&self, product_id: ProductId) {
        self.state.lock().unwrap().stock.remove(&product_id);
    }

    fn check(&self, flag: &AtomicBool, op: &str) -> Result<(), StoreError> {
        if self.faults.unavailable.load(Ordering::SeqCst) || flag.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("injected fault in {op}")));
        }
        Ok(())
    }

    fn check_available(&self, op: &str) -> Result<(), StoreError> {
        self.check(&self.faults.unavailable, op)
    }
}

#[async_trait]
impl StockLedger for InMemoryFlashStore {
    async fn open_sale(&self, product_id: ProductId, stock: u64) -> Result<(), StoreError> {
        self.check_available("open_sale")?;
        self.state.lock().unwrap().stock.insert(product_id, stock);
        Ok(())
    }

    async fn decrement(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<DecrementOutcome, StoreError> {
        self.check_available("decrement")?;
        let mut state = self.state.lock().unwrap();
        let Some(remaining) = state.stock.get_mut(&product_id) else {
            return Ok(DecrementOutcome::NotFound);
        };
        if *remaining < u64::from(quantity) {
            return Ok(DecrementOutcome::Insufficient);
        }
        *remaining -= u64::from(quantity);
        Ok(DecrementOutcome::Decremented {
            remaining: *remaining,
        })
    }

    async fn claim(
        &self,
        product_id: ProductId,
        user_id: UserId,
        quantity: u32,
        _marker_ttl: Duration,
    ) -> Result<ClaimOutcome, StoreError> {
        self.check_available("claim")?;
        let mut state = self.state.lock().unwrap();
        if state.dedup.contains(&(user_id, product_id)) {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }
        let Some(remaining) = state.stock.get_mut(&product_id) else {
            return Ok(ClaimOutcome::NotFound);
        };
        if *remaining < u64::from(quantity) {
            return Ok(ClaimOutcome::Insufficient);
        }
        *remaining -= u64::from(quantity);
        let remaining = *remaining;
        state.dedup.insert((user_id, product_id));
        Ok(ClaimOutcome::Claimed { remaining })
    }

    async fn restore(&self, product_id: ProductId, quantity: u32) -> Result<bool, StoreError> {
        self.restore_calls.fetch_add(1, Ordering::SeqCst);
        self.check(&self.faults.restore, "restore")?;
        let mut state = self.state.lock().unwrap();
        Ok(state.stock.get_mut(&product_id).is_some_and(|remaining| {
            *remaining += u64::from(quantity);
            true
        }))
    }

    async fn remaining(&self, product_id: ProductId) -> Result<Option<u64>, StoreError> {
        self.check_available("remaining")?;
        Ok(self.stock(product_id))
    }
}

#[async_trait]
impl DedupGuard for InMemoryFlashStore {
    async fn has_participated(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<bool, StoreError> {
        self.check_available("has_participated")?;
        Ok(self.is_marked(user_id, product_id))
    }

    async fn mark(
        &self,
        user_id: UserId,
        product_id: ProductId,
        _ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check_available("mark")?;
        Ok(self.state.lock().unwrap().dedup.insert((user_id, product_id)))
    }

    async fn unmark(&self, user_id: UserId, product_id: ProductId) -> Result<(), StoreError> {
        self.check(&self.faults.unmark, "unmark")?;
        self.state.lock().unwrap().dedup.remove(&(user_id, product_id));
        Ok(())
    }
}

#[async_trait]
impl ProcessedMarkers for InMemoryFlashStore {
    async fn processed(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<OrderNo>, StoreError> {
        self.check_available("processed")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .processed
            .get(&(user_id, product_id))
            .cloned())
    }

    async fn record(
        &self,
        user_id: UserId,
        product_id: ProductId,
        order_no: &OrderNo,
        _ttl: Duration,
    ) -> Result<(), StoreError> {
        self.check(&self.faults.record, "record_processed")?;
        self.state
            .lock()
            .unwrap()
            .processed
            .insert((user_id, product_id), order_no.clone());
        Ok(())
    }
}
