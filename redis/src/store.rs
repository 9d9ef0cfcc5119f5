//! Redis-backed ledger, dedup guard and processed markers.

use crate::scripts::Scripts;
use crate::{bounded, keys};
use async_trait::async_trait;
use flashsale_core::dedup::DedupGuard;
use flashsale_core::ledger::{ClaimOutcome, DecrementOutcome, StockLedger};
use flashsale_core::markers::ProcessedMarkers;
use flashsale_core::{OrderNo, ProductId, StoreError, UserId};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// Shared store for the admission path and the materializer's idempotency check.
///
/// # Example
///
/// ```no_run
/// use flashsale_redis::RedisFlashStore;
/// use flashsale_core::ledger::StockLedger;
/// use flashsale_core::ProductId;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let conn = flashsale_redis::connect("redis://127.0.0.1:6379").await?;
/// let store = RedisFlashStore::new(conn, Duration::from_millis(200));
/// store.open_sale(ProductId::new(1), 100).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisFlashStore {
    conn_manager: ConnectionManager,
    scripts: Scripts,
    timeout: Duration,
}

impl RedisFlashStore {
    /// Wrap a connection. `timeout` bounds every call.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager, timeout: Duration) -> Self {
        Self {
            conn_manager,
            scripts: Scripts::new(),
            timeout,
        }
    }

    /// Round-trip check for readiness probes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if Redis does not answer in time.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let _pong: String = bounded("ping", self.timeout, async {
            redis::cmd("PING").query_async(&mut conn).await
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StockLedger for RedisFlashStore {
    async fn open_sale(&self, product_id: ProductId, stock: u64) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let key = keys::stock(product_id);

        let () = bounded("open_sale", self.timeout, conn.set(&key, stock)).await?;

        tracing::info!(product_id = %product_id, stock, "Flash sale opened");
        Ok(())
    }

    async fn decrement(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<DecrementOutcome, StoreError> {
        let mut conn = self.conn_manager.clone();
        let key = keys::stock(product_id);

        let reply: i64 = bounded(
            "decrement",
            self.timeout,
            self.scripts.decrement.key(&key).arg(quantity).invoke_async(&mut conn),
        )
        .await?;

        DecrementOutcome::from_reply(reply)
    }

    async fn claim(
        &self,
        product_id: ProductId,
        user_id: UserId,
        quantity: u32,
        marker_ttl: Duration,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut conn = self.conn_manager.clone();

        let reply: i64 = bounded(
            "claim",
            self.timeout,
            self.scripts
                .claim
                .key(keys::stock(product_id))
                .key(keys::dedup(product_id, user_id))
                .arg(quantity)
                .arg(marker_ttl.as_secs().max(1))
                .invoke_async(&mut conn),
        )
        .await?;

        ClaimOutcome::from_reply(reply)
    }

    async fn restore(&self, product_id: ProductId, quantity: u32) -> Result<bool, StoreError> {
        let mut conn = self.conn_manager.clone();
        let key = keys::stock(product_id);

        let restored: i64 = bounded(
            "restore",
            self.timeout,
            self.scripts.restore.key(&key).arg(quantity).invoke_async(&mut conn),
        )
        .await?;

        Ok(restored == 1)
    }

    async fn remaining(&self, product_id: ProductId) -> Result<Option<u64>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let key = keys::stock(product_id);

        let value: Option<i64> = bounded("remaining", self.timeout, conn.get(&key)).await?;
        Ok(value.map(|n| u64::try_from(n).unwrap_or(0)))
    }
}

#[async_trait]
impl DedupGuard for RedisFlashStore {
    async fn has_participated(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn_manager.clone();
        let key = keys::dedup(product_id, user_id);

        bounded("has_participated", self.timeout, conn.exists(&key)).await
    }

    async fn mark(
        &self,
        user_id: UserId,
        product_id: ProductId,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn_manager.clone();
        let key = keys::dedup(product_id, user_id);

        // SET NX replies nil when the marker already exists
        let created: Option<String> = bounded("mark", self.timeout, async {
            redis::cmd("SET")
                .arg(&key)
                .arg(1)
                .arg("NX")
                .arg("EX")
                .arg(ttl.as_secs().max(1))
                .query_async(&mut conn)
                .await
        })
        .await?;

        Ok(created.is_some())
    }

    async fn unmark(&self, user_id: UserId, product_id: ProductId) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let key = keys::dedup(product_id, user_id);

        let _removed: i64 = bounded("unmark", self.timeout, conn.del(&key)).await?;
        Ok(())
    }
}

#[async_trait]
impl ProcessedMarkers for RedisFlashStore {
    async fn processed(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<OrderNo>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let key = keys::processed(product_id, user_id);

        let value: Option<String> = bounded("processed", self.timeout, conn.get(&key)).await?;
        Ok(value.map(OrderNo))
    }

    async fn record(
        &self,
        user_id: UserId,
        product_id: ProductId,
        order_no: &OrderNo,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let key = keys::processed(product_id, user_id);

        let () = bounded(
            "record_processed",
            self.timeout,
            conn.set_ex(&key, order_no.as_str(), ttl.as_secs().max(1)),
        )
        .await?;
        Ok(())
    }
}
