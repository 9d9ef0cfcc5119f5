//! Processed markers: the consumer-side idempotency record.

use crate::error::StoreError;
use crate::types::{OrderNo, ProductId, UserId};
use async_trait::async_trait;
use std::time::Duration;

/// Shared `(user, product) -> order number` record written after an order
/// commits, so redelivered intents are acknowledged without touching the
/// database.
#[async_trait]
pub trait ProcessedMarkers: Send + Sync {
    /// Order number previously materialized for this pair, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    async fn processed(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<OrderNo>, StoreError>;

    /// Record a committed order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    async fn record(
        &self,
        user_id: UserId,
        product_id: ProductId,
        order_no: &OrderNo,
        ttl: Duration,
    ) -> Result<(), StoreError>;
}
