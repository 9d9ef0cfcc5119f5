//! Dedup guard: one seat per buyer per product.

use crate::error::StoreError;
use crate::types::{ProductId, UserId};
use async_trait::async_trait;
use std::time::Duration;

/// Shared per-(user, product) participation marker.
///
/// Absence of a marker means "has not won a seat".
#[async_trait]
pub trait DedupGuard: Send + Sync {
    /// Whether the buyer already holds a marker for the product.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    async fn has_participated(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<bool, StoreError>;

    /// Write the marker if absent. Returns `true` when this call created it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    async fn mark(
        &self,
        user_id: UserId,
        product_id: ProductId,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Remove the marker (compensation).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    async fn unmark(&self, user_id: UserId, product_id: ProductId) -> Result<(), StoreError>;
}
