//! Authoritative order persistence.

use crate::error::SeckillError;
use crate::types::{Order, OrderNo, Product, ProductId, PurchaseIntent};
use async_trait::async_trait;
use thiserror::Error;

/// Errors from the order repository.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Authoritative stock is exhausted; the transaction was rolled back
    #[error("Insufficient authoritative stock for product {product_id}")]
    InsufficientStock {
        /// Product whose row was exhausted
        product_id: ProductId,
    },

    /// Product row does not exist
    #[error("Product {0} not found")]
    ProductNotFound(ProductId),

    /// Database or connection failure
    #[error("Database error: {0}")]
    Database(String),
}

impl RepositoryError {
    /// Whether another delivery of the same intent could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::ProductNotFound(_))
    }
}

/// Database failures surface as [`SeckillError::SystemBusy`].
impl From<RepositoryError> for SeckillError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::InsufficientStock { product_id } => Self::PersistenceConflict(product_id),
            RepositoryError::ProductNotFound(product_id) => Self::ProductNotFound(product_id),
            RepositoryError::Database(_) => Self::SystemBusy,
        }
    }
}

/// What materializing an intent did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaterializeOutcome {
    /// A new order was committed together with the stock decrement
    Created(Order),
    /// An order for this intent (or this buyer and product) already exists
    AlreadyExists(OrderNo),
}

impl MaterializeOutcome {
    /// Order number of the created or existing order.
    #[must_use]
    pub fn order_no(&self) -> &OrderNo {
        match self {
            Self::Created(order) => &order.order_no,
            Self::AlreadyExists(order_no) => order_no,
        }
    }
}

/// Transactional store of products and orders.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Look up a product.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] on connection or query failure.
    async fn product(&self, product_id: ProductId) -> Result<Option<Product>, RepositoryError>;

    /// Turn a winning intent into an order.
    ///
    /// In one transaction: lock the product row, return the existing order if
    /// the intent was already materialized, fail with
    /// [`RepositoryError::InsufficientStock`] if the row has no stock left,
    /// otherwise decrement the row and insert a pending-payment order.
    ///
    /// # Errors
    ///
    /// Returns a [`RepositoryError`]; nothing is written when it does.
    async fn materialize(
        &self,
        intent: &PurchaseIntent,
    ) -> Result<MaterializeOutcome, RepositoryError>;

    /// Cheap connectivity check for readiness probes.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the store is unreachable.
    async fn ping(&self) -> Result<(), RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_row_is_a_persistence_conflict() {
        let err = RepositoryError::InsufficientStock {
            product_id: ProductId::new(3),
        };
        assert!(err.is_retryable());
        assert_eq!(SeckillError::from(err), SeckillError::PersistenceConflict(ProductId::new(3)));
    }

    #[test]
    fn missing_product_is_final() {
        let err = RepositoryError::ProductNotFound(ProductId::new(3));
        assert!(!err.is_retryable());
        assert_eq!(SeckillError::from(err), SeckillError::ProductNotFound(ProductId::new(3)));
    }
}
