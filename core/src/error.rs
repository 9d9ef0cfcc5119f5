//! Error taxonomy for the flash-sale pipeline.
//!
//! [`SeckillError`] is what the admission path and the materializer report.
//! Each variant tells the caller something different: "you lost the race"
//! (`SoldOut`, `AlreadyParticipated`) is final, while "try again shortly"
//! (`RateLimited`, `CircuitOpen`, `SystemBusy`, `Store`) is not.
//!
//! Infrastructure crates report their own narrower errors ([`StoreError`],
//! [`IntentBusError`](crate::intent_bus::IntentBusError),
//! [`RepositoryError`](crate::orders::RepositoryError)), which the pipeline
//! maps into [`SeckillError`].

use crate::types::ProductId;
use std::time::Duration;
use thiserror::Error;

/// Errors from the shared low-latency store (ledger, dedup, limiter).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store is unreachable or returned a transport error
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Round trip exceeded its deadline
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    /// A script returned a value outside its contract
    #[error("Unexpected script reply: {0}")]
    UnexpectedReply(String),
}

/// Domain errors surfaced by the flash-sale pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeckillError {
    /// Sale was never initialized for this product, or has been closed
    #[error("Flash sale for product {0} is not open")]
    NotOpen(ProductId),

    /// Ledger denied the decrement
    #[error("Product {0} is sold out")]
    SoldOut(ProductId),

    /// The buyer already holds a seat for this product
    #[error("User already participated in the flash sale for product {0}")]
    AlreadyParticipated(ProductId),

    /// Admission gate rejected the request
    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited {
        /// Suggested wait before retrying
        retry_after: Duration,
    },

    /// A downstream dependency is degraded and its breaker is open
    #[error("Circuit '{0}' is open")]
    CircuitOpen(String),

    /// Intent could not be queued after a successful decrement; the decrement
    /// was compensated and the caller may retry
    #[error("System busy, please retry")]
    SystemBusy,

    /// Authoritative stock is insufficient although the ledger admitted the
    /// intent; indicates cache/database divergence
    #[error("Persistence conflict: authoritative stock exhausted for product {0}")]
    PersistenceConflict(ProductId),

    /// Product does not exist in the catalog
    #[error("Product {0} not found")]
    ProductNotFound(ProductId),

    /// Shared store failed (fail closed)
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SeckillError {
    /// Whether the caller can reasonably retry the same request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::CircuitOpen(_) | Self::SystemBusy | Self::Store(_)
        )
    }

    /// Short machine-readable reason, used as a metrics label.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::NotOpen(_) => "not_open",
            Self::SoldOut(_) => "sold_out",
            Self::AlreadyParticipated(_) => "already_participated",
            Self::RateLimited { .. } => "rate_limited",
            Self::CircuitOpen(_) => "circuit_open",
            Self::SystemBusy => "system_busy",
            Self::PersistenceConflict(_) => "persistence_conflict",
            Self::ProductNotFound(_) => "product_not_found",
            Self::Store(_) => "store_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_race_is_not_retryable() {
        assert!(!SeckillError::SoldOut(ProductId::new(1)).is_retryable());
        assert!(!SeckillError::AlreadyParticipated(ProductId::new(1)).is_retryable());
    }

    #[test]
    fn degraded_dependencies_are_retryable() {
        assert!(SeckillError::SystemBusy.is_retryable());
        assert!(SeckillError::CircuitOpen("queue".into()).is_retryable());
        assert!(SeckillError::from(StoreError::Timeout(Duration::from_millis(50))).is_retryable());
    }

    #[test]
    fn display_mentions_product() {
        let err = SeckillError::NotOpen(ProductId::new(42));
        assert_eq!(err.to_string(), "Flash sale for product 42 is not open");
    }
}
