//! Stock ledger: the shared per-product counter under sale.
//!
//! The ledger is the single point of truth for "who won". It must only be
//! mutated through atomic store-side operations so that, for a ledger seeded
//! with `K` units, exactly `K` of any number of concurrent decrements succeed.
//!
//! # Script reply contract
//!
//! Store-side scripts return one integer:
//!
//! | reply | meaning |
//! |---|---|
//! | `>= 0` | decremented, value is the new remaining count |
//! | `-1` | insufficient stock, nothing mutated |
//! | `-2` | no counter for this product (sale not open or ended) |
//! | `-3` | buyer already holds a marker (claim only) |

use crate::error::StoreError;
use crate::types::{ProductId, UserId};
use async_trait::async_trait;
use std::time::Duration;

/// Reply code: insufficient stock.
pub const REPLY_INSUFFICIENT: i64 = -1;
/// Reply code: counter absent.
pub const REPLY_NOT_FOUND: i64 = -2;
/// Reply code: dedup marker already present.
pub const REPLY_ALREADY_CLAIMED: i64 = -3;

/// Result of a plain check-and-decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// Units were taken; `remaining` is what is left
    Decremented {
        /// Counter value after the decrement
        remaining: u64,
    },
    /// Not enough units left
    Insufficient,
    /// No counter exists for the product
    NotFound,
}

impl DecrementOutcome {
    /// Decode a decrement script reply.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnexpectedReply`] for codes outside the contract.
    pub fn from_reply(reply: i64) -> Result<Self, StoreError> {
        match reply {
            REPLY_INSUFFICIENT => Ok(Self::Insufficient),
            REPLY_NOT_FOUND => Ok(Self::NotFound),
            n if n >= 0 => Ok(Self::Decremented {
                remaining: n.unsigned_abs(),
            }),
            other => Err(StoreError::UnexpectedReply(format!(
                "decrement returned {other}"
            ))),
        }
    }
}

/// Result of an atomic dedup-check + decrement + mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Seat taken and marker written
    Claimed {
        /// Counter value after the decrement
        remaining: u64,
    },
    /// Not enough units left
    Insufficient,
    /// No counter exists for the product
    NotFound,
    /// Buyer already holds a marker; nothing mutated
    AlreadyClaimed,
}

impl ClaimOutcome {
    /// Decode a claim script reply.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnexpectedReply`] for codes outside the contract.
    pub fn from_reply(reply: i64) -> Result<Self, StoreError> {
        match reply {
            REPLY_INSUFFICIENT => Ok(Self::Insufficient),
            REPLY_NOT_FOUND => Ok(Self::NotFound),
            REPLY_ALREADY_CLAIMED => Ok(Self::AlreadyClaimed),
            n if n >= 0 => Ok(Self::Claimed {
                remaining: n.unsigned_abs(),
            }),
            other => Err(StoreError::UnexpectedReply(format!("claim returned {other}"))),
        }
    }
}

/// Shared stock counter per product.
///
/// # Thread Safety
///
/// Implementations are shared across all request tasks via `Arc<dyn StockLedger>`.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Seed (or overwrite) the counter for a product.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    async fn open_sale(&self, product_id: ProductId, stock: u64) -> Result<(), StoreError>;

    /// Atomically take `quantity` units if at least that many remain.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails. A denied decrement is
    /// an `Ok` outcome, not an error.
    async fn decrement(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<DecrementOutcome, StoreError>;

    /// Atomically check the buyer's dedup marker, take `quantity` units and
    /// write the marker with `marker_ttl`, all in one store-side operation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    async fn claim(
        &self,
        product_id: ProductId,
        user_id: UserId,
        quantity: u32,
        marker_ttl: Duration,
    ) -> Result<ClaimOutcome, StoreError>;

    /// Give `quantity` units back. Only applies while the counter exists, so a
    /// closed sale is never resurrected. Returns whether anything was restored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    async fn restore(&self, product_id: ProductId, quantity: u32) -> Result<bool, StoreError>;

    /// Current counter value, `None` if no sale is open.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store call fails.
    async fn remaining(&self, product_id: ProductId) -> Result<Option<u64>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrement_reply_codes() {
        assert_eq!(
            DecrementOutcome::from_reply(4),
            Ok(DecrementOutcome::Decremented { remaining: 4 })
        );
        assert_eq!(
            DecrementOutcome::from_reply(0),
            Ok(DecrementOutcome::Decremented { remaining: 0 })
        );
        assert_eq!(DecrementOutcome::from_reply(-1), Ok(DecrementOutcome::Insufficient));
        assert_eq!(DecrementOutcome::from_reply(-2), Ok(DecrementOutcome::NotFound));
        assert!(DecrementOutcome::from_reply(-3).is_err());
    }

    #[test]
    fn claim_reply_codes() {
        assert_eq!(ClaimOutcome::from_reply(-3), Ok(ClaimOutcome::AlreadyClaimed));
        assert_eq!(
            ClaimOutcome::from_reply(9),
            Ok(ClaimOutcome::Claimed { remaining: 9 })
        );
        assert!(ClaimOutcome::from_reply(-42).is_err());
    }
}
