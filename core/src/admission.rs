//! Admission gate: per-key request throttling in front of the ledger.

use crate::error::StoreError;
use async_trait::async_trait;
use std::time::Duration;

/// Decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request may proceed
    Allowed,
    /// Request is throttled; the caller should wait `retry_after`
    Denied {
        /// Suggested wait before retrying
        retry_after: Duration,
    },
}

impl Admission {
    /// Whether the request may proceed.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Per-key throttling decision.
///
/// Keys are opaque strings such as `seckill:203.0.113.9`.
#[async_trait]
pub trait AdmissionGate: Send + Sync {
    /// Decide whether one more request for `key` is admitted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when a shared-store backed gate cannot reach its
    /// store. Callers must treat that as a rejection (fail closed).
    async fn admit(&self, key: &str) -> Result<Admission, StoreError>;
}
