//! Dead-letter sink for intents that exhausted their delivery attempts.

use crate::orders::RepositoryError;
use crate::types::PurchaseIntent;
use async_trait::async_trait;

/// Parking lot for poisoned intents. Entries are kept for operator review.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Park an intent together with the last failure and attempt count.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the entry could not be written. The
    /// caller must then keep the message on the queue.
    async fn park(
        &self,
        intent: &PurchaseIntent,
        error: &str,
        attempts: u32,
    ) -> Result<(), RepositoryError>;

    /// Park a queue message whose payload could not be decoded as an intent.
    ///
    /// `source` identifies the message on the queue (topic, partition,
    /// offset); parking the same source twice keeps one entry.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the entry could not be written. The
    /// caller must then leave the message uncommitted.
    async fn park_raw(
        &self,
        payload: &[u8],
        source: &str,
        error: &str,
        attempts: u32,
    ) -> Result<(), RepositoryError>;
}
