//! Dead Letter Queue (DLQ) for intents that could not be materialized.
//!
//! An intent lands here after exhausting its delivery attempts. The row keeps
//! the full payload plus the last failure so an operator can investigate,
//! replay or discard it. Parking is keyed by `request_id`: parking the same
//! intent twice updates the existing row.
//!
//! Queue messages that never decoded into an intent are parked with their raw
//! bytes, keyed by their queue position.

use crate::database_error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flashsale_core::dead_letter::DeadLetterSink;
use flashsale_core::orders::RepositoryError;
use flashsale_core::PurchaseIntent;
use sqlx::{PgPool, Row};

/// Status of a parked intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DLQStatus {
    /// Awaiting investigation
    Pending,
    /// Being replayed by an operator
    Processing,
    /// Replayed or otherwise settled
    Resolved,
    /// Permanently discarded
    Discarded,
}

impl DLQStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, RepositoryError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(RepositoryError::Database(format!("Invalid DLQ status: {s}"))),
        }
    }
}

/// A parked intent.
#[derive(Debug, Clone)]
pub struct FailedIntent {
    /// DLQ entry id
    pub id: i64,
    /// The intent as it was consumed; `None` for an undecodable message
    pub intent: Option<PurchaseIntent>,
    /// Raw bytes of an undecodable message
    pub raw_payload: Option<Vec<u8>>,
    /// Queue position of an undecodable message
    pub source: Option<String>,
    /// Last failure
    pub error_message: String,
    /// Delivery attempts made before parking
    pub attempts: i32,
    /// First time the intent was parked
    pub first_failed_at: DateTime<Utc>,
    /// Most recent park or status change
    pub last_failed_at: DateTime<Utc>,
    /// Current status
    pub status: DLQStatus,
    /// When the entry was resolved or discarded
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved it
    pub resolved_by: Option<String>,
    /// Operator notes
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-backed dead-letter store.
///
/// # Example
///
/// ```no_run
/// use flashsale_postgres::DeadLetterQueue;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let dlq = DeadLetterQueue::new(pool);
///
/// for entry in dlq.list_pending(100).await? {
///     println!("entry {} failed: {}", entry.id, entry.error_message);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DeadLetterQueue {
    pool: PgPool,
}

impl DeadLetterQueue {
    /// Create a DLQ over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// List pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<FailedIntent>, RepositoryError> {
        self.list_by_status(DLQStatus::Pending, limit).await
    }

    /// List entries with the given status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the query fails.
    pub async fn list_by_status(
        &self,
        status: DLQStatus,
        limit: usize,
    ) -> Result<Vec<FailedIntent>, RepositoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r"
            SELECT
                id, payload, raw_payload, source, error_message, attempts, status,
                first_failed_at, last_failed_at,
                resolved_at, resolved_by, resolution_notes
            FROM failed_intents
            WHERE status = $1
            ORDER BY first_failed_at ASC
            LIMIT $2
            ",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| database_error("Failed to list dead letters", &e))?;

        rows.iter().map(Self::row_to_failed_intent).collect()
    }

    /// Fetch one entry.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the query fails or no entry exists.
    pub async fn get_by_id(&self, id: i64) -> Result<FailedIntent, RepositoryError> {
        let row = sqlx::query(
            r"
            SELECT
                id, payload, raw_payload, source, error_message, attempts, status,
                first_failed_at, last_failed_at,
                resolved_at, resolved_by, resolution_notes
            FROM failed_intents
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| database_error("Failed to load dead letter", &e))?;

        Self::row_to_failed_intent(&row)
    }

    /// Mark an entry resolved.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the update fails.
    pub async fn mark_resolved(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            UPDATE failed_intents
            SET status = 'resolved',
                resolved_at = NOW(),
                resolved_by = $1,
                resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| database_error("Failed to resolve dead letter", &e))?;

        tracing::info!(dlq_id = id, resolved_by, "DLQ entry marked as resolved");
        metrics::counter!("flashsale_dead_letters_settled_total", "status" => "resolved")
            .increment(1);
        Ok(())
    }

    /// Number of pending entries.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, RepositoryError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM failed_intents WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| database_error("Failed to count dead letters", &e))?;

        Ok(count)
    }

    fn row_to_failed_intent(row: &sqlx::postgres::PgRow) -> Result<FailedIntent, RepositoryError> {
        let payload: Option<serde_json::Value> = row.get("payload");
        let intent = payload
            .map(serde_json::from_value::<PurchaseIntent>)
            .transpose()
            .map_err(|e| RepositoryError::Database(format!("Corrupt dead-letter payload: {e}")))?;

        let status: String = row.get("status");

        Ok(FailedIntent {
            id: row.get("id"),
            intent,
            raw_payload: row.get("raw_payload"),
            source: row.get("source"),
            error_message: row.get("error_message"),
            attempts: row.get("attempts"),
            first_failed_at: row.get("first_failed_at"),
            last_failed_at: row.get("last_failed_at"),
            status: DLQStatus::parse(&status)?,
            resolved_at: row.get("resolved_at"),
            resolved_by: row.get("resolved_by"),
            resolution_notes: row.get("resolution_notes"),
        })
    }
}

#[async_trait]
impl DeadLetterSink for DeadLetterQueue {
    async fn park(
        &self,
        intent: &PurchaseIntent,
        error: &str,
        attempts: u32,
    ) -> Result<(), RepositoryError> {
        let payload = serde_json::to_value(intent)
            .map_err(|e| RepositoryError::Database(format!("Failed to encode intent: {e}")))?;
        let attempts = i32::try_from(attempts).unwrap_or(i32::MAX);

        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO failed_intents (
                request_id, user_id, product_id, payload, error_message, attempts
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (request_id) DO UPDATE
            SET error_message = EXCLUDED.error_message,
                attempts = EXCLUDED.attempts,
                last_failed_at = NOW()
            RETURNING id
            ",
        )
        .bind(intent.request_id.0)
        .bind(intent.user_id.get())
        .bind(intent.product_id.get())
        .bind(payload)
        .bind(error)
        .bind(attempts)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| database_error("Failed to park intent", &e))?;

        tracing::warn!(
            dlq_id = id,
            request_id = %intent.request_id,
            user_id = %intent.user_id,
            product_id = %intent.product_id,
            error,
            attempts,
            "Intent added to Dead Letter Queue"
        );

        Ok(())
    }

    async fn park_raw(
        &self,
        payload: &[u8],
        source: &str,
        error: &str,
        attempts: u32,
    ) -> Result<(), RepositoryError> {
        let attempts = i32::try_from(attempts).unwrap_or(i32::MAX);

        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO failed_intents (raw_payload, source, error_message, attempts)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (source) DO UPDATE
            SET error_message = EXCLUDED.error_message,
                attempts = EXCLUDED.attempts,
                last_failed_at = NOW()
            RETURNING id
            ",
        )
        .bind(payload)
        .bind(source)
        .bind(error)
        .bind(attempts)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| database_error("Failed to park undecodable message", &e))?;

        tracing::error!(
            dlq_id = id,
            source,
            bytes = payload.len(),
            error,
            "Undecodable message added to Dead Letter Queue"
        );

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn dlq_status_parses_what_it_writes() {
        for status in [
            DLQStatus::Pending,
            DLQStatus::Processing,
            DLQStatus::Resolved,
            DLQStatus::Discarded,
        ] {
            let parsed = DLQStatus::parse(status.as_str()).expect("valid status should parse");
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn dlq_status_invalid() {
        assert!(DLQStatus::parse("retrying").is_err());
    }
}
