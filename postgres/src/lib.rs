//! `PostgreSQL` persistence for the flash-sale pipeline.
//!
//! This crate owns the authoritative side of a sale:
//!
//! - [`PostgresOrderRepository`]: products and orders, with the transactional
//!   stock decrement the order materializer relies on
//! - [`DeadLetterQueue`]: intents that exhausted their delivery attempts
//! - the schema, as embedded sqlx migrations (see [`migrate`])
//!
//! # Example
//!
//! ```no_run
//! use flashsale_postgres::{PostgresOrderRepository, connect, migrate};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = connect("postgres://localhost/flashsale", 10).await?;
//! migrate(&pool).await?;
//! let orders = PostgresOrderRepository::new(pool);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod dead_letter_queue;
mod orders;

pub use dead_letter_queue::{DLQStatus, DeadLetterQueue, FailedIntent};
pub use orders::PostgresOrderRepository;

use flashsale_core::orders::RepositoryError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`RepositoryError::Database`] if the database is unreachable.
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, RepositoryError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to connect: {e}")))?;

    tracing::info!(max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

/// Apply the embedded schema migrations.
///
/// # Errors
///
/// Returns [`RepositoryError::Database`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), RepositoryError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Migration failed: {e}")))?;

    tracing::info!("Database migrations complete");
    Ok(())
}

fn database_error(context: &str, error: &sqlx::Error) -> RepositoryError {
    RepositoryError::Database(format!("{context}: {error}"))
}
