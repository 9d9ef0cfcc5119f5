//! Transactional order materialization.
//!
//! # Transaction
//!
//! ```text
//! BEGIN
//!   SELECT … FROM products WHERE id = $1 FOR UPDATE   -- serializes buyers of one product
//!   SELECT order_no FROM orders WHERE request_id = $2 OR (user_id, product_id) = ($3, $1)
//!   -- existing order → AlreadyExists (rollback)
//!   -- stock < 1      → InsufficientStock (rollback)
//!   UPDATE products SET stock = stock - 1
//!   INSERT INTO orders …
//! COMMIT
//! ```
//!
//! The existing-order lookup runs under the product row lock, so two
//! deliveries of the same intent cannot both pass it.

use crate::database_error;
use async_trait::async_trait;
use chrono::Utc;
use flashsale_core::orders::{MaterializeOutcome, OrderRepository, RepositoryError};
use flashsale_core::{Order, OrderNo, Product, ProductId, PurchaseIntent};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// `PostgreSQL`-backed [`OrderRepository`].
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert or update a catalog row. Used by seeding scripts and tests.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the upsert fails.
    pub async fn upsert_product(&self, product: &Product) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO products (id, name, price_cents, stock)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                price_cents = EXCLUDED.price_cents,
                stock = EXCLUDED.stock,
                updated_at = NOW()
            ",
        )
        .bind(product.id.get())
        .bind(&product.name)
        .bind(product.price_cents)
        .bind(product.stock)
        .execute(&self.pool)
        .await
        .map_err(|e| database_error("Failed to upsert product", &e))?;

        Ok(())
    }

    /// Count orders for a product.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the query fails.
    pub async fn count_orders(&self, product_id: ProductId) -> Result<i64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE product_id = $1")
            .bind(product_id.get())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| database_error("Failed to count orders", &e))?;

        Ok(count)
    }

    fn row_to_product(row: &PgRow) -> Product {
        Product {
            id: ProductId::new(row.get("id")),
            name: row.get("name"),
            price_cents: row.get("price_cents"),
            stock: row.get("stock"),
        }
    }

    /// Order number already recorded for this intent or this buyer and product.
    async fn existing_order(
        conn: &mut sqlx::PgConnection,
        intent: &PurchaseIntent,
    ) -> Result<Option<OrderNo>, RepositoryError> {
        let existing: Option<(String,)> = sqlx::query_as(
            r"
            SELECT order_no
            FROM orders
            WHERE request_id = $1 OR (user_id = $2 AND product_id = $3)
            LIMIT 1
            ",
        )
        .bind(intent.request_id.0)
        .bind(intent.user_id.get())
        .bind(intent.product_id.get())
        .fetch_optional(conn)
        .await
        .map_err(|e| database_error("Failed to look up existing order", &e))?;

        Ok(existing.map(|(order_no,)| OrderNo(order_no)))
    }

    async fn lookup_after_conflict(
        &self,
        intent: &PurchaseIntent,
    ) -> Result<MaterializeOutcome, RepositoryError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| database_error("Failed to acquire connection", &e))?;

        match Self::existing_order(&mut conn, intent).await? {
            Some(order_no) => Ok(MaterializeOutcome::AlreadyExists(order_no)),
            None => Err(RepositoryError::Database(
                "Unique violation without a matching order".to_string(),
            )),
        }
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn product(&self, product_id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, price_cents, stock FROM products WHERE id = $1")
            .bind(product_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| database_error("Failed to load product", &e))?;

        Ok(row.as_ref().map(Self::row_to_product))
    }

    async fn materialize(
        &self,
        intent: &PurchaseIntent,
    ) -> Result<MaterializeOutcome, RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| database_error("Failed to begin transaction", &e))?;

        let row = sqlx::query(
            "SELECT id, name, price_cents, stock FROM products WHERE id = $1 FOR UPDATE",
        )
        .bind(intent.product_id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| database_error("Failed to lock product", &e))?;

        // Dropping `tx` on any early return rolls back
        let Some(row) = row else {
            return Err(RepositoryError::ProductNotFound(intent.product_id));
        };
        let product = Self::row_to_product(&row);

        if let Some(order_no) = Self::existing_order(&mut tx, intent).await? {
            tracing::debug!(
                request_id = %intent.request_id,
                order_no = %order_no,
                "Intent already materialized"
            );
            return Ok(MaterializeOutcome::AlreadyExists(order_no));
        }

        if product.stock < 1 {
            return Err(RepositoryError::InsufficientStock {
                product_id: intent.product_id,
            });
        }

        sqlx::query("UPDATE products SET stock = stock - 1, updated_at = NOW() WHERE id = $1")
            .bind(product.id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| database_error("Failed to decrement stock", &e))?;

        let order = Order::for_intent(intent, &product, Utc::now());
        let inserted = sqlx::query(
            r"
            INSERT INTO orders (
                order_no, request_id, user_id, product_id,
                quantity, total_price_cents, status, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(order.order_no.as_str())
        .bind(order.request_id.0)
        .bind(order.user_id.get())
        .bind(order.product_id.get())
        .bind(order.quantity)
        .bind(order.total_price_cents)
        .bind(order.status.as_str())
        .bind(order.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            let unique_violation = e
                .as_database_error()
                .is_some_and(|db| db.is_unique_violation());
            drop(tx);
            if unique_violation {
                // Another transaction won between our lookup and insert
                return self.lookup_after_conflict(intent).await;
            }
            return Err(database_error("Failed to insert order", &e));
        }

        tx.commit()
            .await
            .map_err(|e| database_error("Failed to commit order", &e))?;

        tracing::info!(
            order_no = %order.order_no,
            request_id = %order.request_id,
            user_id = %order.user_id,
            product_id = %order.product_id,
            "Order materialized"
        );

        Ok(MaterializeOutcome::Created(order))
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| database_error("Ping failed", &e))?;
        Ok(())
    }
}
