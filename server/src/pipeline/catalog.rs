//! Read-through cache of sale products.
//!
//! Opening a sale loads the product row and keeps it here, so admission
//! answers with name and price without a database round trip. An instance
//! that did not open the sale itself loads the row once on first use, under
//! a short deadline and one load at a time. Missing rows are cached as well.

use flashsale_core::orders::{OrderRepository, RepositoryError};
use flashsale_core::{Product, ProductId, SeckillError};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;

/// Product rows for open sales.
pub struct SaleCatalog {
    repository: Arc<dyn OrderRepository>,
    products: RwLock<HashMap<ProductId, Option<Product>>>,
    loading: Mutex<()>,
    load_timeout: Duration,
}

impl SaleCatalog {
    /// Empty catalog backed by `repository`; loads on the admission path
    /// give up after `load_timeout`.
    #[must_use]
    pub fn new(repository: Arc<dyn OrderRepository>, load_timeout: Duration) -> Self {
        Self {
            repository,
            products: RwLock::new(HashMap::new()),
            loading: Mutex::new(()),
            load_timeout,
        }
    }

    fn cached(&self, product_id: ProductId) -> Option<Option<Product>> {
        self.products
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&product_id)
            .cloned()
    }

    /// Cached product, loading it on a miss.
    ///
    /// # Errors
    ///
    /// [`SeckillError::ProductNotFound`] when no such row exists,
    /// [`SeckillError::SystemBusy`] when the database cannot be reached or
    /// does not answer within the load deadline.
    pub async fn product(&self, product_id: ProductId) -> Result<Product, SeckillError> {
        if let Some(entry) = self.cached(product_id) {
            return entry.ok_or(SeckillError::ProductNotFound(product_id));
        }

        let _loading = self.loading.lock().await;
        // Another request may have loaded it while this one waited
        if let Some(entry) = self.cached(product_id) {
            return entry.ok_or(SeckillError::ProductNotFound(product_id));
        }

        match tokio::time::timeout(self.load_timeout, self.repository.product(product_id)).await {
            Ok(loaded) => self.store(product_id, loaded),
            Err(_) => {
                tracing::warn!(
                    %product_id,
                    timeout_ms = self.load_timeout.as_millis(),
                    "Product load timed out"
                );
                Err(SeckillError::SystemBusy)
            }
        }
    }

    /// Reload a product from the database and cache it.
    ///
    /// # Errors
    ///
    /// [`SeckillError::ProductNotFound`] or [`SeckillError::SystemBusy`].
    pub async fn refresh(&self, product_id: ProductId) -> Result<Product, SeckillError> {
        let loaded = self.repository.product(product_id).await;
        self.store(product_id, loaded)
    }

    fn store(
        &self,
        product_id: ProductId,
        loaded: Result<Option<Product>, RepositoryError>,
    ) -> Result<Product, SeckillError> {
        let product = loaded.map_err(|e| {
            tracing::error!(%product_id, error = %e, "Failed to load product");
            SeckillError::from(e)
        })?;

        self.products
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(product_id, product.clone());
        product.ok_or(SeckillError::ProductNotFound(product_id))
    }
}
