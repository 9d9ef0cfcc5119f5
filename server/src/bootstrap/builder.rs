//! Declarative application builder.
//!
//! ```rust,ignore
//! ApplicationBuilder::new()
//!     .with_config(Config::from_env())
//!     .with_metrics(MetricsRecorder::install()?)
//!     .with_resources().await?
//!     .build().await?
//!     .run().await?;
//! ```

use super::Resources;
use crate::api::AdminSecret;
use crate::config::Config;
use crate::pipeline::{MaterializerPool, OrderMaterializer, SeckillPipeline};
use crate::runtime::Application;
use crate::server::{AppState, RedisProbe, RepositoryProbe, build_router};
use anyhow::Context;
use flashsale_runtime::metrics::MetricsRecorder;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

/// Builder for a fully wired [`Application`].
///
/// Option fields record which steps ran; [`build`](Self::build) reports the
/// first missing one.
pub struct ApplicationBuilder {
    config: Option<Arc<Config>>,
    resources: Option<Resources>,
    metrics: Option<MetricsRecorder>,
}

impl ApplicationBuilder {
    /// Empty builder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            config: None,
            resources: None,
            metrics: None,
        }
    }

    /// Set application configuration. Call first.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(Arc::new(config));
        self
    }

    /// Serve `/metrics` from `recorder`.
    #[must_use]
    pub fn with_metrics(mut self, recorder: MetricsRecorder) -> Self {
        self.metrics = Some(recorder);
        self
    }

    /// Validate configuration and connect every backing service.
    ///
    /// # Errors
    ///
    /// Returns error if configuration is missing or invalid, or a dependency
    /// is unreachable.
    pub async fn with_resources(mut self) -> anyhow::Result<Self> {
        let config = self
            .config
            .as_ref()
            .context("with_config must be called before with_resources")?;
        config.validate().context("invalid configuration")?;
        self.resources = Some(Resources::from_config(config).await?);
        Ok(self)
    }

    /// Assemble pipeline, materializer pool and router, and bind the listener.
    ///
    /// # Errors
    ///
    /// Returns error if a step was skipped or the address cannot be bound.
    pub async fn build(self) -> anyhow::Result<Application> {
        let config = self.config.context("configuration not set")?;
        let resources = self.resources.context("resources not initialized")?;
        let seckill = &config.seckill;
        config.validate().context("invalid configuration")?;
        let admin_token = config.admin.token.as_deref().unwrap_or_default();

        let store = Arc::new(resources.store.clone());
        let orders = Arc::new(resources.orders.clone());

        let pipeline = SeckillPipeline::builder()
            .ledger(store.clone())
            .dedup(store.clone())
            .bus(resources.bus.clone())
            .repository(orders.clone())
            .queue_breaker(resources.queue_breaker.clone())
            .dedup_mode(seckill.dedup_mode)
            .marker_ttl(seckill.marker_ttl())
            .compensation_policy(seckill.compensation_policy())
            .catalog_timeout(seckill.catalog_timeout())
            .build()?;

        let materializer = OrderMaterializer::new(
            orders.clone(),
            store,
            Arc::new(resources.dead_letters),
        )
        .with_breaker(resources.persistence_breaker.clone())
        .with_max_attempts(seckill.max_delivery_attempts)
        .with_marker_ttl(seckill.marker_ttl());

        let pool = MaterializerPool::new(Arc::new(materializer), resources.bus, seckill.workers)
            .with_reconnect_delay(seckill.reconnect_delay());

        let mut state = AppState::new(Arc::new(pipeline), AdminSecret::new(admin_token))
            .with_probe(Arc::new(RedisProbe(resources.store)))
            .with_probe(Arc::new(RepositoryProbe(orders)))
            .with_breaker(resources.queue_breaker)
            .with_breaker(resources.persistence_breaker);
        if let Some(metrics) = self.metrics {
            state = state.with_metrics(metrics);
        }

        let router = build_router(state, &resources.gates);

        let address = config.server.address();
        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .with_context(|| format!("failed to bind {address}"))?;
        info!(address = %address, dedup_mode = ?seckill.dedup_mode, "Application assembled");

        let (shutdown_tx, _) = broadcast::channel(16);

        Ok(Application::new(listener, router, pool, shutdown_tx)
            .with_janitors(
                resources.local_buckets,
                Duration::from_secs(config.rate_limits.janitor_interval_secs),
            )
            .with_shutdown_timeout(Duration::from_secs(config.server.shutdown_timeout)))
    }
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self::new()
    }
}
