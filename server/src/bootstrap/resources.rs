//! Infrastructure setup.
//!
//! Connects every backing service once at startup. A dependency that cannot
//! be reached here fails startup; later outages are handled per call.

use super::gates::{distributed_gates, local_gates};
use crate::config::{AdmissionMode, Config};
use crate::server::RouteGates;
use flashsale_postgres::{DeadLetterQueue, PostgresOrderRepository};
use flashsale_redis::RedisFlashStore;
use flashsale_redpanda::RedpandaIntentBus;
use flashsale_runtime::{CircuitBreaker, KeyedTokenBucket};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Everything the pipeline and router are assembled from.
pub struct Resources {
    /// Stock ledger, dedup guard and processed markers
    pub store: RedisFlashStore,
    /// Orders and products
    pub orders: PostgresOrderRepository,
    /// Parked intents
    pub dead_letters: DeadLetterQueue,
    /// Intent queue
    pub bus: Arc<RedpandaIntentBus>,
    /// Breaker around publishing
    pub queue_breaker: CircuitBreaker,
    /// Breaker around materialization
    pub persistence_breaker: CircuitBreaker,
    /// Admission gates per route class
    pub gates: RouteGates,
    /// Local token buckets that need a janitor (empty in distributed mode)
    pub local_buckets: Vec<KeyedTokenBucket>,
}

impl Resources {
    /// Connect to `PostgreSQL` (with migrations), Redis and Redpanda.
    ///
    /// # Errors
    ///
    /// Returns error if a connection, a migration or the producer setup fails.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        info!("Connecting to PostgreSQL...");
        let pool =
            flashsale_postgres::connect(&config.postgres.url, config.postgres.max_connections)
                .await?;
        flashsale_postgres::migrate(&pool).await?;
        let orders = PostgresOrderRepository::new(pool.clone());
        let dead_letters = DeadLetterQueue::new(pool);

        info!("Connecting to Redis...");
        let redis_timeout = Duration::from_millis(config.redis.timeout_ms);
        let conn = flashsale_redis::connect(&config.redis.url).await?;
        let store = RedisFlashStore::new(conn.clone(), redis_timeout);
        store.ping().await?;

        info!(brokers = %config.redpanda.brokers, topic = %config.redpanda.topic, "Configuring intent bus...");
        let bus = Arc::new(
            RedpandaIntentBus::builder()
                .brokers(&config.redpanda.brokers)
                .topic(&config.redpanda.topic)
                .consumer_group(&config.redpanda.consumer_group)
                .compression(&config.redpanda.compression)
                .timeout(Duration::from_millis(config.redpanda.publish_timeout_ms))
                .dead_letters(Arc::new(dead_letters.clone()))
                .build()?,
        );

        let queue_breaker = CircuitBreaker::new("queue", config.breakers.queue.to_breaker_config());
        let persistence_breaker = CircuitBreaker::new(
            "persistence",
            config.breakers.persistence.to_breaker_config(),
        );

        let (gates, local_buckets) = match config.rate_limits.mode {
            AdmissionMode::Local => local_gates(&config.rate_limits),
            AdmissionMode::Distributed => (
                distributed_gates(&conn, &config.rate_limits, redis_timeout),
                Vec::new(),
            ),
        };
        info!(mode = ?config.rate_limits.mode, "Admission gates ready");

        Ok(Self {
            store,
            orders,
            dead_letters,
            bus,
            queue_breaker,
            persistence_breaker,
            gates,
            local_buckets,
        })
    }
}
