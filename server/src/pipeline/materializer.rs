//! Order materializer: turns queued intents into persisted orders.
//!
//! Per delivery:
//!
//! 1. Processed marker present → ack and skip
//! 2. Materialize through the persistence breaker; the repository is itself
//!    idempotent by request id and by (user, product). While the breaker is
//!    open the worker holds the delivery and waits for it, so an outage
//!    spends no delivery attempts. Stock conflicts are data problems and do
//!    not count against the breaker
//! 3. On success write the processed marker, then ack
//! 4. On failure nack for redelivery; on the final attempt (or for a failure
//!    no redelivery can fix) park the intent as a dead letter and ack
//!
//! Nothing is ever acked before it is either persisted or parked. When the
//! dead-letter store is down too, the nack waits `park_retry_delay` first.
//!
//! [`MaterializerPool`] runs `workers` independent loops, each with its own
//! subscription and one message in flight.

use flashsale_core::dead_letter::DeadLetterSink;
use flashsale_core::intent_bus::{Delivery, IntentBus, IntentBusError};
use flashsale_core::markers::ProcessedMarkers;
use flashsale_core::orders::{MaterializeOutcome, OrderRepository, RepositoryError};
use flashsale_core::{OrderNo, PurchaseIntent, SeckillError};
use flashsale_runtime::metrics::MaterializerMetrics;
use flashsale_runtime::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Shortest pause between tries while the persistence breaker is open.
const OPEN_BREAKER_POLL: Duration = Duration::from_millis(50);

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    /// Processed marker was already present
    Skipped(OrderNo),
    /// A new order was committed
    Created(OrderNo),
    /// The repository already held an order for this intent
    Duplicate(OrderNo),
    /// Nacked for redelivery
    Retrying {
        /// Attempt that failed
        attempt: u32,
    },
    /// Parked in the dead-letter store and acked
    DeadLettered {
        /// Attempts made
        attempts: u32,
    },
}

impl Handled {
    /// Metric label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Skipped(_) => "skipped",
            Self::Created(_) => "created",
            Self::Duplicate(_) => "duplicate",
            Self::Retrying { .. } => "retrying",
            Self::DeadLettered { .. } => "dead_lettered",
        }
    }
}

/// Handles single deliveries.
pub struct OrderMaterializer {
    repository: Arc<dyn OrderRepository>,
    markers: Arc<dyn ProcessedMarkers>,
    dead_letters: Arc<dyn DeadLetterSink>,
    breaker: CircuitBreaker,
    max_attempts: u32,
    marker_ttl: Duration,
    park_retry_delay: Duration,
}

impl OrderMaterializer {
    /// Create a materializer with a default `persistence` breaker, five
    /// attempts and a 24h marker TTL.
    #[must_use]
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        markers: Arc<dyn ProcessedMarkers>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            repository,
            markers,
            dead_letters,
            breaker: CircuitBreaker::new("persistence", CircuitBreakerConfig::default()),
            max_attempts: 5,
            marker_ttl: Duration::from_secs(86_400),
            park_retry_delay: Duration::from_secs(1),
        }
    }

    /// Use `breaker` around repository calls.
    #[must_use]
    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    /// Dead-letter on delivery `max_attempts` (at least 1).
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// TTL for processed markers.
    #[must_use]
    pub const fn with_marker_ttl(mut self, ttl: Duration) -> Self {
        self.marker_ttl = ttl;
        self
    }

    /// Pause before nacking a message whose dead-letter write failed.
    #[must_use]
    pub const fn with_park_retry_delay(mut self, delay: Duration) -> Self {
        self.park_retry_delay = delay;
        self
    }

    /// Process one delivery to completion, acking or nacking it.
    pub async fn handle(&self, delivery: Delivery) -> Handled {
        let started = Instant::now();
        let intent = delivery.intent().clone();
        let handled = self.process(delivery, &intent).await;

        MaterializerMetrics::record_duration(started.elapsed());
        MaterializerMetrics::record_outcome(handled.label());
        tracing::debug!(
            request_id = %intent.request_id,
            user_id = %intent.user_id,
            product_id = %intent.product_id,
            outcome = handled.label(),
            "Delivery handled"
        );
        handled
    }

    async fn process(&self, delivery: Delivery, intent: &PurchaseIntent) -> Handled {
        match self.markers.processed(intent.user_id, intent.product_id).await {
            Ok(Some(order_no)) => {
                settle_ack(delivery).await;
                return Handled::Skipped(order_no);
            }
            Ok(None) => {}
            Err(e) => {
                // The repository's own idempotency check still applies
                tracing::warn!(request_id = %intent.request_id, error = %e, "Processed marker lookup failed");
            }
        }

        match self.materialize(intent).await {
            Ok(outcome) => self.finish(delivery, intent, outcome).await,
            Err(CircuitBreakerError::Inner(err)) => {
                if let RepositoryError::InsufficientStock { product_id } = &err {
                    tracing::error!(
                        integrity_alert = true,
                        request_id = %intent.request_id,
                        user_id = %intent.user_id,
                        %product_id,
                        error = %SeckillError::PersistenceConflict(*product_id),
                        "Ledger admitted an intent the database cannot fill"
                    );
                }
                let retryable = err.is_retryable();
                self.fail(delivery, intent, &err.to_string(), retryable).await
            }
            Err(err) => self.fail(delivery, intent, &err.to_string(), true).await,
        }
    }

    /// Run the repository call, waiting out an open breaker.
    async fn materialize(
        &self,
        intent: &PurchaseIntent,
    ) -> Result<MaterializeOutcome, CircuitBreakerError<RepositoryError>> {
        let repository = &self.repository;
        let mut held = false;
        loop {
            let result = self
                .breaker
                .execute_classified(|| repository.materialize(intent), counts_against_breaker)
                .await;

            if !matches!(result, Err(CircuitBreakerError::Open { .. })) {
                return result;
            }

            let wait = self
                .breaker
                .retry_in()
                .await
                .unwrap_or_default()
                .max(OPEN_BREAKER_POLL);
            if !held {
                held = true;
                tracing::warn!(
                    request_id = %intent.request_id,
                    wait_ms = wait.as_millis(),
                    "Persistence breaker open, holding delivery"
                );
            }
            tokio::time::sleep(wait).await;
        }
    }

    async fn finish(
        &self,
        delivery: Delivery,
        intent: &PurchaseIntent,
        outcome: MaterializeOutcome,
    ) -> Handled {
        let order_no = outcome.order_no().clone();
        if let Err(e) = self
            .markers
            .record(intent.user_id, intent.product_id, &order_no, self.marker_ttl)
            .await
        {
            tracing::warn!(request_id = %intent.request_id, %order_no, error = %e, "Failed to record processed marker");
        }

        settle_ack(delivery).await;

        match outcome {
            MaterializeOutcome::Created(order) => {
                tracing::info!(
                    request_id = %intent.request_id,
                    order_no = %order.order_no,
                    user_id = %order.user_id,
                    product_id = %order.product_id,
                    "Order materialized"
                );
                Handled::Created(order.order_no)
            }
            MaterializeOutcome::AlreadyExists(order_no) => {
                tracing::debug!(request_id = %intent.request_id, %order_no, "Intent already materialized");
                Handled::Duplicate(order_no)
            }
        }
    }

    async fn fail(
        &self,
        delivery: Delivery,
        intent: &PurchaseIntent,
        error: &str,
        retryable: bool,
    ) -> Handled {
        let attempt = delivery.attempt();

        if retryable && attempt < self.max_attempts {
            tracing::warn!(request_id = %intent.request_id, attempt, error, "Materialization failed, will retry");
            settle_nack(delivery).await;
            return Handled::Retrying { attempt };
        }

        match self.dead_letters.park(intent, error, attempt).await {
            Ok(()) => {
                MaterializerMetrics::record_dead_letter();
                tracing::error!(
                    request_id = %intent.request_id,
                    user_id = %intent.user_id,
                    product_id = %intent.product_id,
                    attempts = attempt,
                    error,
                    "Intent dead-lettered"
                );
                settle_ack(delivery).await;
                Handled::DeadLettered { attempts: attempt }
            }
            Err(park_err) => {
                tracing::error!(
                    request_id = %intent.request_id,
                    error = %park_err,
                    retry_in_ms = self.park_retry_delay.as_millis(),
                    "Dead-letter write failed, leaving intent on the queue"
                );
                tokio::time::sleep(self.park_retry_delay).await;
                settle_nack(delivery).await;
                Handled::Retrying { attempt }
            }
        }
    }
}

/// Stock conflicts and missing products are answers from a healthy database.
const fn counts_against_breaker(err: &RepositoryError) -> bool {
    !matches!(
        err,
        RepositoryError::InsufficientStock { .. } | RepositoryError::ProductNotFound(_)
    )
}

async fn settle_ack(delivery: Delivery) {
    if let Err(e) = delivery.ack().await {
        // Redelivery is absorbed by the idempotency checks
        tracing::warn!(error = %e, "Failed to ack delivery");
    }
}

async fn settle_nack(delivery: Delivery) {
    if let Err(e) = delivery.nack().await {
        tracing::warn!(error = %e, "Failed to nack delivery");
    }
}

/// Fixed-size pool of materializer workers.
pub struct MaterializerPool {
    materializer: Arc<OrderMaterializer>,
    bus: Arc<dyn IntentBus>,
    workers: usize,
    reconnect_delay: Duration,
}

impl MaterializerPool {
    /// Pool of `workers` loops (at least one) consuming from `bus`.
    #[must_use]
    pub fn new(materializer: Arc<OrderMaterializer>, bus: Arc<dyn IntentBus>, workers: usize) -> Self {
        Self {
            materializer,
            bus,
            workers: workers.max(1),
            reconnect_delay: Duration::from_secs(5),
        }
    }

    /// Pause before resubscribing after the stream failed or ended.
    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Spawn every worker; each stops when `shutdown` fires, after finishing
    /// the message it holds.
    #[must_use]
    pub fn spawn(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        tracing::info!(workers = self.workers, "Starting materializer workers");
        (0..self.workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    materializer: Arc::clone(&self.materializer),
                    bus: Arc::clone(&self.bus),
                    shutdown: shutdown.subscribe(),
                    reconnect_delay: self.reconnect_delay,
                };
                tokio::spawn(worker.run())
            })
            .collect()
    }
}

struct Worker {
    id: usize,
    materializer: Arc<OrderMaterializer>,
    bus: Arc<dyn IntentBus>,
    shutdown: broadcast::Receiver<()>,
    reconnect_delay: Duration,
}

enum StreamEnd {
    Shutdown,
    Lost,
}

impl Worker {
    async fn run(mut self) {
        tracing::info!(worker = self.id, "Materializer worker started");

        loop {
            let subscribed = tokio::select! {
                _ = self.shutdown.recv() => break,
                subscribed = self.bus.subscribe() => subscribed,
            };

            match subscribed {
                Ok(mut stream) => {
                    tracing::debug!(worker = self.id, "Subscribed to intent queue");
                    if matches!(self.drain(&mut stream).await, StreamEnd::Shutdown) {
                        break;
                    }
                    tracing::warn!(
                        worker = self.id,
                        delay_ms = self.reconnect_delay.as_millis(),
                        "Intent stream ended, reconnecting"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        worker = self.id,
                        error = %e,
                        delay_ms = self.reconnect_delay.as_millis(),
                        "Failed to subscribe to intent queue, retrying"
                    );
                }
            }

            tokio::select! {
                _ = self.shutdown.recv() => break,
                () = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        tracing::info!(worker = self.id, "Materializer worker stopped");
    }

    async fn drain<S>(&mut self, stream: &mut S) -> StreamEnd
    where
        S: futures::Stream<Item = Result<Delivery, IntentBusError>> + Unpin,
    {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.recv() => return StreamEnd::Shutdown,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    self.materializer.handle(delivery).await;
                }
                Some(Err(IntentBusError::DeserializationFailed(reason))) => {
                    tracing::error!(worker = self.id, reason = %reason, "Undecodable intent on the queue");
                }
                Some(Err(e)) => {
                    tracing::warn!(worker = self.id, error = %e, "Intent stream error");
                }
                None => return StreamEnd::Lost,
            }
        }
    }
}
