//! Redpanda intent queue for the flash-sale pipeline.
//!
//! Implements [`IntentBus`] on top of rdkafka. Redpanda, Apache Kafka or any
//! Kafka-compatible broker works.
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits:
//! - The producer runs with `acks=all` and idempotence enabled; `publish`
//!   returns only after the broker confirmed the write
//! - Messages are keyed by product id, so intents for one product stay in
//!   order within a partition
//! - Consumers join one consumer group with auto-commit disabled; an offset
//!   is committed only when the materializer acks
//! - A nack republishes the intent with `x-delivery-attempt` incremented and
//!   then commits the original, bounding redelivery by attempt count
//! - A payload that does not decode is parked with its raw bytes in the
//!   configured [`DeadLetterSink`] before its offset is committed; if it
//!   cannot be parked the consumer rewinds and reads it again after
//!   `malformed_retry_delay`
//!
//! # Example
//!
//! ```no_run
//! use flashsale_redpanda::RedpandaIntentBus;
//! use flashsale_core::intent_bus::IntentBus;
//! use flashsale_core::{ProductId, PurchaseIntent, UserId, Utc};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaIntentBus::builder()
//!     .brokers("localhost:9092")
//!     .topic("seckill-intents")
//!     .consumer_group("order-materializer")
//!     .build()?;
//!
//! bus.publish(&PurchaseIntent::new(UserId::new(1), ProductId::new(2), Utc::now())).await?;
//!
//! let mut stream = bus.subscribe().await?;
//! while let Some(Ok(delivery)) = stream.next().await {
//!     println!("intent {}", delivery.intent().request_id);
//!     delivery.ack().await?;
//! }
//! # Ok(())
//! # }
//! ```

mod acker;
mod malformed;

pub use acker::{ATTEMPT_HEADER, attempt_from_headers, attempt_headers};

use acker::KafkaAcker;
use flashsale_core::PurchaseIntent;
use flashsale_core::dead_letter::DeadLetterSink;
use flashsale_core::intent_bus::{
    Acknowledger, BusFuture, Delivery, IntentBus, IntentBusError, IntentStream,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::sync::Arc;
use malformed::Malformed;
use std::time::Duration;

/// Default topic for purchase intents.
pub const DEFAULT_TOPIC: &str = "seckill-intents";

/// Redpanda-backed [`IntentBus`].
pub struct RedpandaIntentBus {
    producer: FutureProducer,
    brokers: String,
    topic: String,
    consumer_group: String,
    auto_offset_reset: String,
    timeout: Duration,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    malformed_retry_delay: Duration,
}

impl RedpandaIntentBus {
    /// Create a bus with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`IntentBusError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, IntentBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder.
    #[must_use]
    pub fn builder() -> RedpandaIntentBusBuilder {
        RedpandaIntentBusBuilder::default()
    }

    /// Configured broker list.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Topic intents are published to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn create_consumer(&self) -> Result<StreamConsumer, IntentBusError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| IntentBusError::SubscriptionFailed(format!("Failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[self.topic.as_str()])
            .map_err(|e| IntentBusError::SubscriptionFailed(format!("Failed to subscribe: {e}")))?;

        Ok(consumer)
    }
}

/// Builder for [`RedpandaIntentBus`].
#[derive(Default)]
pub struct RedpandaIntentBusBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    malformed_retry_delay: Option<Duration>,
}

impl RedpandaIntentBusBuilder {
    /// Broker list, e.g. `localhost:9092`.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Topic name (default: [`DEFAULT_TOPIC`]).
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Consumer group shared by all materializer workers (default: `order-materializer`).
    #[must_use]
    pub fn consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = Some(group.into());
        self
    }

    /// Where a new group starts reading (default: `earliest`).
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Producer compression codec (default: `none`).
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Publish and settle deadline (default: 5 seconds).
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Where undecodable payloads are parked. Without one they are never
    /// committed.
    #[must_use]
    pub fn dead_letters(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    /// Pause before rereading an undecodable payload that could not be
    /// parked (default: 5 seconds).
    #[must_use]
    pub const fn malformed_retry_delay(mut self, delay: Duration) -> Self {
        self.malformed_retry_delay = Some(delay);
        self
    }

    /// Build the bus.
    ///
    /// # Errors
    ///
    /// Returns [`IntentBusError::ConnectionFailed`] if brokers are missing or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaIntentBus, IntentBusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| IntentBusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let compression = self.compression.unwrap_or_else(|| "none".to_string());

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("compression.type", &compression)
            .create()
            .map_err(|e| IntentBusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let bus = RedpandaIntentBus {
            producer,
            brokers,
            topic: self.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            consumer_group: self
                .consumer_group
                .unwrap_or_else(|| "order-materializer".to_string()),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
            timeout,
            dead_letters: self.dead_letters,
            malformed_retry_delay: self
                .malformed_retry_delay
                .unwrap_or(Duration::from_secs(5)),
        };
        if bus.dead_letters.is_none() {
            tracing::warn!("RedpandaIntentBus has no dead-letter sink; undecodable payloads will block their partition");
        }

        tracing::info!(
            brokers = %bus.brokers,
            topic = %bus.topic,
            consumer_group = %bus.consumer_group,
            compression = %compression,
            "RedpandaIntentBus created"
        );

        Ok(bus)
    }
}

impl IntentBus for RedpandaIntentBus {
    fn publish<'a>(&'a self, intent: &'a PurchaseIntent) -> BusFuture<'a, ()> {
        Box::pin(async move {
            let payload = intent.to_json().map_err(|e| IntentBusError::PublishFailed {
                topic: self.topic.clone(),
                reason: format!("Failed to serialize intent: {e}"),
            })?;
            let key = intent.product_id.to_string();

            let record = FutureRecord::to(&self.topic)
                .payload(&payload)
                .key(&key)
                .headers(attempt_headers(1));

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %self.topic,
                        partition,
                        offset,
                        request_id = %intent.request_id,
                        "Intent published"
                    );
                    Ok(())
                }
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut), _)) => {
                    tracing::warn!(
                        topic = %self.topic,
                        request_id = %intent.request_id,
                        "Intent publish timed out"
                    );
                    Err(IntentBusError::Timeout)
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %self.topic,
                        request_id = %intent.request_id,
                        error = %kafka_error,
                        "Failed to publish intent"
                    );
                    Err(IntentBusError::PublishFailed {
                        topic: self.topic.clone(),
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(&self) -> BusFuture<'_, IntentStream> {
        Box::pin(async move {
            let consumer = Arc::new(self.create_consumer()?);
            let producer = self.producer.clone();
            let timeout = self.timeout;
            let dead_letters = self.dead_letters.clone();
            let retry_delay = self.malformed_retry_delay;

            tracing::info!(
                topic = %self.topic,
                consumer_group = %self.consumer_group,
                manual_commit = true,
                "Subscribed to intent topic"
            );

            // Explicit unit tail pins the stream body's output to `()`
            // (edition 2024 would otherwise infer `!` for the infinite loop).
            #[allow(unreachable_code)]
            let stream = async_stream::stream! {
                loop {
                    let message = match consumer.recv().await {
                        Ok(message) => message.detach(),
                        Err(e) => {
                            yield Err(IntentBusError::TransportError(format!(
                                "Failed to receive message: {e}"
                            )));
                            continue;
                        }
                    };

                    let attempt = attempt_from_headers(message.headers());
                    let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();

                    let acker = KafkaAcker {
                        consumer: Arc::clone(&consumer),
                        producer: producer.clone(),
                        topic: message.topic().to_string(),
                        partition: message.partition(),
                        offset: message.offset(),
                        key: message.key().map(<[u8]>::to_vec),
                        payload,
                        attempt,
                        timeout,
                    };

                    match PurchaseIntent::from_json(&acker.payload) {
                        Ok(intent) => {
                            tracing::trace!(
                                topic = %acker.topic,
                                partition = acker.partition,
                                offset = acker.offset,
                                attempt,
                                "Received intent"
                            );
                            yield Ok(Delivery::new(intent, attempt, Box::new(acker)));
                        }
                        Err(e) => {
                            let reason = e.to_string();
                            let source = malformed::source(&acker.topic, acker.partition, acker.offset);
                            match malformed::park(
                                dead_letters.as_deref(),
                                &acker.payload,
                                &source,
                                &reason,
                                attempt,
                            )
                            .await
                            {
                                Malformed::Parked => {
                                    if let Err(commit_err) = Box::new(acker).ack().await {
                                        tracing::warn!(%source, error = %commit_err, "Failed to commit past parked payload");
                                    }
                                }
                                Malformed::Held => {
                                    acker.rewind();
                                    tokio::time::sleep(retry_delay).await;
                                }
                            }
                            yield Err(IntentBusError::DeserializationFailed(reason));
                        }
                    }
                }
                ()
            };

            Ok(Box::pin(stream) as IntentStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_intent_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaIntentBus>();
        assert_sync::<RedpandaIntentBus>();
    }

    #[test]
    fn build_without_brokers_fails() {
        let result = RedpandaIntentBus::builder().topic("t").build();
        assert!(matches!(result, Err(IntentBusError::ConnectionFailed(_))));
    }
}
