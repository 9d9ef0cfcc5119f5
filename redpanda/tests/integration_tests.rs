//! Integration tests for [`RedpandaIntentBus`] against a real Kafka broker.
//!
//! Marked `#[ignore]`: they need Docker (testcontainers) and take a while to
//! start the broker.
//!
//! ```bash
//! cargo test -p flashsale-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use flashsale_core::intent_bus::IntentBus;
use flashsale_core::{ProductId, PurchaseIntent, UserId, Utc};
use flashsale_redpanda::RedpandaIntentBus;
use futures::StreamExt;
use std::time::Duration;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

async fn start_broker() -> (testcontainers::ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

fn bus(brokers: &str, topic: &str) -> RedpandaIntentBus {
    RedpandaIntentBus::builder()
        .brokers(brokers)
        .topic(topic)
        .consumer_group(format!("{topic}-materializer"))
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create intent bus")
}

/// Publish until the topic exists and the broker accepts writes.
async fn publish_with_warmup(bus: &RedpandaIntentBus, intent: &PurchaseIntent) {
    for attempt in 1..=60 {
        if bus.publish(intent).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(attempt != 60, "Broker never accepted the intent");
    }
}

#[tokio::test]
#[ignore]
async fn published_intent_is_delivered_and_acked() {
    let (_kafka, brokers) = start_broker().await;
    let bus = bus(&brokers, "intents-roundtrip");
    let intent = PurchaseIntent::new(UserId::new(1), ProductId::new(42), Utc::now());

    publish_with_warmup(&bus, &intent).await;

    let mut stream = bus.subscribe().await.expect("Failed to subscribe");
    let delivery = tokio::time::timeout(Duration::from_secs(30), stream.next())
        .await
        .expect("Timed out waiting for intent")
        .expect("Stream ended")
        .expect("Delivery failed");

    assert_eq!(delivery.intent(), &intent);
    assert_eq!(delivery.attempt(), 1);
    delivery.ack().await.expect("Ack failed");
}

#[tokio::test]
#[ignore]
async fn nack_redelivers_with_incremented_attempt() {
    let (_kafka, brokers) = start_broker().await;
    let bus = bus(&brokers, "intents-nack");
    let intent = PurchaseIntent::new(UserId::new(2), ProductId::new(7), Utc::now());

    publish_with_warmup(&bus, &intent).await;

    let mut stream = bus.subscribe().await.expect("Failed to subscribe");
    let first = tokio::time::timeout(Duration::from_secs(30), stream.next())
        .await
        .expect("Timed out waiting for intent")
        .expect("Stream ended")
        .expect("Delivery failed");
    assert_eq!(first.attempt(), 1);
    first.nack().await.expect("Nack failed");

    let second = tokio::time::timeout(Duration::from_secs(30), stream.next())
        .await
        .expect("Timed out waiting for redelivery")
        .expect("Stream ended")
        .expect("Delivery failed");

    assert_eq!(second.intent().request_id, intent.request_id);
    assert_eq!(second.attempt(), 2);
    second.ack().await.expect("Ack failed");
}
