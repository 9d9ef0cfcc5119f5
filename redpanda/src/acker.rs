//! Offset-commit acknowledgement and republish-based redelivery.

use flashsale_core::intent_bus::{Acknowledger, BusFuture, IntentBusError};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;

/// Header carrying the 1-based delivery attempt.
pub const ATTEMPT_HEADER: &str = "x-delivery-attempt";

/// Read the delivery attempt from message headers. Missing or garbled → 1.
pub fn attempt_from_headers<H: Headers>(headers: Option<&H>) -> u32 {
    headers
        .and_then(|headers| {
            headers
                .iter()
                .find(|header| header.key == ATTEMPT_HEADER)
                .and_then(|header| header.value)
        })
        .and_then(|raw| std::str::from_utf8(raw).ok())
        .and_then(|text| text.parse::<u32>().ok())
        .unwrap_or(1)
        .max(1)
}

/// Headers for a message on its `attempt`-th delivery.
#[must_use]
pub fn attempt_headers(attempt: u32) -> OwnedHeaders {
    let value = attempt.to_string();
    OwnedHeaders::new().insert(Header {
        key: ATTEMPT_HEADER,
        value: Some(value.as_bytes()),
    })
}

/// Settles one consumed message.
///
/// `ack` commits `offset + 1` for the message's partition. `nack` first
/// republishes the same payload with the attempt header incremented, then
/// commits, so the retry goes to the back of the partition instead of
/// blocking it.
pub(crate) struct KafkaAcker {
    pub(crate) consumer: Arc<StreamConsumer>,
    pub(crate) producer: FutureProducer,
    pub(crate) topic: String,
    pub(crate) partition: i32,
    pub(crate) offset: i64,
    pub(crate) key: Option<Vec<u8>>,
    pub(crate) payload: Vec<u8>,
    pub(crate) attempt: u32,
    pub(crate) timeout: Duration,
}

impl KafkaAcker {
    fn commit(&self) -> Result<(), IntentBusError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&self.topic, self.partition, Offset::Offset(self.offset + 1))
            .map_err(|e| IntentBusError::AckFailed(format!("Invalid offset: {e}")))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| IntentBusError::AckFailed(format!("Failed to commit offset: {e}")))
    }

    /// Rewind the consumer so the message is read again.
    pub(crate) fn rewind(&self) {
        if let Err(e) = self.consumer.seek(
            &self.topic,
            self.partition,
            Offset::Offset(self.offset),
            Timeout::After(self.timeout),
        ) {
            tracing::error!(
                topic = %self.topic,
                partition = self.partition,
                offset = self.offset,
                error = %e,
                "Failed to rewind consumer; message redelivers after rebalance"
            );
        }
    }
}

impl Acknowledger for KafkaAcker {
    fn ack(self: Box<Self>) -> BusFuture<'static, ()> {
        Box::pin(async move {
            self.commit()?;
            tracing::trace!(
                topic = %self.topic,
                partition = self.partition,
                offset = self.offset,
                "Message acknowledged"
            );
            Ok(())
        })
    }

    fn nack(self: Box<Self>) -> BusFuture<'static, ()> {
        Box::pin(async move {
            let next_attempt = self.attempt.saturating_add(1);
            let mut record = FutureRecord::to(&self.topic)
                .payload(&self.payload)
                .headers(attempt_headers(next_attempt));
            if let Some(key) = &self.key {
                record = record.key(key);
            }

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %self.topic,
                        partition,
                        offset,
                        attempt = next_attempt,
                        "Message requeued for redelivery"
                    );
                    self.commit()
                }
                Err((e, _)) => {
                    self.rewind();
                    Err(IntentBusError::AckFailed(format!(
                        "Failed to requeue message: {e}"
                    )))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_defaults_to_first_delivery() {
        assert_eq!(attempt_from_headers::<OwnedHeaders>(None), 1);
        assert_eq!(attempt_from_headers(Some(&OwnedHeaders::new())), 1);
    }

    #[test]
    fn attempt_reads_header() {
        let headers = attempt_headers(4);
        assert_eq!(attempt_from_headers(Some(&headers)), 4);
    }

    #[test]
    fn garbled_attempt_is_first_delivery() {
        let headers = OwnedHeaders::new().insert(Header {
            key: ATTEMPT_HEADER,
            value: Some("four".as_bytes()),
        });
        assert_eq!(attempt_from_headers(Some(&headers)), 1);
    }
}
