//! Handling of queue messages that do not decode into an intent.
//!
//! Such a message may still be an admitted buyer whose stock was already
//! taken, so it is never skipped: it is parked with its raw bytes, and only
//! a successful park lets the consumer commit past it. Without a sink, or
//! when parking fails, the message stays uncommitted and is read again.

use flashsale_core::dead_letter::DeadLetterSink;

/// What to do with the offset of an undecodable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Malformed {
    /// Parked; commit past it
    Parked,
    /// Not parked; rewind and read it again later
    Held,
}

/// `topic/partition/offset`, the dead-letter key of a raw message.
pub(crate) fn source(topic: &str, partition: i32, offset: i64) -> String {
    format!("{topic}/{partition}/{offset}")
}

pub(crate) async fn park(
    sink: Option<&dyn DeadLetterSink>,
    payload: &[u8],
    source: &str,
    error: &str,
    attempt: u32,
) -> Malformed {
    let Some(sink) = sink else {
        tracing::error!(source, error, "Undecodable intent payload and no dead-letter sink; holding offset");
        return Malformed::Held;
    };

    match sink.park_raw(payload, source, error, attempt).await {
        Ok(()) => {
            metrics::counter!("flashsale_malformed_intents_total").increment(1);
            tracing::error!(source, error, bytes = payload.len(), "Undecodable intent payload parked");
            Malformed::Parked
        }
        Err(park_err) => {
            tracing::error!(
                source,
                error,
                park_error = %park_err,
                "Failed to park undecodable intent payload; holding offset"
            );
            Malformed::Held
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flashsale_testing::InMemoryDeadLetters;

    #[tokio::test]
    async fn parked_payload_keeps_its_bytes() {
        let sink = InMemoryDeadLetters::new();

        let outcome = park(Some(&sink), b"{not json", "intents/2/17", "expected value", 1).await;

        assert_eq!(outcome, Malformed::Parked);
        let parked = sink.raw_entries();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].payload, b"{not json".to_vec());
        assert_eq!(parked[0].source, "intents/2/17");
    }

    #[tokio::test]
    async fn failed_park_holds_the_offset() {
        let sink = InMemoryDeadLetters::new();
        sink.fail(true);

        let outcome = park(Some(&sink), b"{not json", "intents/2/17", "expected value", 1).await;

        assert_eq!(outcome, Malformed::Held);
        assert!(sink.raw_entries().is_empty());
    }

    #[tokio::test]
    async fn missing_sink_holds_the_offset() {
        assert_eq!(park(None, b"?", "intents/0/0", "bad", 1).await, Malformed::Held);
    }

    #[test]
    fn source_names_the_queue_position() {
        assert_eq!(source("seckill-intents", 3, 99), "seckill-intents/3/99");
    }
}
