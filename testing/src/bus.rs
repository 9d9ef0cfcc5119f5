//! In-memory intent queue.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use flashsale_core::intent_bus::{
    Acknowledger, BusFuture, Delivery, IntentBus, IntentBusError, IntentStream,
};
use flashsale_core::{PurchaseIntent, RequestId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Default)]
struct Shared {
    queue: Mutex<VecDeque<(PurchaseIntent, u32)>>,
    published: Mutex<Vec<PurchaseIntent>>,
    acked: Mutex<Vec<RequestId>>,
    nacked: Mutex<Vec<(RequestId, u32)>>,
    available: Notify,
    fail_publish: AtomicBool,
}

impl Shared {
    fn enqueue(&self, intent: PurchaseIntent, attempt: u32) {
        self.queue.lock().unwrap().push_back((intent, attempt));
        self.available.notify_one();
    }
}

/// Queue shared by every subscriber on the same bus.
///
/// Subscribers compete: each message goes to exactly one of them. `nack`
/// puts the intent at the back of the queue with its attempt incremented,
/// mirroring the broker's republish-then-commit redelivery.
///
/// # Example
///
/// ```
/// use flashsale_testing::InMemoryIntentBus;
/// use flashsale_core::intent_bus::IntentBus;
/// use flashsale_core::{ProductId, PurchaseIntent, UserId, Utc};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryIntentBus::new();
/// let intent = PurchaseIntent::new(UserId::new(1), ProductId::new(2), Utc::now());
/// bus.publish(&intent).await?;
///
/// let mut stream = bus.subscribe().await?;
/// let delivery = stream.next().await.unwrap()?;
/// assert_eq!(delivery.attempt(), 1);
/// delivery.ack().await?;
/// assert_eq!(bus.acked(), vec![intent.request_id]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryIntentBus {
    shared: Arc<Shared>,
}

impl InMemoryIntentBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `publish` fail until switched back.
    pub fn fail_publish(&self, fail: bool) {
        self.shared.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Every intent accepted by `publish`, in order.
    #[must_use]
    pub fn published(&self) -> Vec<PurchaseIntent> {
        self.shared.published.lock().unwrap().clone()
    }

    /// Request ids acknowledged so far, in order.
    #[must_use]
    pub fn acked(&self) -> Vec<RequestId> {
        self.shared.acked.lock().unwrap().clone()
    }

    /// Negative acknowledgements so far, with the attempt that was nacked.
    #[must_use]
    pub fn nacked(&self) -> Vec<(RequestId, u32)> {
        self.shared.nacked.lock().unwrap().clone()
    }

    /// Messages waiting for a consumer.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    /// Enqueue an intent as if it were being delivered for the `attempt`-th time.
    ///
    /// Bypasses the publish history and fault toggle.
    pub fn redeliver(&self, intent: PurchaseIntent, attempt: u32) {
        self.shared.enqueue(intent, attempt.max(1));
    }
}

impl IntentBus for InMemoryIntentBus {
    fn publish<'a>(&'a self, intent: &'a PurchaseIntent) -> BusFuture<'a, ()> {
        Box::pin(async move {
            if self.shared.fail_publish.load(Ordering::SeqCst) {
                return Err(IntentBusError::PublishFailed {
                    topic: "in-memory".to_string(),
                    reason: "injected fault".to_string(),
                });
            }
            self.shared.published.lock().unwrap().push(intent.clone());
            self.shared.enqueue(intent.clone(), 1);
            Ok(())
        })
    }

    fn subscribe(&self) -> BusFuture<'_, IntentStream> {
        let shared = Arc::clone(&self.shared);
        Box::pin(async move {
            // Explicit unit tail pins the stream body's output to `()`
            // (edition 2024 would otherwise infer `!` for the infinite loop).
            #[allow(unreachable_code)]
            let stream = async_stream::stream! {
                loop {
                    let next = shared.queue.lock().unwrap().pop_front();
                    match next {
                        Some((intent, attempt)) => {
                            let acker = InMemoryAcker {
                                shared: Arc::clone(&shared),
                                intent: intent.clone(),
                                attempt,
                            };
                            yield Ok(Delivery::new(intent, attempt, Box::new(acker)));
                        }
                        // A publish between the pop and this await leaves a
                        // stored permit, so the wakeup is not lost
                        None => shared.available.notified().await,
                    }
                }
                ()
            };
            Ok(Box::pin(stream) as IntentStream)
        })
    }
}

struct InMemoryAcker {
    shared: Arc<Shared>,
    intent: PurchaseIntent,
    attempt: u32,
}

impl Acknowledger for InMemoryAcker {
    fn ack(self: Box<Self>) -> BusFuture<'static, ()> {
        Box::pin(async move {
            self.shared.acked.lock().unwrap().push(self.intent.request_id);
            Ok(())
        })
    }

    fn nack(self: Box<Self>) -> BusFuture<'static, ()> {
        Box::pin(async move {
            self.shared
                .nacked
                .lock()
                .unwrap()
                .push((self.intent.request_id, self.attempt));
            self.shared
                .enqueue(self.intent.clone(), self.attempt.saturating_add(1));
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashsale_core::{ProductId, UserId, Utc};
    use futures::StreamExt;
    use std::time::Duration;

    fn intent(user: i64) -> PurchaseIntent {
        PurchaseIntent::new(UserId::new(user), ProductId::new(1), Utc::now())
    }

    #[tokio::test]
    async fn nack_redelivers_with_next_attempt() {
        let bus = InMemoryIntentBus::new();
        bus.publish(&intent(1)).await.unwrap();

        let mut stream = bus.subscribe().await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        first.nack().await.unwrap();

        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.attempt(), 2);
        second.ack().await.unwrap();

        assert_eq!(bus.nacked().len(), 1);
        assert_eq!(bus.acked().len(), 1);
        assert_eq!(bus.pending(), 0);
    }

    #[tokio::test]
    async fn subscribers_compete_for_messages() {
        let bus = InMemoryIntentBus::new();
        let mut a = bus.subscribe().await.unwrap();
        let mut b = bus.subscribe().await.unwrap();

        bus.publish(&intent(1)).await.unwrap();
        bus.publish(&intent(2)).await.unwrap();

        let first = a.next().await.unwrap().unwrap();
        let second = b.next().await.unwrap().unwrap();
        assert_ne!(first.intent().request_id, second.intent().request_id);

        // Nothing left for either
        let extra = tokio::time::timeout(Duration::from_millis(20), a.next()).await;
        assert!(extra.is_err());
    }

    #[tokio::test]
    async fn waiting_subscriber_wakes_on_publish() {
        let bus = InMemoryIntentBus::new();
        let mut stream = bus.subscribe().await.unwrap();

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish(&intent(3)).await.unwrap();
        });

        let delivery = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.intent().user_id, UserId::new(3));
    }

    #[tokio::test]
    async fn failing_publish_records_nothing() {
        let bus = InMemoryIntentBus::new();
        bus.fail_publish(true);

        assert!(bus.publish(&intent(1)).await.is_err());
        assert!(bus.published().is_empty());
        assert_eq!(bus.pending(), 0);
    }
}
