//! Durable intent queue abstraction.
//!
//! Purchase intents flow from the admission path to the order materializer
//! through an [`IntentBus`]. Delivery is at-least-once: a consumer sees every
//! intent at least once and possibly more, so the materializer must be
//! idempotent.
//!
//! ```text
//! ┌──────────────┐ publish ┌──────────────┐ subscribe ┌──────────────┐
//! │  Admission   │────────▶│ Durable Queue│──────────▶│ Materializer │
//! └──────────────┘         └──────────────┘           └──────┬───────┘
//!                                 ▲        ack / nack        │
//!                                 └──────────────────────────┘
//! ```
//!
//! Each [`Delivery`] carries an [`Acknowledger`]. `ack` consumes the message;
//! `nack` schedules a redelivery with [`Delivery::attempt`] incremented.
//! Dropping a delivery without settling it leaves it to the broker's
//! redelivery policy.
//!
//! # Implementations
//!
//! - `InMemoryIntentBus` in `flashsale-testing`
//! - `RedpandaIntentBus` in `flashsale-redpanda`

use crate::types::PurchaseIntent;
use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during intent bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntentBusError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Broker did not confirm the publish
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// Topic that failed
        topic: String,
        /// Reason for failure
        reason: String,
    },

    /// Publish was not confirmed within its deadline
    #[error("Publish timed out")]
    Timeout,

    /// Failed to subscribe
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    /// Payload could not be decoded as an intent
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Committing or republishing failed while settling a delivery
    #[error("Acknowledgement failed: {0}")]
    AckFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Boxed future returned by bus operations.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, IntentBusError>> + Send + 'a>>;

/// Stream of deliveries from a subscription.
pub type IntentStream = Pin<Box<dyn Stream<Item = Result<Delivery, IntentBusError>> + Send>>;

/// Settles one delivered message.
///
/// Both methods consume the acknowledger so a message is settled at most once.
pub trait Acknowledger: Send {
    /// Mark the message processed.
    fn ack(self: Box<Self>) -> BusFuture<'static, ()>;

    /// Request redelivery.
    fn nack(self: Box<Self>) -> BusFuture<'static, ()>;
}

/// One intent handed to a consumer.
pub struct Delivery {
    intent: PurchaseIntent,
    attempt: u32,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Wrap an intent with its delivery attempt (1-based) and acknowledger.
    #[must_use]
    pub fn new(intent: PurchaseIntent, attempt: u32, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            intent,
            attempt: attempt.max(1),
            acker,
        }
    }

    /// The delivered intent.
    #[must_use]
    pub const fn intent(&self) -> &PurchaseIntent {
        &self.intent
    }

    /// How many times this intent has been delivered, starting at 1.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Acknowledge the message.
    ///
    /// # Errors
    ///
    /// Returns [`IntentBusError::AckFailed`] if the broker rejects the commit.
    pub async fn ack(self) -> Result<PurchaseIntent, IntentBusError> {
        self.acker.ack().await?;
        Ok(self.intent)
    }

    /// Negatively acknowledge the message so it is delivered again.
    ///
    /// # Errors
    ///
    /// Returns [`IntentBusError::AckFailed`] if the redelivery cannot be scheduled.
    pub async fn nack(self) -> Result<PurchaseIntent, IntentBusError> {
        self.acker.nack().await?;
        Ok(self.intent)
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("intent", &self.intent)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// Durable at-least-once queue for purchase intents.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the bus can be shared as
/// `Arc<dyn IntentBus>` between the admission path and the worker pool.
pub trait IntentBus: Send + Sync {
    /// Publish an intent and wait until the broker has durably accepted it.
    ///
    /// # Errors
    ///
    /// Returns [`IntentBusError::PublishFailed`] or [`IntentBusError::Timeout`]
    /// if the broker did not confirm the write.
    fn publish<'a>(&'a self, intent: &'a PurchaseIntent) -> BusFuture<'a, ()>;

    /// Open a consumer. Consumers opened on the same bus compete for messages.
    ///
    /// # Errors
    ///
    /// Returns [`IntentBusError::SubscriptionFailed`] if the consumer cannot be created.
    fn subscribe(&self) -> BusFuture<'_, IntentStream>;
}
