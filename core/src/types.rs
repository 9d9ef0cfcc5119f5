//! Domain types for the flash-sale pipeline.
//!
//! Identifiers are newtypes so a `UserId` can never be passed where a
//! `ProductId` is expected. [`PurchaseIntent`] is the wire shape of the queue
//! message and serializes to:
//!
//! ```json
//! {"user_id": 7, "product_id": 42, "request_id": "…", "enqueued_at": "…"}
//! ```

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Product identifier (authoritative catalog id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub i64);

impl ProductId {
    /// Create a new product id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Buyer identifier as forwarded by the authentication gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Create a new user id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique id of one admission attempt; the idempotency key downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Generate a fresh random request id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Human-facing order number, `SK<yyyymmddHHMMSS><6 digits>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNo(pub String);

impl OrderNo {
    /// Generate an order number for the given creation time.
    #[must_use]
    pub fn generate(at: DateTime<Utc>) -> Self {
        let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
        Self(format!("SK{}{suffix:06}", at.format("%Y%m%d%H%M%S")))
    }

    /// Borrow the order number as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Product facts the pipeline needs from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Product id
    pub id: ProductId,
    /// Display name
    pub name: String,
    /// Unit price in minor currency units
    pub price_cents: i64,
    /// Authoritative stock count
    pub stock: i64,
}

/// A provisional win that still needs to become a persisted order.
///
/// Immutable once published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseIntent {
    /// Winning buyer
    pub user_id: UserId,
    /// Product under sale
    pub product_id: ProductId,
    /// Idempotency key for downstream processing
    pub request_id: RequestId,
    /// When the intent was handed to the queue
    pub enqueued_at: DateTime<Utc>,
}

impl PurchaseIntent {
    /// Build an intent with a fresh request id.
    #[must_use]
    pub fn new(user_id: UserId, product_id: ProductId, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            product_id,
            request_id: RequestId::new(),
            enqueued_at,
        }
    }

    /// Encode as the JSON wire payload.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode from the JSON wire payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid intent.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Lifecycle status of an order row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created by the materializer, awaiting payment
    PendingPayment,
    /// Paid through the payment flow
    Paid,
    /// Cancelled (unpaid timeout or by the buyer)
    Cancelled,
}

impl OrderStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse status from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_payment" => Some(Self::PendingPayment),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Authoritative order row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order number
    pub order_no: OrderNo,
    /// Intent this order was materialized from
    pub request_id: RequestId,
    /// Buyer
    pub user_id: UserId,
    /// Product
    pub product_id: ProductId,
    /// Always 1 for flash-sale orders
    pub quantity: i32,
    /// `price_cents * quantity` at materialization time
    pub total_price_cents: i64,
    /// Current status
    pub status: OrderStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Build the pending-payment order for a winning intent.
    #[must_use]
    pub fn for_intent(intent: &PurchaseIntent, product: &Product, created_at: DateTime<Utc>) -> Self {
        Self {
            order_no: OrderNo::generate(created_at),
            request_id: intent.request_id,
            user_id: intent.user_id,
            product_id: intent.product_id,
            quantity: 1,
            total_price_cents: product.price_cents,
            status: OrderStatus::PendingPayment,
            created_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn intent_wire_shape_uses_snake_case_fields() {
        let intent = PurchaseIntent::new(UserId::new(7), ProductId::new(42), Utc::now());
        let value: serde_json::Value = serde_json::from_slice(&intent.to_json().unwrap()).unwrap();

        assert_eq!(value["user_id"], 7);
        assert_eq!(value["product_id"], 42);
        assert!(value["request_id"].is_string());
        assert!(value["enqueued_at"].is_string());
    }

    #[test]
    fn intent_rejects_garbage_payload() {
        assert!(PurchaseIntent::from_json(b"not json").is_err());
    }

    #[test]
    fn order_no_has_prefix_and_fixed_width() {
        let at = DateTime::parse_from_rfc3339("2025-01-01T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let order_no = OrderNo::generate(at);

        assert!(order_no.as_str().starts_with("SK20250101083000"));
        assert_eq!(order_no.as_str().len(), 2 + 14 + 6);
    }

    #[test]
    fn order_for_intent_is_single_unit_pending_payment() {
        let intent = PurchaseIntent::new(UserId::new(1), ProductId::new(2), Utc::now());
        let product = Product {
            id: ProductId::new(2),
            name: "Phone".to_string(),
            price_cents: 19_900,
            stock: 10,
        };

        let order = Order::for_intent(&intent, &product, Utc::now());

        assert_eq!(order.quantity, 1);
        assert_eq!(order.total_price_cents, 19_900);
        assert_eq!(order.status, OrderStatus::PendingPayment);
        assert_eq!(order.request_id, intent.request_id);
    }

    #[test]
    fn order_status_parse_rejects_unknown() {
        assert_eq!(OrderStatus::parse("paid"), Some(OrderStatus::Paid));
        assert_eq!(OrderStatus::parse("shipped"), None);
    }
}
