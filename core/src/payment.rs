//! Payment events and reconciliation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AdjustmentId, ProductGrant, UserId};

/// Actor recorded on adjustments made by payment reconciliation.
pub const PAYMENTS_ACTOR: &str = "payments";

/// Event type for a captured payment.
pub const EVENT_PAYMENT_CAPTURED: &str = "payment.captured";

/// Event type for a paid order.
pub const EVENT_ORDER_PAID: &str = "order.paid";

/// Event type for a cancelled subscription.
pub const EVENT_SUBSCRIPTION_CANCELLED: &str = "subscription.cancelled";

/// A verified payment gateway event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// Gateway event type (e.g. `payment.captured`).
    pub event_type: String,

    /// Gateway payment ID. Idempotency key for reconciliation.
    pub payment_id: String,

    /// Gateway order ID.
    #[serde(default)]
    pub order_id: Option<String>,

    /// Paying user.
    pub uid: UserId,

    /// Purchased product.
    #[serde(default)]
    pub product_id: Option<String>,

    /// Amount paid, in the smallest currency unit.
    #[serde(default)]
    pub amount: i64,

    /// Gateway signature, if the event carried one inline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// What an event asks the reconciler to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentAction {
    /// Apply the purchased product.
    Fulfil,
    /// Deactivate the user's subscription.
    CancelSubscription,
    /// Acknowledge and do nothing.
    Ignore,
}

impl PaymentEvent {
    /// Classify the event by type.
    #[must_use]
    pub fn action(&self) -> PaymentAction {
        match self.event_type.as_str() {
            EVENT_PAYMENT_CAPTURED | EVENT_ORDER_PAID => PaymentAction::Fulfil,
            EVENT_SUBSCRIPTION_CANCELLED => PaymentAction::CancelSubscription,
            _ => PaymentAction::Ignore,
        }
    }
}

/// Idempotency marker for a reconciled payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedPayment {
    /// Gateway payment ID.
    pub payment_id: String,

    /// Gateway order ID.
    pub order_id: Option<String>,

    /// Paying user.
    pub user_id: UserId,

    /// Purchased product.
    pub product_id: String,

    /// Amount paid.
    pub amount: i64,

    /// Grant that was applied.
    pub grant: ProductGrant,

    /// When the grant was committed.
    pub processed_at: DateTime<Utc>,
}

/// Entry in the operator-facing payment failures feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailure {
    /// Failure ID (ULID).
    pub id: AdjustmentId,

    /// The event that could not be applied.
    pub event: PaymentEvent,

    /// Last error message.
    pub error: String,

    /// Attempts made before giving up.
    pub attempts: u32,

    /// When the reconciler gave up.
    pub failed_at: DateTime<Utc>,
}
