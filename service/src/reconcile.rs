//! Payment reconciliation.
//!
//! Turns verified payment gateway events into ledger grants or subscription
//! changes. Every grant is idempotent on `payment_id`: the processed marker
//! and the grant commit in the same store transaction.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use astro_ledger_core::{
    AdjustmentId, PaymentAction, PaymentEvent, PaymentFailure, ProductCatalog,
    SubscriptionRecord,
};
use astro_ledger_store::{ReconcileOutcome, Store, StoreError};

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub backoff_ms: u64,
    /// Multiplier applied per retry.
    pub backoff_factor: u64,
    /// Upper bound on any single delay.
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    /// Delay before retry number `retry_attempt` (zero-based):
    /// `backoff_ms * backoff_factor ^ retry_attempt`, capped.
    #[must_use]
    pub fn backoff(&self, retry_attempt: u32) -> Duration {
        let exponential = self
            .backoff_ms
            .saturating_mul(self.backoff_factor.saturating_pow(retry_attempt));
        Duration::from_millis(exponential.min(self.max_backoff_ms))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 200,
            backoff_factor: 2,
            max_backoff_ms: 5_000,
        }
    }
}

/// What the reconciler did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileResult {
    /// The grant was applied.
    Applied(ReconcileOutcome),

    /// The payment had already been reconciled; nothing changed.
    Duplicate,

    /// The subscription was deactivated (`None` if the user had none).
    Cancelled(Option<SubscriptionRecord>),

    /// The event type needs no action.
    Ignored,

    /// The event could not be applied and was written to the failures feed.
    Failed {
        /// Last error.
        error: String,
    },
}

impl ReconcileResult {
    /// Short label for responses and logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Applied(ReconcileOutcome::Credited(_)) => "credited",
            Self::Applied(ReconcileOutcome::Subscribed(_)) => "subscribed",
            Self::Duplicate => "duplicate",
            Self::Cancelled(_) => "cancelled",
            Self::Ignored => "ignored",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Applies payment events to the ledger.
#[derive(Clone)]
pub struct PaymentReconciler {
    store: Arc<dyn Store>,
    catalog: Arc<ProductCatalog>,
    retry: RetryConfig,
}

impl PaymentReconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, catalog: Arc<ProductCatalog>, retry: RetryConfig) -> Self {
        Self {
            store,
            catalog,
            retry,
        }
    }

    /// Handle one verified event.
    ///
    /// Never returns an error: failures end up in the failures feed so the
    /// webhook can always acknowledge receipt.
    pub async fn handle(&self, event: &PaymentEvent) -> ReconcileResult {
        match event.action() {
            PaymentAction::Ignore => {
                info!(
                    event_type = %event.event_type,
                    payment_id = %event.payment_id,
                    "Ignoring payment event"
                );
                ReconcileResult::Ignored
            }
            PaymentAction::CancelSubscription => self.cancel(event).await,
            PaymentAction::Fulfil => self.fulfil(event).await,
        }
    }

    async fn fulfil(&self, event: &PaymentEvent) -> ReconcileResult {
        // The payment id is the idempotency marker; a blank one would collide.
        if event.payment_id.trim().is_empty() {
            return self.fail(event, "payment event has no payment_id".into(), 1);
        }
        let Some(product_id) = event.product_id.as_deref() else {
            return self.fail(event, "payment event has no product_id".into(), 1);
        };
        let grant = match self.catalog.lookup(product_id) {
            Ok(grant) => grant.clone(),
            Err(err) => return self.fail(event, err.to_string(), 1),
        };

        let mut attempt = 0;
        loop {
            if attempt > 0 {
                tokio::time::sleep(self.retry.backoff(attempt - 1)).await;
                // An earlier attempt may have committed before reporting an error.
                match self.store.get_payment(&event.payment_id) {
                    Ok(Some(_)) => return self.duplicate(event),
                    Ok(None) => {}
                    Err(err) => warn!(
                        payment_id = %event.payment_id,
                        error = %err,
                        "Could not re-check payment marker"
                    ),
                }
            }

            match self.store.reconcile_payment(event, &grant) {
                Ok(outcome) => {
                    info!(
                        payment_id = %event.payment_id,
                        user_id = %event.uid,
                        product_id = %product_id,
                        attempts = attempt + 1,
                        "Payment reconciled"
                    );
                    return ReconcileResult::Applied(outcome);
                }
                Err(StoreError::DuplicatePayment { .. }) => return self.duplicate(event),
                Err(err) if err.is_transient() && attempt < self.retry.max_retries => {
                    warn!(
                        payment_id = %event.payment_id,
                        attempt = attempt + 1,
                        error = %err,
                        "Payment reconciliation failed, retrying"
                    );
                    attempt += 1;
                }
                Err(err) => return self.fail(event, err.to_string(), attempt + 1),
            }
        }
    }

    async fn cancel(&self, event: &PaymentEvent) -> ReconcileResult {
        let mut attempt = 0;
        loop {
            match self.store.cancel_subscription(&event.uid) {
                Ok(record) => {
                    info!(
                        user_id = %event.uid,
                        payment_id = %event.payment_id,
                        had_subscription = record.is_some(),
                        "Subscription cancelled"
                    );
                    return ReconcileResult::Cancelled(record);
                }
                Err(err) if err.is_transient() && attempt < self.retry.max_retries => {
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return self.fail(event, err.to_string(), attempt + 1),
            }
        }
    }

    fn duplicate(&self, event: &PaymentEvent) -> ReconcileResult {
        info!(payment_id = %event.payment_id, "Duplicate payment event ignored");
        ReconcileResult::Duplicate
    }

    fn fail(&self, event: &PaymentEvent, error: String, attempts: u32) -> ReconcileResult {
        error!(
            payment_id = %event.payment_id,
            user_id = %event.uid,
            attempts,
            error = %error,
            "Payment could not be reconciled"
        );

        let failure = PaymentFailure {
            id: AdjustmentId::generate(),
            event: event.clone(),
            error: error.clone(),
            attempts,
            failed_at: Utc::now(),
        };
        if let Err(err) = self.store.put_payment_failure(&failure) {
            error!(payment_id = %event.payment_id, error = %err, "Could not record payment failure");
        }

        ReconcileResult::Failed { error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use astro_ledger_core::{CreditType, UserId};
    use astro_ledger_store::RocksStore;
    use tempfile::TempDir;

    fn reconciler() -> (PaymentReconciler, Arc<dyn Store>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn Store> = Arc::new(RocksStore::open(dir.path()).unwrap());
        let reconciler = PaymentReconciler::new(
            store.clone(),
            Arc::new(ProductCatalog::default()),
            RetryConfig {
                max_retries: 2,
                backoff_ms: 1,
                backoff_factor: 2,
                max_backoff_ms: 4,
            },
        );
        (reconciler, store, dir)
    }

    fn event(event_type: &str, payment_id: &str, product_id: Option<&str>) -> PaymentEvent {
        PaymentEvent {
            event_type: event_type.into(),
            payment_id: payment_id.into(),
            order_id: None,
            uid: "buyer-1".parse().unwrap(),
            product_id: product_id.map(str::to_string),
            amount: 4900,
            signature: None,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let retry = RetryConfig {
            max_retries: 5,
            backoff_ms: 100,
            backoff_factor: 2,
            max_backoff_ms: 500,
        };
        assert_eq!(retry.backoff(0), Duration::from_millis(100));
        assert_eq!(retry.backoff(1), Duration::from_millis(200));
        assert_eq!(retry.backoff(2), Duration::from_millis(400));
        assert_eq!(retry.backoff(3), Duration::from_millis(500));
        assert_eq!(retry.backoff(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn credit_pack_is_granted_once() {
        let (reconciler, store, _dir) = reconciler();
        let paid = event("payment.captured", "pay_1", Some("kundali_pack_3"));

        let first = reconciler.handle(&paid).await;
        assert_eq!(first.label(), "credited");
        assert_eq!(reconciler.handle(&paid).await, ReconcileResult::Duplicate);

        let account = store.get_account(&paid.uid).unwrap().unwrap();
        assert_eq!(account.balance(CreditType::Kundali), 3);
    }

    #[tokio::test]
    async fn unknown_product_goes_to_failures_feed() {
        let (reconciler, store, _dir) = reconciler();
        let paid = event("order.paid", "pay_2", Some("crystal_ball"));

        let result = reconciler.handle(&paid).await;
        assert!(matches!(result, ReconcileResult::Failed { ref error } if error.contains("crystal_ball")));

        let failures = store.list_payment_failures(10, 0).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].event.payment_id, "pay_2");
        assert!(store.get_payment("pay_2").unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_product_goes_to_failures_feed() {
        let (reconciler, store, _dir) = reconciler();
        let result = reconciler
            .handle(&event("payment.captured", "pay_3", None))
            .await;
        assert_eq!(result.label(), "failed");
        assert_eq!(store.list_payment_failures(10, 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn blank_payment_ids_are_never_deduplicated() {
        let (reconciler, store, _dir) = reconciler();

        for payment_id in ["", "  "] {
            let result = reconciler
                .handle(&event("payment.captured", payment_id, Some("ai_guru_pack_5")))
                .await;
            assert!(matches!(result, ReconcileResult::Failed { ref error } if error.contains("payment_id")));
        }

        assert_eq!(store.list_payment_failures(10, 0).unwrap().len(), 2);
        assert!(store.get_payment("").unwrap().is_none());
        assert!(store.get_account(&"buyer-1".parse().unwrap()).unwrap().is_none());
    }

    #[tokio::test]
    async fn subscription_lifecycle() {
        let (reconciler, store, _dir) = reconciler();
        let user_id: UserId = "buyer-1".parse().unwrap();

        let result = reconciler
            .handle(&event("payment.captured", "pay_4", Some("premium_lifetime")))
            .await;
        assert_eq!(result.label(), "subscribed");
        let sub = store.get_subscription(&user_id).unwrap().unwrap();
        assert_eq!(sub.plan_id, "premium_lifetime");
        assert_eq!(sub.expires_at, None);

        let result = reconciler
            .handle(&event("subscription.cancelled", "evt_5", None))
            .await;
        assert!(matches!(result, ReconcileResult::Cancelled(Some(ref record)) if !record.active));
    }

    #[tokio::test]
    async fn other_events_are_ignored() {
        let (reconciler, store, _dir) = reconciler();
        let result = reconciler
            .handle(&event("payment.failed", "pay_6", Some("ai_guru_pack_5")))
            .await;
        assert_eq!(result, ReconcileResult::Ignored);
        assert!(store.get_account(&"buyer-1".parse().unwrap()).unwrap().is_none());
    }
}
