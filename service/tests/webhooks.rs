//! Payment webhook integration tests.

mod common;

use common::TestHarness;
use serde_json::{json, Value};

use astro_ledger_core::CreditType;

fn captured(harness: &TestHarness, payment_id: &str, product_id: &str) -> Value {
    json!({
        "event_type": "payment.captured",
        "payment_id": payment_id,
        "order_id": format!("order_{payment_id}"),
        "uid": harness.test_user_id,
        "product_id": product_id,
        "amount": 19900
    })
}

#[tokio::test]
async fn credit_pack_purchase_grants_credits() {
    let harness = TestHarness::new();

    let response = harness
        .payment_webhook(&captured(&harness, "pay_001", "ai_guru_pack_5"))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["received"], true);
    assert_eq!(body["duplicate"], false);
    assert_eq!(body["outcome"], "credited");

    let account = harness
        .store
        .get_account(&harness.test_user_id)
        .unwrap()
        .unwrap();
    assert_eq!(account.balance(CreditType::AiGuru), 5);

    let history = harness
        .ledger
        .adjustments(&harness.test_user_id, 10, 0)
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].actor, "payments");
    assert_eq!(history[0].reference.as_deref(), Some("pay_001"));
}

#[tokio::test]
async fn duplicate_payment_grants_once() {
    let harness = TestHarness::new();
    let event = captured(&harness, "pay_dup", "kundali_pack_3");

    harness.payment_webhook(&event).await.assert_status_ok();
    let response = harness.payment_webhook(&event).await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["received"], true);
    assert_eq!(body["duplicate"], true);

    let account = harness
        .store
        .get_account(&harness.test_user_id)
        .unwrap()
        .unwrap();
    assert_eq!(account.balance(CreditType::Kundali), 3);
    assert!(harness.store.get_payment("pay_dup").unwrap().is_some());
}

#[tokio::test]
async fn unknown_product_is_acknowledged_and_recorded() {
    let harness = TestHarness::new();

    let response = harness
        .payment_webhook(&captured(&harness, "pay_bad", "crystal_ball"))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["outcome"], "failed");

    let failures: Value = harness
        .admin_get("/v1/admin/payments/failures")
        .await
        .json();
    assert_eq!(failures.as_array().unwrap().len(), 1);
    assert_eq!(failures[0]["event"]["payment_id"], "pay_bad");
    assert!(failures[0]["error"]
        .as_str()
        .unwrap()
        .contains("crystal_ball"));
}

#[tokio::test]
async fn renewal_extends_subscription() {
    let harness = TestHarness::new();

    for payment_id in ["pay_m1", "pay_m2"] {
        let body: Value = harness
            .payment_webhook(&captured(&harness, payment_id, "premium_monthly"))
            .await
            .json();
        assert_eq!(body["outcome"], "subscribed");
    }

    let subscription = harness
        .store
        .get_subscription(&harness.test_user_id)
        .unwrap()
        .unwrap();
    let remaining = subscription.expires_at.unwrap() - chrono::Utc::now();
    assert!(remaining > chrono::Duration::days(59));
    assert!(remaining <= chrono::Duration::days(60));
}

#[tokio::test]
async fn cancellation_ends_subscription_access() {
    let harness = TestHarness::new();
    harness
        .payment_webhook(&captured(&harness, "pay_sub", "premium_monthly"))
        .await
        .assert_status_ok();

    let body: Value = harness
        .payment_webhook(&json!({
            "event_type": "subscription.cancelled",
            "payment_id": "evt_cancel",
            "uid": harness.test_user_id
        }))
        .await
        .json();
    assert_eq!(body["outcome"], "cancelled");

    let decision: Value = harness
        .check(&harness.test_user_id, "kundali_report")
        .await
        .json();
    assert_eq!(decision["allowed"], false);
}

#[tokio::test]
async fn unrelated_events_are_ignored() {
    let harness = TestHarness::new();

    let body: Value = harness
        .payment_webhook(&json!({
            "event_type": "payment.failed",
            "payment_id": "pay_failed",
            "uid": harness.test_user_id,
            "product_id": "ai_guru_pack_5"
        }))
        .await
        .json();

    assert_eq!(body["outcome"], "ignored");
    assert!(harness
        .store
        .get_account(&harness.test_user_id)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn bad_signature_is_rejected() {
    let harness = TestHarness::new();
    let body = serde_json::to_vec(&captured(&harness, "pay_forged", "ai_guru_pack_20")).unwrap();

    harness
        .server
        .post("/webhooks/payments")
        .add_header("x-payment-signature", "sha256=00ff")
        .bytes(body.clone().into())
        .await
        .assert_status_unauthorized();
    harness
        .server
        .post("/webhooks/payments")
        .bytes(body.into())
        .await
        .assert_status_unauthorized();

    assert!(harness.store.get_payment("pay_forged").unwrap().is_none());
}

#[tokio::test]
async fn signed_garbage_is_bad_request() {
    let harness = TestHarness::new();

    harness
        .payment_webhook(&json!({ "hello": "world" }))
        .await
        .assert_status_bad_request();
}
