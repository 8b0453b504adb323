mod common;

use charge_connector::charges::{ChargeStatus, RefundStatus};
use charge_connector::database::ChargeStore;
use charge_connector::payments::types::RefundOutcome;
use charge_connector::services::notification_reconciler::DropReason;
use charge_connector::services::NotificationOutcome;
use common::{Harness, StaticResolver};
use serde_json::json;
use std::net::IpAddr;

fn payload(value: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&value).unwrap()
}

fn local() -> Option<IpAddr> {
    Some("127.0.0.1".parse().unwrap())
}

#[tokio::test]
async fn capture_confirmation_settles_charge() {
    let harness = Harness::new().await;
    let charge = harness.charge(ChargeStatus::CaptureSubmitted, Some("tx-1")).await;
    let reconciler = harness.reconciler(StaticResolver::default());

    let receipt = reconciler
        .reconcile(local(), "sandbox", &payload(json!({"transaction_id": "tx-1", "status": "CAPTURED"})))
        .await;

    assert!(receipt.accepted);
    assert_eq!(receipt.applied_count(), 1);
    assert_eq!(harness.status_of(&charge).await, ChargeStatus::Captured);
    assert_eq!(harness.notifier.terminal_statuses(), vec![ChargeStatus::Captured]);
}

#[tokio::test]
async fn redelivered_notification_changes_nothing() {
    let harness = Harness::new().await;
    let charge = harness.charge(ChargeStatus::CaptureSubmitted, Some("tx-again")).await;
    let reconciler = harness.reconciler(StaticResolver::default());
    let body = payload(json!({"transaction_id": "tx-again", "status": "CAPTURED"}));

    let first = reconciler.reconcile(local(), "sandbox", &body).await;
    assert_eq!(first.applied_count(), 1);
    let events_after_first = harness.memory.find_events(charge.id).await.unwrap().len();

    let second = reconciler.reconcile(local(), "sandbox", &body).await;

    assert!(second.accepted);
    assert!(matches!(
        second.outcomes.as_slice(),
        [NotificationOutcome::Ignored] | [NotificationOutcome::Dropped(DropReason::IllegalTransition { .. })]
    ));
    assert_eq!(harness.status_of(&charge).await, ChargeStatus::Captured);
    assert_eq!(harness.notifier.terminal_statuses(), vec![ChargeStatus::Captured]);
    assert_eq!(
        harness.memory.find_events(charge.id).await.unwrap().len(),
        events_after_first
    );
}

#[tokio::test]
async fn locked_charge_is_not_touched() {
    let harness = Harness::new().await;
    let charge = harness.charge(ChargeStatus::CaptureReady, Some("tx-locked")).await;
    let reconciler = harness.reconciler(StaticResolver::default());

    let receipt = reconciler
        .reconcile(local(), "sandbox", &payload(json!({"transaction_id": "tx-locked", "status": "CAPTURED"})))
        .await;

    assert!(receipt.accepted);
    assert_eq!(
        receipt.outcomes,
        vec![NotificationOutcome::Dropped(DropReason::Blacklisted {
            status: ChargeStatus::CaptureReady
        })]
    );
    assert_eq!(harness.status_of(&charge).await, ChargeStatus::CaptureReady);
}

#[tokio::test]
async fn cancellation_settles_into_the_submitting_flow() {
    let harness = Harness::new().await;
    let system = harness
        .charge(ChargeStatus::SystemCancelSubmitted, Some("tx-system"))
        .await;
    let expiring = harness
        .charge(ChargeStatus::ExpireCancelSubmitted, Some("tx-expire"))
        .await;
    let failing = harness
        .charge(ChargeStatus::UserCancelSubmitted, Some("tx-user"))
        .await;
    let captured = harness.charge(ChargeStatus::Captured, Some("tx-captured")).await;
    let reconciler = harness.reconciler(StaticResolver::default());

    let receipt = reconciler
        .reconcile(
            local(),
            "sandbox",
            &payload(json!([
                {"transaction_id": "tx-system", "status": "CANCELLED"},
                {"transaction_id": "tx-expire", "status": "CANCELLED"},
                {"transaction_id": "tx-user", "status": "CANCEL_FAILED"},
                {"transaction_id": "tx-captured", "status": "CANCELLED"},
            ])),
        )
        .await;

    assert_eq!(receipt.applied_count(), 3);
    assert_eq!(receipt.outcomes[3], NotificationOutcome::Unknown);
    assert_eq!(harness.status_of(&system).await, ChargeStatus::SystemCancelled);
    assert_eq!(harness.status_of(&expiring).await, ChargeStatus::Expired);
    assert_eq!(harness.status_of(&failing).await, ChargeStatus::UserCancelError);
    assert_eq!(harness.status_of(&captured).await, ChargeStatus::Captured);
}

#[tokio::test]
async fn unknown_and_ignored_statuses_change_nothing() {
    let harness = Harness::new().await;
    let charge = harness.charge(ChargeStatus::CaptureSubmitted, Some("tx-2")).await;
    let reconciler = harness.reconciler(StaticResolver::default());

    let receipt = reconciler
        .reconcile(
            local(),
            "sandbox",
            &payload(json!([
                {"transaction_id": "tx-2", "status": "SOMETHING_NEW"},
                {"transaction_id": "tx-2", "status": "PENDING"},
                {"transaction_id": "tx-unknown", "status": "CAPTURED"},
            ])),
        )
        .await;

    assert_eq!(
        receipt.outcomes,
        vec![
            NotificationOutcome::Unknown,
            NotificationOutcome::Ignored,
            NotificationOutcome::Dropped(DropReason::ChargeNotFound),
        ]
    );
    assert_eq!(harness.status_of(&charge).await, ChargeStatus::CaptureSubmitted);
}

#[tokio::test]
async fn illegal_transition_is_dropped() {
    let harness = Harness::new().await;
    let charge = harness.charge(ChargeStatus::UserCancelled, Some("tx-3")).await;
    let reconciler = harness.reconciler(StaticResolver::default());

    let receipt = reconciler
        .reconcile(local(), "sandbox", &payload(json!({"transaction_id": "tx-3", "status": "CAPTURED"})))
        .await;

    assert_eq!(
        receipt.outcomes,
        vec![NotificationOutcome::Dropped(DropReason::IllegalTransition {
            from: ChargeStatus::UserCancelled,
            to: ChargeStatus::Captured,
        })]
    );
    assert_eq!(harness.status_of(&charge).await, ChargeStatus::UserCancelled);
}

#[tokio::test]
async fn single_write_conflict_is_retried() {
    let (harness, store) = Harness::conflicting().await;
    let charge = harness.charge(ChargeStatus::CaptureSubmitted, Some("tx-race")).await;
    let reconciler = harness.reconciler(StaticResolver::default());
    store.fail_next_commits(1);

    let receipt = reconciler
        .reconcile(local(), "sandbox", &payload(json!({"transaction_id": "tx-race", "status": "CAPTURED"})))
        .await;

    assert_eq!(receipt.applied_count(), 1);
    assert_eq!(harness.status_of(&charge).await, ChargeStatus::Captured);
}

#[tokio::test]
async fn repeated_conflicts_drop_the_notification() {
    let (harness, store) = Harness::conflicting().await;
    let charge = harness.charge(ChargeStatus::CaptureSubmitted, Some("tx-race-2")).await;
    let reconciler = harness.reconciler(StaticResolver::default());
    store.fail_next_commits(2);

    let receipt = reconciler
        .reconcile(local(), "sandbox", &payload(json!({"transaction_id": "tx-race-2", "status": "CAPTURED"})))
        .await;

    assert_eq!(receipt.outcomes, vec![NotificationOutcome::Dropped(DropReason::Conflict)]);
    assert_eq!(harness.status_of(&charge).await, ChargeStatus::CaptureSubmitted);
}

#[tokio::test]
async fn retry_reinterprets_against_the_fresh_status() {
    let (harness, store) = Harness::conflicting().await;
    let charge = harness.charge(ChargeStatus::CaptureSubmitted, Some("tx-race-3")).await;
    let reconciler = harness.reconciler(StaticResolver::default());
    store.interleave(ChargeStatus::Captured);

    let receipt = reconciler
        .reconcile(local(), "sandbox", &payload(json!({"transaction_id": "tx-race-3", "status": "CAPTURED"})))
        .await;

    assert_eq!(receipt.outcomes, vec![NotificationOutcome::Ignored]);
    assert_eq!(harness.status_of(&charge).await, ChargeStatus::Captured);
}

#[tokio::test]
async fn untrusted_source_is_rejected() {
    let harness = Harness::new().await;
    harness.gateway.set_trusted_domain("gateway.example");
    let charge = harness.charge(ChargeStatus::CaptureSubmitted, Some("tx-4")).await;
    let reconciler = harness.reconciler(
        StaticResolver::default()
            .with_host("10.0.0.1", "notify.gateway.example")
            .with_host("10.0.0.2", "notify.attacker.example"),
    );
    let body = payload(json!({"transaction_id": "tx-4", "status": "CAPTURED"}));

    let rejected = reconciler
        .reconcile(Some("10.0.0.2".parse().unwrap()), "sandbox", &body)
        .await;
    assert!(!rejected.accepted);
    assert!(!reconciler.handle(None, "sandbox", &body).await);
    assert_eq!(harness.status_of(&charge).await, ChargeStatus::CaptureSubmitted);

    let accepted = reconciler
        .reconcile(Some("10.0.0.1".parse().unwrap()), "sandbox", &body)
        .await;
    assert!(accepted.accepted);
    assert_eq!(harness.status_of(&charge).await, ChargeStatus::Captured);
}

#[tokio::test]
async fn refund_notification_completes_submitted_refund() {
    let harness = Harness::new().await;
    harness.gateway.queue_refund(Ok(RefundOutcome::Submitted {
        reference: "refund-ref-1".to_string(),
    }));
    let charge = harness.charge(ChargeStatus::Captured, Some("tx-5")).await;
    let submitted = harness
        .refunds()
        .refund(&charge.external_id, 250, None)
        .await
        .unwrap();
    assert_eq!(submitted.status, RefundStatus::RefundSubmitted);

    let reconciler = harness.reconciler(StaticResolver::default());
    let receipt = reconciler
        .reconcile(
            local(),
            "sandbox",
            &payload(json!([
                {"transaction_id": "tx-5", "status": "REFUNDED", "reference": "refund-ref-1"},
                {"transaction_id": "tx-5", "status": "REFUNDED", "reference": "refund-ref-unknown"},
            ])),
        )
        .await;

    assert_eq!(receipt.applied_count(), 1);
    assert_eq!(receipt.outcomes[1], NotificationOutcome::Dropped(DropReason::RefundNotFound));

    let refunds = harness.memory.find_refunds_for_charge(charge.id).await.unwrap();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].status, RefundStatus::Refunded);
    assert_eq!(harness.status_of(&charge).await, ChargeStatus::Captured);

    let notified = harness.notifier.refunds.lock().unwrap().clone();
    assert_eq!(notified, vec![(submitted.refund_external_id.clone(), RefundStatus::Refunded)]);
}
