mod common;

use common::{donation, harness, sale};
use rust_decimal_macros::dec;
use settlement_core::application::webhook::WebhookOutcome;
use settlement_core::domain::event::GatewayProvider;
use settlement_core::domain::transaction::{Actor, TransactionStatus};
use settlement_core::error::SettlementError;
use settlement_core::gateway::PaymentStatus;
use std::sync::Arc;
use tokio::task::JoinSet;

#[tokio::test]
async fn test_same_payload_twice_yields_identical_state() {
    let h = harness();
    let initiated = h.state.engine.initiate(sale("phone", dec!(1000))).await.unwrap();
    let id = initiated.transaction.id;
    let (payload, signature) = h.signed("payment.captured", &initiated.gateway_order_id);

    h.state
        .webhooks
        .handle_event(GatewayProvider::Simulated, &payload, Some(&signature))
        .await
        .unwrap();
    let after_first = h.transactions().get(id).await.unwrap();

    h.state
        .webhooks
        .handle_event(GatewayProvider::Simulated, &payload, Some(&signature))
        .await
        .unwrap();
    let after_second = h.transactions().get(id).await.unwrap();

    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn test_concurrent_duplicate_deliveries_apply_once() {
    let h = harness();
    let initiated = h
        .state
        .engine
        .initiate(donation("novel", dec!(750), "ngo-3"))
        .await
        .unwrap();
    let (payload, signature) = h.signed("payment.captured", &initiated.gateway_order_id);
    let payload = Arc::new(payload);

    let mut deliveries = JoinSet::new();
    for _ in 0..8 {
        let webhooks = h.state.webhooks.clone();
        let payload = payload.clone();
        let signature = signature.clone();
        deliveries.spawn(async move {
            webhooks
                .handle_event(GatewayProvider::Simulated, &payload, Some(&signature))
                .await
        });
    }

    let mut applied = 0;
    let mut duplicates = 0;
    while let Some(result) = deliveries.join_next().await {
        match result.unwrap().unwrap() {
            WebhookOutcome::Applied(_) => applied += 1,
            WebhookOutcome::Duplicate(_) => duplicates += 1,
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(duplicates, 7);
    assert_eq!(h.funds.total_for("ngo-3").await.value(), dec!(750));
}

#[tokio::test]
async fn test_completion_side_effects_dispatch_once_under_redelivery() {
    let h = harness();
    let initiated = h.state.engine.initiate(sale("laptop", dec!(2500))).await.unwrap();
    let id = initiated.transaction.id;

    h.webhook("payment.captured", &initiated.gateway_order_id)
        .await
        .unwrap();
    h.transactions()
        .transition(id, TransactionStatus::Completed, Actor::User("buyer".into()), None)
        .await
        .unwrap();
    for _ in 0..3 {
        let outcome = h
            .webhook("payment.captured", &initiated.gateway_order_id)
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Duplicate(_)));
    }
    assert_eq!(h.scoring.awards().await.len(), 2);
}

#[tokio::test]
async fn test_tampered_payload_is_rejected_without_mutation() {
    let h = harness();
    let initiated = h.state.engine.initiate(sale("phone", dec!(1000))).await.unwrap();
    let (_, signature) = h.signed("payment.failed", &initiated.gateway_order_id);
    let forged = settlement_core::gateway::simulated::SimulatedGateway::event_payload(
        "payment.captured",
        &initiated.gateway_order_id,
        None,
    );

    let err = h
        .state
        .webhooks
        .handle_event(GatewayProvider::Simulated, &forged, Some(&signature))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::InvalidSignature));
    assert_eq!(err.status_code(), 400);

    let tx = h.transactions().get(initiated.transaction.id).await.unwrap();
    assert_eq!(tx, initiated.transaction);
}

#[tokio::test]
async fn test_malformed_payload_is_a_validation_error() {
    let h = harness();
    let payload = b"not json".to_vec();
    let signature = h.gateway.sign(&payload);
    let err = h
        .state
        .webhooks
        .handle_event(GatewayProvider::Simulated, &payload, Some(&signature))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::Validation(_)));
}

#[tokio::test]
async fn test_reconcile_recovers_lost_webhook() {
    let h = harness();
    let initiated = h.state.engine.initiate(sale("phone", dec!(1000))).await.unwrap();
    h.gateway
        .set_status(&initiated.gateway_order_id, PaymentStatus::Failed)
        .await;

    let outcome = h
        .state
        .webhooks
        .reconcile(initiated.transaction.id)
        .await
        .unwrap();
    let WebhookOutcome::Applied(tx) = outcome else {
        panic!("reconciliation should apply the failure");
    };
    assert_eq!(tx.status, TransactionStatus::Cancelled);

    // The late webhook for the same failure is now a duplicate.
    assert!(matches!(
        h.webhook("payment.failed", &initiated.gateway_order_id).await.unwrap(),
        WebhookOutcome::Duplicate(_)
    ));
}

#[tokio::test]
async fn test_out_of_order_failure_does_not_cancel_a_paid_order() {
    let h = harness();
    let initiated = h.state.engine.initiate(sale("laptop", dec!(2000))).await.unwrap();
    h.webhook("payment.captured", &initiated.gateway_order_id)
        .await
        .unwrap();

    let outcome = h
        .webhook("payment.failed", &initiated.gateway_order_id)
        .await
        .unwrap();
    let WebhookOutcome::Superseded(tx) = outcome else {
        panic!("a failure after capture must be superseded");
    };
    assert_eq!(tx.status, TransactionStatus::Paid);

    let stored = h.transactions().get(initiated.transaction.id).await.unwrap();
    assert_eq!(stored.status, TransactionStatus::Paid);
    assert_eq!(
        h.catalog.availability("laptop").await,
        Some(settlement_core::infrastructure::in_memory::ItemAvailability::Sold)
    );
}
