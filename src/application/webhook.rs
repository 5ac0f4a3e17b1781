//! Gateway notifications, verified and applied exactly once.

use crate::application::state_machine::{EventApplication, TransactionService};
use crate::domain::event::{GatewayEvent, GatewayEventKind, GatewayProvider};
use crate::domain::transaction::Transaction;
use crate::error::{Result, SettlementError};
use crate::gateway::GatewayRegistry;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied(Transaction),
    /// Redelivery of an event the transaction already reflects.
    Duplicate(Transaction),
    /// Out-of-order event the transaction has moved past, e.g. a failed
    /// attempt reported after capture.
    Superseded(Transaction),
    Ignored(String),
}

pub struct WebhookReconciler {
    gateways: GatewayRegistry,
    transactions: Arc<TransactionService>,
}

impl WebhookReconciler {
    pub fn new(gateways: GatewayRegistry, transactions: Arc<TransactionService>) -> Self {
        Self {
            gateways,
            transactions,
        }
    }

    /// Verifies, parses and applies one delivery from `provider`.
    ///
    /// Nothing is read or written before the signature checks out.
    pub async fn handle_event(
        &self,
        provider: GatewayProvider,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome> {
        let gateway = self.gateways.get(provider)?;

        let verified = signature.is_some_and(|sig| gateway.verify_signature(payload, sig));
        if !verified {
            tracing::warn!(
                provider = %provider,
                signature_present = signature.is_some(),
                "Rejected webhook with invalid signature"
            );
            return Err(SettlementError::InvalidSignature);
        }

        let event = gateway.parse_event(payload)?;
        tracing::debug!(provider = %provider, event_id = ?event.event_id, kind = ?event.kind, "Webhook verified");
        self.apply(event).await
    }

    async fn apply(&self, event: GatewayEvent) -> Result<WebhookOutcome> {
        if let GatewayEventKind::Unhandled(event_type) = &event.kind {
            tracing::info!(provider = %event.provider, event_type = %event_type, "Ignoring webhook event");
            return Ok(WebhookOutcome::Ignored(event_type.clone()));
        }

        let reference = event.reference.as_deref().ok_or_else(|| {
            SettlementError::Validation("Webhook does not reference an order".to_string())
        })?;
        let tx = self.transactions.find_by_gateway_reference(reference).await?;
        if tx.gateway_provider.is_some_and(|p| p != event.provider) {
            return Err(SettlementError::Validation(format!(
                "Reference {} belongs to another gateway",
                reference
            )));
        }

        let outcome = match self
            .transactions
            .apply_gateway_event(tx.id, &event.kind, event.payment_id.as_deref())
            .await?
        {
            EventApplication::Applied(tx) => {
                tracing::info!(
                    transaction_id = %tx.id,
                    provider = %event.provider,
                    status = %tx.status,
                    "Webhook applied"
                );
                WebhookOutcome::Applied(tx)
            }
            EventApplication::AlreadyReflected(tx) => {
                tracing::info!(
                    transaction_id = %tx.id,
                    provider = %event.provider,
                    status = %tx.status,
                    "Duplicate webhook, nothing to do"
                );
                WebhookOutcome::Duplicate(tx)
            }
            EventApplication::Superseded(tx) => WebhookOutcome::Superseded(tx),
        };
        Ok(outcome)
    }

    /// Polls the gateway for a transaction whose webhook may have been lost.
    pub async fn reconcile(&self, id: Uuid) -> Result<WebhookOutcome> {
        let tx = self.transactions.get(id).await?;
        let (Some(provider), Some(reference)) = (tx.gateway_provider, tx.gateway_reference.clone())
        else {
            return Err(SettlementError::Validation(format!(
                "Transaction {} has no gateway order",
                id
            )));
        };

        let status = self
            .gateways
            .fetch_payment_status(provider, &reference)
            .await?;
        let Some(kind) = status.event_kind() else {
            return Ok(WebhookOutcome::Ignored(format!(
                "payment not settled yet ({:?})",
                status
            )));
        };

        self.apply(GatewayEvent {
            provider,
            kind,
            reference: Some(reference),
            payment_id: tx.gateway_payment_id,
            event_id: None,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::engine::SettlementEngine;
    use crate::application::state_machine::tests::{Fixture, fixture, sale_request};
    use crate::domain::money::Currency;
    use crate::domain::transaction::{Actor, TransactionStatus};
    use crate::gateway::PaymentStatus;
    use crate::gateway::simulated::SimulatedGateway;
    use crate::infrastructure::in_memory::ItemAvailability;
    use std::time::Duration;

    struct Harness {
        engine: SettlementEngine,
        webhooks: WebhookReconciler,
        gateway: Arc<SimulatedGateway>,
        f: Fixture,
    }

    fn harness() -> Harness {
        let f = fixture();
        let gateway = Arc::new(SimulatedGateway::new("whsec_test"));
        let registry = GatewayRegistry::new(Duration::from_secs(1)).register(gateway.clone());
        Harness {
            engine: SettlementEngine::new(f.service.clone(), registry.clone(), Currency::Inr),
            webhooks: WebhookReconciler::new(registry, f.service.clone()),
            gateway,
            f,
        }
    }

    async fn deliver(h: &Harness, event_type: &str, order_id: &str) -> Result<WebhookOutcome> {
        let payload = SimulatedGateway::event_payload(event_type, order_id, Some("pay_1"));
        let signature = h.gateway.sign(&payload);
        h.webhooks
            .handle_event(GatewayProvider::Simulated, &payload, Some(&signature))
            .await
    }

    #[tokio::test]
    async fn test_duplicate_failure_cancels_once() {
        let h = harness();
        let initiated = h.engine.initiate(sale_request("item-1")).await.unwrap();

        let first = deliver(&h, "payment.failed", &initiated.gateway_order_id)
            .await
            .unwrap();
        let WebhookOutcome::Applied(tx) = first else {
            panic!("first delivery should apply");
        };
        assert_eq!(tx.status, TransactionStatus::Cancelled);

        let second = deliver(&h, "payment.failed", &initiated.gateway_order_id)
            .await
            .unwrap();
        let WebhookOutcome::Duplicate(again) = second else {
            panic!("second delivery should be a no-op");
        };
        assert_eq!(again.version, tx.version);
    }

    #[tokio::test]
    async fn test_bad_signature_changes_nothing() {
        let h = harness();
        let initiated = h.engine.initiate(sale_request("item-1")).await.unwrap();
        let payload =
            SimulatedGateway::event_payload("payment.captured", &initiated.gateway_order_id, None);

        for signature in [Some("deadbeef"), None] {
            let err = h
                .webhooks
                .handle_event(GatewayProvider::Simulated, &payload, signature)
                .await
                .unwrap_err();
            assert!(matches!(err, SettlementError::InvalidSignature));
        }

        let tx = h.f.service.get(initiated.transaction.id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.version, initiated.transaction.version);
    }

    #[tokio::test]
    async fn test_capture_then_completion_scores_once() {
        let h = harness();
        let initiated = h.engine.initiate(sale_request("item-1")).await.unwrap();
        let id = initiated.transaction.id;

        for _ in 0..2 {
            deliver(&h, "payment.captured", &initiated.gateway_order_id)
                .await
                .unwrap();
        }
        let paid = h.f.service.get(id).await.unwrap();
        assert_eq!(paid.status, TransactionStatus::Paid);
        assert_eq!(paid.gateway_payment_id.as_deref(), Some("pay_1"));

        h.f.service
            .transition(id, TransactionStatus::Completed, Actor::User("buyer".into()), None)
            .await
            .unwrap();
        // A late capture after completion is still a duplicate.
        let late = deliver(&h, "payment.captured", &initiated.gateway_order_id)
            .await
            .unwrap();
        assert!(matches!(late, WebhookOutcome::Duplicate(_)));
        assert_eq!(h.f.scoring.awards().await.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_after_capture_keeps_payment() {
        let h = harness();
        let initiated = h.engine.initiate(sale_request("item-1")).await.unwrap();
        deliver(&h, "payment.captured", &initiated.gateway_order_id)
            .await
            .unwrap();

        let late = deliver(&h, "payment.failed", &initiated.gateway_order_id)
            .await
            .unwrap();
        let WebhookOutcome::Superseded(tx) = late else {
            panic!("a failure after capture must not apply");
        };
        assert_eq!(tx.status, TransactionStatus::Paid);
        assert_eq!(
            h.f.catalog.availability("item-1").await,
            Some(ItemAvailability::Sold)
        );
    }

    #[tokio::test]
    async fn test_capture_redelivered_during_dispute() {
        let h = harness();
        let initiated = h.engine.initiate(sale_request("item-1")).await.unwrap();
        let id = initiated.transaction.id;
        deliver(&h, "payment.captured", &initiated.gateway_order_id)
            .await
            .unwrap();
        let disputed = h
            .f
            .service
            .dispute(id, "item damaged", Actor::User("buyer".into()))
            .await
            .unwrap();

        let again = deliver(&h, "payment.captured", &initiated.gateway_order_id)
            .await
            .unwrap();
        let WebhookOutcome::Duplicate(tx) = again else {
            panic!("capture is already reflected");
        };
        assert_eq!(tx, disputed);
    }

    #[tokio::test]
    async fn test_unknown_reference_and_unhandled_type() {
        let h = harness();
        assert!(matches!(
            deliver(&h, "payment.captured", "sim_order_404").await,
            Err(SettlementError::NotFound(_))
        ));
        assert!(matches!(
            deliver(&h, "order.notified", "sim_order_404").await,
            Ok(WebhookOutcome::Ignored(_))
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_provider() {
        let h = harness();
        let err = h
            .webhooks
            .handle_event(GatewayProvider::Stripe, b"{}", Some("t=1,v1=00"))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reconcile_polls_gateway() {
        let h = harness();
        let initiated = h.engine.initiate(sale_request("item-1")).await.unwrap();
        let id = initiated.transaction.id;

        assert!(matches!(
            h.webhooks.reconcile(id).await.unwrap(),
            WebhookOutcome::Ignored(_)
        ));

        h.gateway
            .set_status(&initiated.gateway_order_id, PaymentStatus::Captured)
            .await;
        let outcome = h.webhooks.reconcile(id).await.unwrap();
        let WebhookOutcome::Applied(tx) = outcome else {
            panic!("capture should apply");
        };
        assert_eq!(tx.status, TransactionStatus::Paid);

        assert!(matches!(
            h.webhooks.reconcile(id).await.unwrap(),
            WebhookOutcome::Duplicate(_)
        ));
    }
}
