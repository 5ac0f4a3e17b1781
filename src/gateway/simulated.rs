//! In-process gateway for local runs and tests.
//!
//! Orders are numbered sequentially, payment statuses are whatever the test
//! sets, and webhooks are signed with the same HMAC-SHA256-over-body scheme
//! the domestic provider uses.

use super::signature::{hmac_sha256_hex, verify_hmac_sha256};
use super::{Capabilities, GatewayOrder, OrderRequest, PaymentGateway, PaymentStatus};
use crate::domain::event::{GatewayEvent, GatewayEventKind, GatewayProvider};
use crate::domain::transaction::PaymentMethod;
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

pub const SIGNATURE_HEADER: &str = "x-simulated-signature";

#[derive(Debug, Serialize, Deserialize)]
struct SimulatedWebhook {
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    order_id: Option<String>,
    payment_id: Option<String>,
}

pub struct SimulatedGateway {
    webhook_secret: String,
    next_order: AtomicU64,
    latency: Option<Duration>,
    statuses: RwLock<HashMap<String, PaymentStatus>>,
}

impl SimulatedGateway {
    pub fn new(webhook_secret: &str) -> Self {
        Self {
            webhook_secret: webhook_secret.to_string(),
            next_order: AtomicU64::new(1),
            latency: None,
            statuses: RwLock::new(HashMap::new()),
        }
    }

    /// Delays every upstream call, to exercise timeout handling.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub async fn set_status(&self, reference: &str, status: PaymentStatus) {
        self.statuses
            .write()
            .await
            .insert(reference.to_string(), status);
    }

    pub fn sign(&self, payload: &[u8]) -> String {
        hmac_sha256_hex(self.webhook_secret.as_bytes(), payload)
    }

    /// Builds a webhook body of the given type (`payment.captured`,
    /// `payment.failed`, `refund.processed`, ...).
    pub fn event_payload(event_type: &str, order_id: &str, payment_id: Option<&str>) -> Vec<u8> {
        let body = SimulatedWebhook {
            id: Some(format!("evt_{}_{}", event_type.replace('.', "_"), order_id)),
            event_type: event_type.to_string(),
            order_id: Some(order_id.to_string()),
            payment_id: payment_id.map(String::from),
        };
        serde_json::to_vec(&body).unwrap_or_default()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    fn provider(&self) -> GatewayProvider {
        GatewayProvider::Simulated
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            methods: vec![
                PaymentMethod::Card,
                PaymentMethod::Upi,
                PaymentMethod::Netbanking,
                PaymentMethod::Wallet,
                PaymentMethod::Emi,
                PaymentMethod::BankTransfer,
            ],
            currencies: Vec::new(),
        }
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<GatewayOrder> {
        self.simulate_latency().await;
        let n = self.next_order.fetch_add(1, Ordering::SeqCst);
        let order_id = format!("sim_order_{}", n);
        self.set_status(&order_id, PaymentStatus::Created).await;
        tracing::debug!(order_id = %order_id, receipt = %request.receipt(), "Simulated order opened");
        Ok(GatewayOrder {
            client_token: format!("sim_token_{}", request.transaction_id.simple()),
            gateway_order_id: order_id,
        })
    }

    fn verify_signature(&self, payload: &[u8], signature_header: &str) -> bool {
        verify_hmac_sha256(self.webhook_secret.as_bytes(), payload, signature_header)
    }

    fn parse_event(&self, payload: &[u8]) -> Result<GatewayEvent> {
        let webhook: SimulatedWebhook = serde_json::from_slice(payload)
            .map_err(|e| SettlementError::Validation(format!("Malformed webhook: {}", e)))?;

        let kind = match webhook.event_type.as_str() {
            "payment.captured" | "order.paid" => GatewayEventKind::Captured,
            "payment.failed" => GatewayEventKind::Failed,
            "refund.processed" => GatewayEventKind::Refunded,
            other => GatewayEventKind::Unhandled(other.to_string()),
        };

        Ok(GatewayEvent {
            provider: GatewayProvider::Simulated,
            kind,
            reference: webhook.order_id,
            payment_id: webhook.payment_id,
            event_id: webhook.id,
        })
    }

    async fn fetch_payment_status(&self, gateway_payment_id: &str) -> Result<PaymentStatus> {
        self.simulate_latency().await;
        self.statuses
            .read()
            .await
            .get(gateway_payment_id)
            .copied()
            .ok_or_else(|| {
                SettlementError::NotFound(format!("Unknown payment {}", gateway_payment_id))
            })
    }
}
