//! International card and bank-transfer payments through payment intents.

use super::signature::verify_hmac_sha256;
use super::{
    Capabilities, GatewayOrder, OrderRequest, PaymentGateway, PaymentStatus, http_client,
    upstream_error,
};
use crate::config::StripeConfig;
use crate::domain::event::{GatewayEvent, GatewayEventKind, GatewayProvider};
use crate::domain::transaction::PaymentMethod;
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Clock skew accepted for timestamps ahead of ours.
const FUTURE_SKEW_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    client_secret: Option<String>,
    status: String,
}

#[derive(Debug, Deserialize)]
struct StripeWebhookEvent {
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: StripeEventObject,
}

#[derive(Debug, Deserialize)]
struct StripeEventObject {
    id: String,
    /// Set on charges; intents carry their own id.
    payment_intent: Option<String>,
    latest_charge: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StripeGateway {
    client: Client,
    secret_key: String,
    webhook_secret: String,
    tolerance_secs: i64,
    base_url: String,
}

impl StripeGateway {
    pub fn new(config: &StripeConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            tolerance_secs: config.signature_tolerance_secs,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Checks a `t=<unix>,v1=<hex>` header against the payload as of `now`.
    pub fn verify_signature_at(&self, payload: &[u8], signature_header: &str, now: i64) -> bool {
        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in signature_header.split(',') {
            if let Some(t) = part.trim().strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.trim().strip_prefix("v1=") {
                candidates.push(s);
            }
        }

        let Some(timestamp_str) = timestamp else {
            return false;
        };
        let Ok(timestamp) = timestamp_str.parse::<i64>() else {
            return false;
        };

        let age = now - timestamp;
        if age > self.tolerance_secs {
            tracing::warn!(age, max = self.tolerance_secs, "Stripe webhook timestamp too old");
            return false;
        }
        if age < -FUTURE_SKEW_SECS {
            tracing::warn!(age, "Stripe webhook timestamp in the future");
            return false;
        }

        let mut signed_payload = Vec::with_capacity(timestamp_str.len() + 1 + payload.len());
        signed_payload.extend_from_slice(timestamp_str.as_bytes());
        signed_payload.push(b'.');
        signed_payload.extend_from_slice(payload);

        // Stripe may send several v1 entries while a secret is being rolled.
        candidates
            .iter()
            .any(|sig| verify_hmac_sha256(self.webhook_secret.as_bytes(), &signed_payload, sig))
    }
}

fn payment_status(status: &str) -> PaymentStatus {
    match status {
        "succeeded" => PaymentStatus::Captured,
        "requires_capture" => PaymentStatus::Authorized,
        "canceled" => PaymentStatus::Failed,
        _ => PaymentStatus::Created,
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn provider(&self) -> GatewayProvider {
        GatewayProvider::Stripe
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            methods: vec![PaymentMethod::Card, PaymentMethod::BankTransfer],
            currencies: Vec::new(),
        }
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<GatewayOrder> {
        let amount = request.amount.to_minor_units()?.to_string();
        let currency = request.currency.code().to_lowercase();
        let transaction_id = request.transaction_id.to_string();

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&[
                ("amount", amount.as_str()),
                ("currency", currency.as_str()),
                ("automatic_payment_methods[enabled]", "true"),
                ("metadata[transaction_id]", transaction_id.as_str()),
                ("metadata[item_id]", request.item_id.as_str()),
                ("metadata[buyer_id]", request.buyer_id.as_str()),
                ("metadata[seller_id]", request.seller_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| upstream_error(GatewayProvider::Stripe, e))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SettlementError::Gateway(format!(
                "Stripe API error: {}",
                error_text
            )));
        }

        let intent: PaymentIntent = response.json().await.map_err(|e| {
            SettlementError::Gateway(format!("Failed to parse Stripe response: {}", e))
        })?;

        Ok(GatewayOrder {
            client_token: intent.client_secret.unwrap_or_default(),
            gateway_order_id: intent.id,
        })
    }

    fn verify_signature(&self, payload: &[u8], signature_header: &str) -> bool {
        self.verify_signature_at(payload, signature_header, chrono::Utc::now().timestamp())
    }

    fn parse_event(&self, payload: &[u8]) -> Result<GatewayEvent> {
        let event: StripeWebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| SettlementError::Validation(format!("Malformed Stripe webhook: {}", e)))?;
        let object = event.data.object;

        let (kind, reference, payment_id) = match event.event_type.as_str() {
            "payment_intent.succeeded" => (
                GatewayEventKind::Captured,
                Some(object.id),
                object.latest_charge,
            ),
            "payment_intent.payment_failed" => {
                (GatewayEventKind::Failed, Some(object.id), None)
            }
            "charge.refunded" => (
                GatewayEventKind::Refunded,
                object.payment_intent,
                Some(object.id),
            ),
            other => return Ok(GatewayEvent::unhandled(GatewayProvider::Stripe, other)),
        };

        if reference.is_none() {
            return Err(SettlementError::Validation(format!(
                "Stripe {} event carries no payment intent",
                event.event_type
            )));
        }

        Ok(GatewayEvent {
            provider: GatewayProvider::Stripe,
            kind,
            reference,
            payment_id,
            event_id: event.id,
        })
    }

    async fn fetch_payment_status(&self, gateway_payment_id: &str) -> Result<PaymentStatus> {
        let response = self
            .client
            .get(format!(
                "{}/v1/payment_intents/{}",
                self.base_url, gateway_payment_id
            ))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| upstream_error(GatewayProvider::Stripe, e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SettlementError::NotFound(format!(
                "Stripe payment intent {}",
                gateway_payment_id
            )));
        }
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SettlementError::Gateway(format!(
                "Stripe API error: {}",
                error_text
            )));
        }

        let intent: PaymentIntent = response.json().await.map_err(|e| {
            SettlementError::Gateway(format!("Failed to parse Stripe response: {}", e))
        })?;
        Ok(payment_status(&intent.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::signature::hmac_sha256_hex;

    const NOW: i64 = 1_700_000_000;

    fn gateway() -> StripeGateway {
        StripeGateway::new(
            &StripeConfig {
                secret_key: "sk_test".into(),
                webhook_secret: "whsec_test".into(),
                signature_tolerance_secs: 300,
                base_url: "http://127.0.0.1:9".into(),
            },
            Duration::from_secs(1),
        )
        .unwrap()
    }

    fn header(payload: &[u8], t: i64) -> String {
        let mut signed = format!("{}.", t).into_bytes();
        signed.extend_from_slice(payload);
        format!("t={},v1={}", t, hmac_sha256_hex(b"whsec_test", &signed))
    }

    #[test]
    fn test_valid_signature_within_tolerance() {
        let body = br#"{"type":"payment_intent.succeeded"}"#;
        assert!(gateway().verify_signature_at(body, &header(body, NOW - 10), NOW));
    }

    #[test]
    fn test_stale_and_future_timestamps_rejected() {
        let body = br#"{}"#;
        assert!(!gateway().verify_signature_at(body, &header(body, NOW - 301), NOW));
        assert!(!gateway().verify_signature_at(body, &header(body, NOW + 120), NOW));
    }

    #[test]
    fn test_malformed_header_rejected() {
        let gw = gateway();
        assert!(!gw.verify_signature_at(b"{}", "v1=abc", NOW));
        assert!(!gw.verify_signature_at(b"{}", "t=notanumber,v1=abc", NOW));
        assert!(!gw.verify_signature_at(b"{}", "", NOW));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let sig = header(b"{\"a\":1}", NOW);
        assert!(!gateway().verify_signature_at(b"{\"a\":2}", &sig, NOW));
    }

    #[test]
    fn test_parse_intent_succeeded() {
        let body = br#"{
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": { "object": { "id": "pi_1", "latest_charge": "ch_1" } }
        }"#;
        let event = gateway().parse_event(body).unwrap();
        assert_eq!(event.kind, GatewayEventKind::Captured);
        assert_eq!(event.reference.as_deref(), Some("pi_1"));
        assert_eq!(event.payment_id.as_deref(), Some("ch_1"));
        assert_eq!(event.event_id.as_deref(), Some("evt_1"));
    }

    #[test]
    fn test_parse_charge_refunded_points_at_intent() {
        let body = br#"{
            "id": "evt_2",
            "type": "charge.refunded",
            "data": { "object": { "id": "ch_9", "payment_intent": "pi_9" } }
        }"#;
        let event = gateway().parse_event(body).unwrap();
        assert_eq!(event.kind, GatewayEventKind::Refunded);
        assert_eq!(event.reference.as_deref(), Some("pi_9"));
    }

    #[test]
    fn test_unhandled_event() {
        let body = br#"{ "type": "customer.created", "data": { "object": { "id": "cus_1" } } }"#;
        let event = gateway().parse_event(body).unwrap();
        assert!(matches!(event.kind, GatewayEventKind::Unhandled(_)));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(payment_status("succeeded"), PaymentStatus::Captured);
        assert_eq!(payment_status("requires_payment_method"), PaymentStatus::Created);
        assert_eq!(payment_status("canceled"), PaymentStatus::Failed);
    }
}
