//! Domestic provider: UPI, netbanking, wallets, cards and EMI in INR.

use super::signature::verify_hmac_sha256;
use super::{
    Capabilities, GatewayOrder, OrderRequest, PaymentGateway, PaymentStatus, http_client,
    upstream_error,
};
use crate::config::RazorpayConfig;
use crate::domain::event::{GatewayEvent, GatewayEventKind, GatewayProvider};
use crate::domain::money::Currency;
use crate::domain::transaction::PaymentMethod;
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

#[derive(Debug, Deserialize)]
struct RazorpayOrder {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RazorpayStatusEntity {
    status: String,
}

#[derive(Debug, Deserialize)]
struct Entity<T> {
    entity: T,
}

#[derive(Debug, Deserialize)]
struct WebhookPayment {
    id: String,
    order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookOrder {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WebhookRefund {
    payment_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPayload {
    payment: Option<Entity<WebhookPayment>>,
    order: Option<Entity<WebhookOrder>>,
    refund: Option<Entity<WebhookRefund>>,
}

#[derive(Debug, Deserialize)]
struct RazorpayWebhook {
    event: String,
    #[serde(default)]
    payload: WebhookPayload,
    created_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct RazorpayGateway {
    client: Client,
    key_id: String,
    key_secret: String,
    webhook_secret: String,
    base_url: String,
}

impl RazorpayGateway {
    pub fn new(config: &RazorpayConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
            webhook_secret: config.webhook_secret.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_status(&self, path: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(|e| upstream_error(GatewayProvider::Razorpay, e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SettlementError::NotFound(format!("Razorpay {}", path)));
        }
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SettlementError::Gateway(format!(
                "Razorpay API error: {}",
                error_text
            )));
        }

        let entity: RazorpayStatusEntity = response.json().await.map_err(|e| {
            SettlementError::Gateway(format!("Failed to parse Razorpay response: {}", e))
        })?;
        Ok(entity.status)
    }
}

fn payment_status(status: &str) -> PaymentStatus {
    match status {
        "captured" | "paid" => PaymentStatus::Captured,
        "authorized" => PaymentStatus::Authorized,
        "failed" => PaymentStatus::Failed,
        "refunded" => PaymentStatus::Refunded,
        _ => PaymentStatus::Created,
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn provider(&self) -> GatewayProvider {
        GatewayProvider::Razorpay
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            methods: vec![
                PaymentMethod::Upi,
                PaymentMethod::Netbanking,
                PaymentMethod::Wallet,
                PaymentMethod::Emi,
                PaymentMethod::Card,
            ],
            currencies: vec![Currency::Inr],
        }
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<GatewayOrder> {
        let body = json!({
            "amount": request.amount.to_minor_units()?,
            "currency": request.currency.code(),
            "receipt": request.receipt(),
            "payment_capture": 1,
            "notes": {
                "transaction_id": request.transaction_id.to_string(),
                "item_id": request.item_id,
                "buyer_id": request.buyer_id,
                "seller_id": request.seller_id,
                "payment_method": request.payment_method.as_str(),
            },
        });

        let response = self
            .client
            .post(format!("{}/v1/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| upstream_error(GatewayProvider::Razorpay, e))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SettlementError::Gateway(format!(
                "Razorpay API error: {}",
                error_text
            )));
        }

        let order: RazorpayOrder = response.json().await.map_err(|e| {
            SettlementError::Gateway(format!("Failed to parse Razorpay response: {}", e))
        })?;

        // Checkout on the client is opened with the public key id plus the order id.
        Ok(GatewayOrder {
            gateway_order_id: order.id,
            client_token: self.key_id.clone(),
        })
    }

    fn verify_signature(&self, payload: &[u8], signature_header: &str) -> bool {
        verify_hmac_sha256(self.webhook_secret.as_bytes(), payload, signature_header)
    }

    fn parse_event(&self, payload: &[u8]) -> Result<GatewayEvent> {
        let webhook: RazorpayWebhook = serde_json::from_slice(payload)
            .map_err(|e| SettlementError::Validation(format!("Malformed Razorpay webhook: {}", e)))?;

        let payment = webhook.payload.payment.map(|p| p.entity);
        let order_id = webhook
            .payload
            .order
            .map(|o| o.entity.id)
            .or_else(|| payment.as_ref().and_then(|p| p.order_id.clone()));
        let payment_id = payment.map(|p| p.id).or_else(|| {
            webhook
                .payload
                .refund
                .and_then(|r| r.entity.payment_id)
        });

        let kind = match webhook.event.as_str() {
            "payment.captured" | "order.paid" => GatewayEventKind::Captured,
            "payment.failed" => GatewayEventKind::Failed,
            "refund.processed" => GatewayEventKind::Refunded,
            other => return Ok(GatewayEvent::unhandled(GatewayProvider::Razorpay, other)),
        };

        if order_id.is_none() {
            return Err(SettlementError::Validation(format!(
                "Razorpay {} event carries no order id",
                webhook.event
            )));
        }

        Ok(GatewayEvent {
            provider: GatewayProvider::Razorpay,
            kind,
            reference: order_id,
            event_id: webhook
                .created_at
                .zip(payment_id.as_ref())
                .map(|(at, pay)| format!("{}:{}:{}", webhook.event, pay, at)),
            payment_id,
        })
    }

    async fn fetch_payment_status(&self, gateway_payment_id: &str) -> Result<PaymentStatus> {
        let path = if gateway_payment_id.starts_with("order_") {
            format!("/v1/orders/{}", gateway_payment_id)
        } else {
            format!("/v1/payments/{}", gateway_payment_id)
        };
        let status = self.get_status(&path).await?;
        Ok(payment_status(&status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::signature::hmac_sha256_hex;

    fn gateway() -> RazorpayGateway {
        RazorpayGateway::new(
            &RazorpayConfig {
                key_id: "rzp_test_key".into(),
                key_secret: "key_secret".into(),
                webhook_secret: "whsec".into(),
                base_url: "http://127.0.0.1:9".into(),
            },
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_captured_payment() {
        let body = br#"{
            "event": "payment.captured",
            "created_at": 1700000000,
            "payload": { "payment": { "entity": { "id": "pay_1", "order_id": "order_1", "status": "captured" } } }
        }"#;
        let event = gateway().parse_event(body).unwrap();
        assert_eq!(event.kind, GatewayEventKind::Captured);
        assert_eq!(event.reference.as_deref(), Some("order_1"));
        assert_eq!(event.payment_id.as_deref(), Some("pay_1"));
    }

    #[test]
    fn test_parse_order_paid_uses_order_entity() {
        let body = br#"{
            "event": "order.paid",
            "payload": {
                "order": { "entity": { "id": "order_7" } },
                "payment": { "entity": { "id": "pay_7", "order_id": "order_7" } }
            }
        }"#;
        let event = gateway().parse_event(body).unwrap();
        assert_eq!(event.kind, GatewayEventKind::Captured);
        assert_eq!(event.reference.as_deref(), Some("order_7"));
    }

    #[test]
    fn test_unmapped_event_is_unhandled() {
        let body = br#"{ "event": "payment.authorized", "payload": {} }"#;
        let event = gateway().parse_event(body).unwrap();
        assert_eq!(
            event.kind,
            GatewayEventKind::Unhandled("payment.authorized".into())
        );
    }

    #[test]
    fn test_mapped_event_without_order_is_malformed() {
        let body = br#"{ "event": "payment.failed", "payload": {} }"#;
        assert!(matches!(
            gateway().parse_event(body),
            Err(SettlementError::Validation(_))
        ));
    }

    #[test]
    fn test_signature_is_hmac_of_raw_body() {
        let body = br#"{"event":"payment.failed"}"#;
        let sig = hmac_sha256_hex(b"whsec", body);
        assert!(gateway().verify_signature(body, &sig));
        assert!(!gateway().verify_signature(body, "deadbeef"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(payment_status("captured"), PaymentStatus::Captured);
        assert_eq!(payment_status("paid"), PaymentStatus::Captured);
        assert_eq!(payment_status("attempted"), PaymentStatus::Created);
        assert_eq!(payment_status("failed"), PaymentStatus::Failed);
    }
}
