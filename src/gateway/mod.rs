//! Payment gateway adapters.
//!
//! Each provider implements [`PaymentGateway`]: it opens orders, verifies and
//! parses its own webhook format into a provider-agnostic [`GatewayEvent`], and
//! answers status queries for out-of-band reconciliation. The
//! [`GatewayRegistry`] picks a provider by capability and bounds every
//! upstream call with the configured timeout.

pub mod emi;
pub mod razorpay;
pub mod signature;
pub mod simulated;
pub mod stripe;

use crate::config::GatewayConfig;
use crate::domain::event::{GatewayEvent, GatewayEventKind, GatewayProvider};
use crate::domain::money::{Currency, Money};
use crate::domain::transaction::PaymentMethod;
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// What the provider needs to open an order or payment intent.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub transaction_id: Uuid,
    pub amount: Money,
    pub currency: Currency,
    pub payment_method: PaymentMethod,
    pub buyer_id: String,
    pub seller_id: String,
    pub item_id: String,
}

impl OrderRequest {
    pub fn receipt(&self) -> String {
        format!("txn_{}", self.transaction_id.simple())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayOrder {
    pub gateway_order_id: String,
    /// Handed to the client SDK (publishable key or client secret).
    pub client_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Created,
    Authorized,
    Captured,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn event_kind(&self) -> Option<GatewayEventKind> {
        match self {
            Self::Captured => Some(GatewayEventKind::Captured),
            Self::Failed => Some(GatewayEventKind::Failed),
            Self::Refunded => Some(GatewayEventKind::Refunded),
            Self::Created | Self::Authorized => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub methods: Vec<PaymentMethod>,
    /// Empty means every currency is accepted.
    pub currencies: Vec<Currency>,
}

impl Capabilities {
    pub fn supports(&self, method: PaymentMethod, currency: Currency) -> bool {
        self.methods.contains(&method)
            && (self.currencies.is_empty() || self.currencies.contains(&currency))
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> GatewayProvider;
    fn capabilities(&self) -> Capabilities;
    /// Name of the HTTP header carrying the webhook signature.
    fn signature_header(&self) -> &'static str;
    async fn create_order(&self, request: &OrderRequest) -> Result<GatewayOrder>;
    fn verify_signature(&self, payload: &[u8], signature_header: &str) -> bool;
    fn parse_event(&self, payload: &[u8]) -> Result<GatewayEvent>;
    async fn fetch_payment_status(&self, gateway_payment_id: &str) -> Result<PaymentStatus>;
}

pub type GatewayHandle = Arc<dyn PaymentGateway>;

/// Maps a reqwest failure onto the error taxonomy.
pub(crate) fn upstream_error(provider: GatewayProvider, err: reqwest::Error) -> SettlementError {
    if err.is_timeout() || err.is_connect() {
        SettlementError::GatewayTimeout(format!("{}: {}", provider, err))
    } else {
        SettlementError::Gateway(format!("{}: {}", provider, err))
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SettlementError::Config(format!("HTTP client: {}", e)))
}

async fn bounded<T, F>(timeout: Duration, what: String, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(SettlementError::GatewayTimeout(format!(
            "{} did not answer within {}ms",
            what,
            timeout.as_millis()
        ))),
    }
}

#[derive(Clone)]
pub struct GatewayRegistry {
    gateways: Vec<GatewayHandle>,
    timeout: Duration,
}

impl GatewayRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            gateways: Vec::new(),
            timeout,
        }
    }

    /// Builds every provider that has credentials in `config`.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let mut registry = Self::new(config.timeout());
        if let Some(razorpay) = &config.razorpay {
            registry = registry.register(Arc::new(razorpay::RazorpayGateway::new(
                razorpay,
                config.timeout(),
            )?));
        }
        if let Some(stripe) = &config.stripe {
            registry = registry.register(Arc::new(stripe::StripeGateway::new(
                stripe,
                config.timeout(),
            )?));
        }
        if let Some(simulated) = &config.simulated {
            registry = registry.register(Arc::new(simulated::SimulatedGateway::new(
                &simulated.webhook_secret,
            )));
        }
        if registry.gateways.is_empty() {
            tracing::warn!("No payment gateway configured; initiation will be rejected");
        }
        Ok(registry)
    }

    pub fn register(mut self, gateway: GatewayHandle) -> Self {
        self.gateways.retain(|g| g.provider() != gateway.provider());
        self.gateways.push(gateway);
        self
    }

    pub fn providers(&self) -> Vec<GatewayProvider> {
        self.gateways.iter().map(|g| g.provider()).collect()
    }

    pub fn get(&self, provider: GatewayProvider) -> Result<GatewayHandle> {
        self.gateways
            .iter()
            .find(|g| g.provider() == provider)
            .cloned()
            .ok_or_else(|| SettlementError::NotFound(format!("Gateway {} not configured", provider)))
    }

    /// First registered gateway able to take `method` in `currency`.
    pub fn select(&self, method: PaymentMethod, currency: Currency) -> Result<GatewayHandle> {
        self.gateways
            .iter()
            .find(|g| g.capabilities().supports(method, currency))
            .cloned()
            .ok_or_else(|| {
                SettlementError::Validation(format!(
                    "No gateway supports {} payments in {}",
                    method, currency
                ))
            })
    }

    pub async fn create_order(
        &self,
        gateway: &GatewayHandle,
        request: &OrderRequest,
    ) -> Result<GatewayOrder> {
        bounded(
            self.timeout,
            format!("{} create_order", gateway.provider()),
            gateway.create_order(request),
        )
        .await
    }

    pub async fn fetch_payment_status(
        &self,
        provider: GatewayProvider,
        gateway_payment_id: &str,
    ) -> Result<PaymentStatus> {
        let gateway = self.get(provider)?;
        bounded(
            self.timeout,
            format!("{} fetch_payment_status", provider),
            gateway.fetch_payment_status(gateway_payment_id),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::simulated::SimulatedGateway;
    use rust_decimal_macros::dec;

    fn request() -> OrderRequest {
        OrderRequest {
            transaction_id: Uuid::new_v4(),
            amount: Money::new(dec!(10)).unwrap(),
            currency: Currency::Inr,
            payment_method: PaymentMethod::Upi,
            buyer_id: "b".into(),
            seller_id: "s".into(),
            item_id: "i".into(),
        }
    }

    #[test]
    fn test_capabilities_filter() {
        let caps = Capabilities {
            methods: vec![PaymentMethod::Upi],
            currencies: vec![Currency::Inr],
        };
        assert!(caps.supports(PaymentMethod::Upi, Currency::Inr));
        assert!(!caps.supports(PaymentMethod::Upi, Currency::Usd));
        assert!(!caps.supports(PaymentMethod::Card, Currency::Inr));
    }

    #[test]
    fn test_select_without_gateways() {
        let registry = GatewayRegistry::new(Duration::from_secs(1));
        assert!(matches!(
            registry.select(PaymentMethod::Upi, Currency::Inr),
            Err(SettlementError::Validation(_))
        ));
        assert!(matches!(
            registry.get(GatewayProvider::Stripe),
            Err(SettlementError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_slow_gateway_times_out() {
        let slow = Arc::new(SimulatedGateway::new("secret").with_latency(Duration::from_millis(200)));
        let registry = GatewayRegistry::new(Duration::from_millis(20)).register(slow);
        let gateway = registry.select(PaymentMethod::Upi, Currency::Inr).unwrap();

        let err = registry.create_order(&gateway, &request()).await.unwrap_err();
        assert!(matches!(err, SettlementError::GatewayTimeout(_)));
        assert!(err.is_retryable());
    }
}
