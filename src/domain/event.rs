use crate::domain::transaction::{Transaction, TransactionStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SettlementError;

/// Payment processors the core knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayProvider {
    Razorpay,
    Stripe,
    Simulated,
}

impl GatewayProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Razorpay => "razorpay",
            Self::Stripe => "stripe",
            Self::Simulated => "simulated",
        }
    }
}

impl fmt::Display for GatewayProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GatewayProvider {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "razorpay" => Ok(Self::Razorpay),
            "stripe" => Ok(Self::Stripe),
            "simulated" | "sim" => Ok(Self::Simulated),
            other => Err(SettlementError::NotFound(format!(
                "Unknown payment provider: {}",
                other
            ))),
        }
    }
}

/// What a gateway reports happened to a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayEventKind {
    Captured,
    Failed,
    Refunded,
    /// Event type with no meaning for settlement; acknowledged and dropped.
    Unhandled(String),
}

impl GatewayEventKind {
    pub fn target_status(&self) -> Option<TransactionStatus> {
        match self {
            Self::Captured => Some(TransactionStatus::Paid),
            Self::Failed => Some(TransactionStatus::Cancelled),
            Self::Refunded => Some(TransactionStatus::Refunded),
            Self::Unhandled(_) => None,
        }
    }

    /// Whether `tx` already reflects this event.
    pub fn is_reflected_by(&self, tx: &Transaction) -> bool {
        match self {
            Self::Captured => tx.has_been_paid(),
            Self::Failed => tx.status == TransactionStatus::Cancelled,
            Self::Refunded => tx.status == TransactionStatus::Refunded,
            Self::Unhandled(_) => true,
        }
    }

    /// Whether the order moved past this event already. A failed attempt
    /// reported after the order was paid must not cancel the payment.
    pub fn is_superseded_by(&self, tx: &Transaction) -> bool {
        matches!(self, Self::Failed) && tx.has_been_paid()
    }
}

/// Provider-agnostic webhook event, produced by each provider's parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub provider: GatewayProvider,
    pub kind: GatewayEventKind,
    /// The order/intent id stored as the transaction's gateway reference.
    pub reference: Option<String>,
    pub payment_id: Option<String>,
    pub event_id: Option<String>,
}

impl GatewayEvent {
    pub fn unhandled(provider: GatewayProvider, event_type: impl Into<String>) -> Self {
        Self {
            provider,
            kind: GatewayEventKind::Unhandled(event_type.into()),
            reference: None,
            payment_id: None,
            event_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::tests::sample;
    use crate::domain::transaction::{Actor, StatusChange, TransactionKind};
    use chrono::Utc;

    #[test]
    fn test_event_status_mapping() {
        assert_eq!(
            GatewayEventKind::Captured.target_status(),
            Some(TransactionStatus::Paid)
        );
        assert_eq!(
            GatewayEventKind::Failed.target_status(),
            Some(TransactionStatus::Cancelled)
        );
        assert_eq!(
            GatewayEventKind::Refunded.target_status(),
            Some(TransactionStatus::Refunded)
        );
        assert_eq!(
            GatewayEventKind::Unhandled("order.notified".into()).target_status(),
            None
        );
    }

    fn paid_sale() -> Transaction {
        sample(TransactionKind::Sale)
            .apply(&StatusChange::new(
                TransactionStatus::Paid,
                Actor::User("buyer".into()),
            ))
            .unwrap()
    }

    #[test]
    fn test_capture_is_reflected_once_paid() {
        let captured = GatewayEventKind::Captured;
        let pending = sample(TransactionKind::Sale);
        assert!(!captured.is_reflected_by(&pending));

        let paid = paid_sale();
        assert!(captured.is_reflected_by(&paid));
        let disputed = paid
            .dispute("wrong colour", Actor::User("buyer".into()), Utc::now())
            .unwrap();
        assert!(captured.is_reflected_by(&disputed));

        // Disputed before any payment: a capture is news.
        let early_dispute = pending
            .dispute("seller unresponsive", Actor::User("buyer".into()), Utc::now())
            .unwrap();
        assert!(!captured.is_reflected_by(&early_dispute));
    }

    #[test]
    fn test_late_failure_is_superseded_by_payment() {
        let failed = GatewayEventKind::Failed;
        let pending = sample(TransactionKind::Sale);
        assert!(!failed.is_superseded_by(&pending));

        let paid = paid_sale();
        assert!(failed.is_superseded_by(&paid));
        assert!(!failed.is_reflected_by(&paid));
        let shipped = paid
            .ship("TRK-9", None, Actor::User("seller".into()), Utc::now())
            .unwrap();
        assert!(failed.is_superseded_by(&shipped));

        assert!(!GatewayEventKind::Captured.is_superseded_by(&paid));
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("Stripe".parse::<GatewayProvider>().unwrap(), GatewayProvider::Stripe);
        assert!("paypal".parse::<GatewayProvider>().is_err());
    }
}
