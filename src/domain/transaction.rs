use crate::domain::event::GatewayProvider;
use crate::domain::fees::SettlementQuote;
use crate::domain::money::{Currency, Money};
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    #[default]
    Sale,
    Donation,
    Exchange,
    Rental,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sale => "sale",
            Self::Donation => "donation",
            Self::Exchange => "exchange",
            Self::Rental => "rental",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Paid,
    Shipped,
    Delivered,
    Completed,
    Cancelled,
    Refunded,
    Disputed,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 9] = [
        Self::Pending,
        Self::Confirmed,
        Self::Paid,
        Self::Shipped,
        Self::Delivered,
        Self::Completed,
        Self::Cancelled,
        Self::Refunded,
        Self::Disputed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Paid => "paid",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
            Self::Disputed => "disputed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Refunded)
    }

    /// Statuses along the forward chain that have not been settled or disputed.
    fn is_open(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Confirmed | Self::Paid | Self::Shipped | Self::Delivered
        )
    }

    /// Entering one of these stamps the resolution timestamp.
    pub fn is_resolution(&self) -> bool {
        self.is_terminal()
    }

    /// The transition table.
    ///
    /// Forward chain `pending → confirmed → paid → shipped → delivered → completed`,
    /// with `pending → paid` for captures that skip confirmation and
    /// `paid → completed` for goods that are never shipped. Exchanges complete
    /// straight from `pending`/`confirmed`. `cancelled`, `refunded` and `disputed`
    /// are reachable from every open status; `disputed` resolves to `completed` or
    /// `refunded`, and a `completed` transaction can still be refunded.
    pub fn can_transition_to(self, target: Self, kind: TransactionKind) -> bool {
        use TransactionStatus::*;
        match (self, target) {
            (Pending, Confirmed)
            | (Pending, Paid)
            | (Confirmed, Paid)
            | (Paid, Shipped)
            | (Shipped, Delivered)
            | (Delivered, Completed)
            | (Paid, Completed) => true,
            (Pending | Confirmed, Completed) => kind == TransactionKind::Exchange,
            (Disputed, Completed | Refunded) => true,
            (Completed, Refunded) => true,
            (from, Cancelled | Refunded | Disputed) => from.is_open(),
            _ => false,
        }
    }

    pub fn allowed_targets(self, kind: TransactionKind) -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|target| self.can_transition_to(*target, kind))
            .collect()
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = SettlementError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| SettlementError::Validation(format!("Unknown status: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Upi,
    Netbanking,
    Wallet,
    Emi,
    BankTransfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Upi => "upi",
            Self::Netbanking => "netbanking",
            Self::Wallet => "wallet",
            Self::Emi => "emi",
            Self::BankTransfer => "bank_transfer",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is asking for a mutation. Identity is established by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "lowercase")]
pub enum Actor {
    User(String),
    Operator(String),
    /// The platform itself, e.g. a verified gateway callback. Never accepted
    /// from a request body.
    #[serde(skip_deserializing)]
    System,
}

impl Actor {
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::User(id) | Self::Operator(id) => Some(id),
            Self::System => None,
        }
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::Operator(_) | Self::System)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{}", id),
            Self::Operator(id) => write!(f, "operator:{}", id),
            Self::System => f.write_str("system"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
}

impl ShippingAddress {
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("street", &self.street),
            ("city", &self.city),
            ("state", &self.state),
            ("zipCode", &self.zip_code),
            ("country", &self.country),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SettlementError::Validation(format!(
                "Missing required address fields: {}",
                missing.join(", ")
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmiPlan {
    pub months: u32,
    pub monthly_amount: Money,
    pub interest_rate: Decimal,
}

/// The aggregate root. Mutated only through the methods below, each of which
/// returns a new value with `version` bumped by one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub buyer_id: String,
    pub seller_id: String,
    pub item_id: String,
    pub ngo_id: Option<String>,
    pub kind: TransactionKind,
    pub category: String,
    pub amount: Money,
    pub currency: Currency,
    pub tax_rate: Decimal,
    pub tax_amount: Money,
    pub platform_fee: Money,
    pub gateway_fee: Money,
    pub ngo_donation: Money,
    pub total_amount: Money,
    pub payment_method: PaymentMethod,
    pub gateway_provider: Option<GatewayProvider>,
    /// External order/intent id; the idempotency key for webhooks.
    pub gateway_reference: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub status: TransactionStatus,
    pub emi_plan: Option<EmiPlan>,
    pub shipping_address: Option<ShippingAddress>,
    pub tracking_number: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub actual_delivery: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub dispute_reason: Option<String>,
    pub refund_amount: Option<Money>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Sibling transaction of an exchange.
    pub swap_partner: Option<Uuid>,
    pub settlement_applied: bool,
    pub side_effects_applied: bool,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for a new transaction, after validation of the request shape.
#[derive(Debug, Clone)]
pub struct TransactionDraft {
    pub id: Uuid,
    pub buyer_id: String,
    pub seller_id: String,
    pub item_id: String,
    pub ngo_id: Option<String>,
    pub kind: TransactionKind,
    pub category: String,
    pub currency: Currency,
    pub payment_method: PaymentMethod,
    pub emi_plan: Option<EmiPlan>,
    pub shipping_address: Option<ShippingAddress>,
    pub notes: Option<String>,
    pub swap_partner: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct StatusChange {
    pub target: TransactionStatus,
    pub actor: Actor,
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    pub fn new(target: TransactionStatus, actor: Actor) -> Self {
        Self {
            target,
            actor,
            notes: None,
            at: Utc::now(),
        }
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }
}

impl Transaction {
    pub fn create(draft: TransactionDraft, quote: &SettlementQuote, now: DateTime<Utc>) -> Self {
        Self {
            id: draft.id,
            buyer_id: draft.buyer_id,
            seller_id: draft.seller_id,
            item_id: draft.item_id,
            ngo_id: draft.ngo_id,
            kind: draft.kind,
            category: draft.category,
            amount: quote.base_amount,
            currency: draft.currency,
            tax_rate: quote.tax_rate,
            tax_amount: quote.tax_amount,
            platform_fee: quote.platform_fee,
            gateway_fee: quote.gateway_fee,
            ngo_donation: quote.ngo_donation,
            total_amount: quote.total_amount,
            payment_method: draft.payment_method,
            gateway_provider: None,
            gateway_reference: None,
            gateway_payment_id: None,
            status: TransactionStatus::Pending,
            emi_plan: draft.emi_plan,
            shipping_address: draft.shipping_address,
            tracking_number: None,
            estimated_delivery: None,
            actual_delivery: None,
            notes: draft.notes,
            dispute_reason: None,
            refund_amount: None,
            resolved_by: None,
            resolved_at: None,
            swap_partner: draft.swap_partner,
            settlement_applied: false,
            side_effects_applied: false,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the buyer's payment was ever captured. Stays set through
    /// shipping, disputes and refunds.
    pub fn has_been_paid(&self) -> bool {
        self.settlement_applied
    }

    pub fn is_party(&self, user_id: &str) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }

    /// Buyer, seller, operators and the platform may act on a transaction.
    pub fn authorize(&self, actor: &Actor) -> Result<()> {
        match actor {
            Actor::User(id) if !self.is_party(id) => Err(SettlementError::Authorization(format!(
                "{} is not a party to transaction {}",
                actor, self.id
            ))),
            _ => Ok(()),
        }
    }

    pub fn check_invariants(&self) -> Result<()> {
        if self.total_amount.value() != self.amount.value() + self.tax_amount.value() {
            return Err(SettlementError::Validation(format!(
                "total {} != amount {} + tax {}",
                self.total_amount, self.amount, self.tax_amount
            )));
        }
        if self.kind == TransactionKind::Donation && !self.tax_rate.is_zero() {
            return Err(SettlementError::Validation(
                "Donations must not carry tax".to_string(),
            ));
        }
        Ok(())
    }

    fn next_version(&self, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next.updated_at = at;
        next
    }

    /// Applies a status change, returning the new state.
    ///
    /// The first entry into `paid` flags funds distribution and the first entry
    /// into `completed` flags side effects; callers act on the flag flip after the
    /// new state has been committed.
    pub fn apply(&self, change: &StatusChange) -> Result<Self> {
        self.authorize(&change.actor)?;
        if (self.status == TransactionStatus::Disputed
            || change.target == TransactionStatus::Refunded)
            && !change.actor.is_privileged()
        {
            return Err(SettlementError::Authorization(format!(
                "{} may not move transaction {} from {} to {}",
                change.actor, self.id, self.status, change.target
            )));
        }

        if !self.status.can_transition_to(change.target, self.kind) {
            return Err(SettlementError::InvalidTransition {
                from: self.status,
                to: change.target,
            });
        }

        let mut next = self.next_version(change.at);
        next.status = change.target;
        if let Some(notes) = &change.notes {
            next.notes = Some(notes.clone());
        }
        if change.target.is_resolution() {
            next.resolved_at = Some(change.at);
        }
        match change.target {
            TransactionStatus::Paid => next.settlement_applied = true,
            TransactionStatus::Completed => next.side_effects_applied = true,
            _ => {}
        }
        Ok(next)
    }

    pub fn dispute(&self, reason: &str, actor: Actor, at: DateTime<Utc>) -> Result<Self> {
        if reason.trim().is_empty() {
            return Err(SettlementError::Validation(
                "Dispute reason is required".to_string(),
            ));
        }
        let mut next = self.apply(&StatusChange {
            target: TransactionStatus::Disputed,
            actor,
            notes: None,
            at,
        })?;
        next.dispute_reason = Some(reason.to_string());
        Ok(next)
    }

    /// Refund of up to the charged total, from `completed` or `disputed` only.
    pub fn refund(&self, amount: Money, reason: &str, resolver: Actor, at: DateTime<Utc>) -> Result<Self> {
        if !resolver.is_privileged() {
            return Err(SettlementError::Authorization(
                "Only operators can issue refunds".to_string(),
            ));
        }
        if !matches!(
            self.status,
            TransactionStatus::Completed | TransactionStatus::Disputed
        ) {
            return Err(SettlementError::InvalidTransition {
                from: self.status,
                to: TransactionStatus::Refunded,
            });
        }
        if amount.is_zero() || amount > self.total_amount {
            return Err(SettlementError::Validation(format!(
                "Refund amount must be in (0, {}]",
                self.total_amount
            )));
        }

        let resolver_id = resolver.id().map(String::from);
        let mut next = self.apply(&StatusChange {
            target: TransactionStatus::Refunded,
            actor: resolver,
            notes: Some(reason.to_string()),
            at,
        })?;
        next.refund_amount = Some(amount);
        next.resolved_by = resolver_id;
        Ok(next)
    }

    pub fn resolve_dispute(
        &self,
        outcome: TransactionStatus,
        resolver: Actor,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Self> {
        if !resolver.is_privileged() {
            return Err(SettlementError::Authorization(
                "Only operators can resolve disputes".to_string(),
            ));
        }
        if self.status != TransactionStatus::Disputed
            || !matches!(
                outcome,
                TransactionStatus::Completed | TransactionStatus::Refunded
            )
        {
            return Err(SettlementError::InvalidTransition {
                from: self.status,
                to: outcome,
            });
        }

        let resolver_id = resolver.id().map(String::from);
        let mut next = self.apply(&StatusChange {
            target: outcome,
            actor: resolver,
            notes,
            at,
        })?;
        next.resolved_by = resolver_id;
        if outcome == TransactionStatus::Refunded {
            next.refund_amount = Some(self.total_amount);
        }
        Ok(next)
    }

    pub fn ship(
        &self,
        tracking_number: &str,
        estimated_delivery: Option<DateTime<Utc>>,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> Result<Self> {
        if let Actor::User(id) = &actor
            && *id != self.seller_id
        {
            return Err(SettlementError::Authorization(
                "Only the seller can ship an item".to_string(),
            ));
        }
        if tracking_number.trim().is_empty() || tracking_number.len() > 100 {
            return Err(SettlementError::Validation(
                "Tracking number must be 1-100 characters".to_string(),
            ));
        }
        let mut next = self.apply(&StatusChange {
            target: TransactionStatus::Shipped,
            actor,
            notes: None,
            at,
        })?;
        next.tracking_number = Some(tracking_number.to_string());
        next.estimated_delivery = estimated_delivery;
        Ok(next)
    }

    pub fn mark_delivered(&self, actor: Actor, at: DateTime<Utc>) -> Result<Self> {
        let mut next = self.apply(&StatusChange {
            target: TransactionStatus::Delivered,
            actor,
            notes: None,
            at,
        })?;
        next.actual_delivery = Some(at);
        Ok(next)
    }

    /// Records the gateway order opened for this transaction.
    pub fn attach_gateway_order(
        &self,
        provider: GatewayProvider,
        reference: &str,
        at: DateTime<Utc>,
    ) -> Result<Self> {
        if self.status != TransactionStatus::Pending {
            return Err(SettlementError::InvalidTransition {
                from: self.status,
                to: TransactionStatus::Pending,
            });
        }
        let mut next = self.next_version(at);
        next.gateway_provider = Some(provider);
        next.gateway_reference = Some(reference.to_string());
        Ok(next)
    }

    pub fn net_to_seller(&self) -> Decimal {
        crate::domain::fees::FeeTaxCalculator::compute_net_settlement(
            self.amount,
            self.tax_amount,
            self.platform_fee,
            self.gateway_fee,
            self.ngo_donation,
        )
    }
}
