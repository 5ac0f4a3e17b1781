//! The only writer of transaction state.
//!
//! Every mutation goes through [`TransactionService::mutate`]: load the row,
//! compute the next state with a pure domain method, and commit it with a
//! version compare-and-swap. A lost race reloads and recomputes. Effects
//! outside the row (item reservation, NGO credit, scoring) run after the
//! commit and only on the flag flips recorded on the row itself.

use crate::application::side_effects::SideEffectDispatcher;
use crate::domain::event::{GatewayEventKind, GatewayProvider};
use crate::domain::fees::FeeTaxCalculator;
use crate::domain::money::{Currency, Money};
use crate::domain::ports::{
    ItemCatalogHandle, NgoFundsHandle, Reservation, TransactionRepositoryHandle,
};
use crate::domain::transaction::{
    Actor, EmiPlan, PaymentMethod, ShippingAddress, StatusChange, Transaction, TransactionDraft,
    TransactionKind, TransactionStatus,
};
use crate::error::{Result, SettlementError};
use crate::gateway::emi::EmiCalculator;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Request to open a new transaction.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTransaction {
    pub buyer_id: String,
    pub seller_id: String,
    pub item_id: String,
    #[serde(default)]
    pub kind: TransactionKind,
    pub amount: Money,
    #[serde(default)]
    pub currency: Option<Currency>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub ngo_id: Option<String>,
    /// Part of a sale's proceeds pledged to `ngo_id`.
    #[serde(default)]
    pub ngo_donation: Option<Money>,
    #[serde(default)]
    pub emi_months: Option<u32>,
    #[serde(default)]
    pub shipping_address: Option<ShippingAddress>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Result of a committed (or skipped) mutation.
#[derive(Debug, Clone)]
pub struct Committed {
    pub before: Transaction,
    pub after: Transaction,
}

impl Committed {
    pub fn changed(&self) -> bool {
        self.before.version != self.after.version
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventApplication {
    Applied(Transaction),
    /// The transaction already reflects the event.
    AlreadyReflected(Transaction),
    /// The event arrived after the transaction moved past it.
    Superseded(Transaction),
}

pub struct TransactionService {
    repository: TransactionRepositoryHandle,
    items: ItemCatalogHandle,
    ngo_funds: NgoFundsHandle,
    calculator: FeeTaxCalculator,
    emi: EmiCalculator,
    dispatcher: Arc<SideEffectDispatcher>,
    default_currency: Currency,
    max_stale_retries: u32,
}

impl TransactionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: TransactionRepositoryHandle,
        items: ItemCatalogHandle,
        ngo_funds: NgoFundsHandle,
        calculator: FeeTaxCalculator,
        emi: EmiCalculator,
        dispatcher: Arc<SideEffectDispatcher>,
        default_currency: Currency,
        max_stale_retries: u32,
    ) -> Self {
        Self {
            repository,
            items,
            ngo_funds,
            calculator,
            emi,
            dispatcher,
            default_currency,
            max_stale_retries,
        }
    }

    pub fn repository(&self) -> &TransactionRepositoryHandle {
        &self.repository
    }

    pub fn items(&self) -> &ItemCatalogHandle {
        &self.items
    }

    pub fn dispatcher(&self) -> &Arc<SideEffectDispatcher> {
        &self.dispatcher
    }

    pub fn max_stale_retries(&self) -> u32 {
        self.max_stale_retries
    }

    /// Validates a request and prices it, without touching the item or the store.
    pub(crate) async fn build(
        &self,
        id: Uuid,
        request: &NewTransaction,
        swap_partner: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        for (field, value) in [
            ("buyerId", &request.buyer_id),
            ("sellerId", &request.seller_id),
            ("itemId", &request.item_id),
        ] {
            if value.trim().is_empty() {
                return Err(SettlementError::Validation(format!("{} is required", field)));
            }
        }
        if request.buyer_id == request.seller_id {
            return Err(SettlementError::Validation(
                "Buyer and seller must be different users".to_string(),
            ));
        }
        if request.kind == TransactionKind::Exchange && swap_partner.is_none() {
            return Err(SettlementError::Validation(
                "Exchanges are opened as a swap pair".to_string(),
            ));
        }

        let item = self
            .items
            .details(&request.item_id)
            .await?
            .ok_or_else(|| SettlementError::NotFound(format!("Item {}", request.item_id)))?;
        if item.owner_id != request.seller_id {
            return Err(SettlementError::Validation(format!(
                "Seller mismatch: item {} is not owned by {}",
                item.id, request.seller_id
            )));
        }

        let pledge = request.ngo_donation.unwrap_or_default();
        let needs_ngo = request.kind == TransactionKind::Donation || !pledge.is_zero();
        if needs_ngo && request.ngo_id.as_deref().is_none_or(|id| id.trim().is_empty()) {
            return Err(SettlementError::Validation(
                "ngoId is required for donations".to_string(),
            ));
        }
        if let Some(address) = &request.shipping_address {
            address.validate()?;
        }

        let quote = self
            .calculator
            .quote(request.amount, &item.category, request.kind, pledge)?;

        let emi_plan = match (request.payment_method, request.emi_months) {
            (PaymentMethod::Emi, Some(months)) => {
                let emi = self.emi.quote(quote.total_amount, months)?;
                Some(EmiPlan {
                    months,
                    monthly_amount: emi.monthly_amount,
                    interest_rate: emi.interest_rate,
                })
            }
            (PaymentMethod::Emi, None) => {
                return Err(SettlementError::Validation(
                    "emiMonths is required for EMI payments".to_string(),
                ));
            }
            (_, Some(_)) => {
                return Err(SettlementError::Validation(
                    "emiMonths is only valid with the emi payment method".to_string(),
                ));
            }
            (_, None) => None,
        };

        let tx = Transaction::create(
            TransactionDraft {
                id,
                buyer_id: request.buyer_id.clone(),
                seller_id: request.seller_id.clone(),
                item_id: request.item_id.clone(),
                ngo_id: request.ngo_id.clone(),
                kind: request.kind,
                category: item.category,
                currency: request.currency.unwrap_or(self.default_currency),
                payment_method: request.payment_method,
                emi_plan,
                shipping_address: request.shipping_address.clone(),
                notes: request.notes.clone(),
                swap_partner,
            },
            &quote,
            now,
        );
        tx.check_invariants()?;
        Ok(tx)
    }

    pub(crate) async fn reserve(&self, item_id: &str) -> Result<()> {
        match self.items.reserve(item_id).await? {
            Reservation::Reserved => Ok(()),
            Reservation::AlreadyReserved => Err(SettlementError::Conflict(format!(
                "Item {} is already reserved",
                item_id
            ))),
        }
    }

    pub(crate) async fn release_quietly(&self, item_id: &str) {
        if let Err(e) = self.items.release(item_id).await {
            tracing::error!(item_id, error = %e, "Failed to release item");
        }
    }

    /// Opens a `pending` transaction and reserves its item.
    pub async fn create(&self, request: NewTransaction) -> Result<Transaction> {
        let tx = self.build(Uuid::new_v4(), &request, None, Utc::now()).await?;
        self.reserve(&tx.item_id).await?;

        if let Err(e) = self.repository.insert_all(vec![tx.clone()]).await {
            self.release_quietly(&tx.item_id).await;
            return Err(e);
        }

        tracing::info!(
            transaction_id = %tx.id,
            kind = %tx.kind,
            total = %tx.total_amount,
            "Transaction created"
        );
        Ok(tx)
    }

    pub async fn get(&self, id: Uuid) -> Result<Transaction> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| SettlementError::NotFound(format!("Transaction {}", id)))
    }

    pub async fn find_by_gateway_reference(&self, reference: &str) -> Result<Transaction> {
        self.repository
            .find_by_gateway_reference(reference)
            .await?
            .ok_or_else(|| {
                SettlementError::NotFound(format!("No transaction for gateway reference {}", reference))
            })
    }

    pub async fn list_for_party(&self, user_id: &str) -> Result<Vec<Transaction>> {
        self.repository.list_for_party(user_id).await
    }

    /// Load, compute, compare-and-swap; retried on a lost race.
    ///
    /// `step` returns `None` when the current state needs no change.
    pub(crate) async fn mutate<F>(&self, id: Uuid, step: F) -> Result<Committed>
    where
        F: Fn(&Transaction) -> Result<Option<Transaction>>,
    {
        for attempt in 0..=self.max_stale_retries {
            let before = self.get(id).await?;
            let Some(after) = step(&before)? else {
                return Ok(Committed {
                    after: before.clone(),
                    before,
                });
            };
            after.check_invariants()?;

            match self.repository.compare_and_swap(vec![after.clone()]).await {
                Ok(()) => {
                    let committed = Committed { before, after };
                    self.after_commit(&committed).await;
                    return Ok(committed);
                }
                Err(SettlementError::StaleVersion(_)) => {
                    tracing::debug!(transaction_id = %id, attempt, "Version race lost, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(SettlementError::Conflict(format!(
            "Transaction {} is being modified concurrently",
            id
        )))
    }

    /// Effects outside the row, keyed on flag and status flips.
    pub(crate) async fn after_commit(&self, committed: &Committed) {
        let Committed { before, after } = committed;
        if before.status != after.status {
            tracing::info!(
                transaction_id = %after.id,
                from = %before.status,
                to = %after.status,
                version = after.version,
                "Transaction status changed"
            );
        }

        if !before.settlement_applied && after.settlement_applied {
            self.distribute_funds(after).await;
        }

        let releases_item = match after.status {
            TransactionStatus::Cancelled | TransactionStatus::Refunded => true,
            TransactionStatus::Completed => after.kind == TransactionKind::Rental,
            _ => false,
        };
        if before.status != after.status && releases_item {
            self.release_quietly(&after.item_id).await;
        }

        if !before.side_effects_applied && after.side_effects_applied {
            self.dispatcher.on_transaction_completed(after).await;
        }
    }

    async fn distribute_funds(&self, tx: &Transaction) {
        if matches!(tx.kind, TransactionKind::Sale | TransactionKind::Donation)
            && let Err(e) = self.items.mark_sold(&tx.item_id).await
        {
            tracing::error!(transaction_id = %tx.id, item_id = %tx.item_id, error = %e, "Failed to mark item sold");
        }

        if !tx.ngo_donation.is_zero()
            && let Some(ngo_id) = &tx.ngo_id
        {
            match self.ngo_funds.credit_donation(ngo_id, tx.ngo_donation).await {
                Ok(()) => tracing::info!(
                    transaction_id = %tx.id,
                    ngo_id = %ngo_id,
                    amount = %tx.ngo_donation,
                    "NGO credited"
                ),
                Err(e) => tracing::error!(
                    transaction_id = %tx.id,
                    ngo_id = %ngo_id,
                    error = %e,
                    "Failed to credit NGO"
                ),
            }
        }

        tracing::info!(
            transaction_id = %tx.id,
            seller_id = %tx.seller_id,
            net_to_seller = %tx.net_to_seller(),
            platform_fee = %tx.platform_fee,
            gateway_fee = %tx.gateway_fee,
            "Funds distributed"
        );
    }

    /// Swap siblings settle together, so a single side never leaves the open
    /// statuses on its own.
    fn guard_swap(tx: &Transaction, target: TransactionStatus) -> Result<()> {
        if tx.swap_partner.is_some()
            && (target.is_terminal() || target == TransactionStatus::Disputed)
        {
            return Err(SettlementError::Validation(format!(
                "Transaction {} is part of a swap; move it to {} through the swap endpoints",
                tx.id, target
            )));
        }
        Ok(())
    }

    /// Statuses carrying a reason, an amount or a resolver have their own
    /// operations.
    fn guard_dedicated(tx: &Transaction, target: TransactionStatus) -> Result<()> {
        let operation = match (tx.status, target) {
            (_, TransactionStatus::Refunded) => "refund",
            (_, TransactionStatus::Disputed) => "dispute",
            (TransactionStatus::Disputed, _) => "resolve_dispute",
            _ => return Ok(()),
        };
        Err(SettlementError::Validation(format!(
            "Transaction {} cannot move from {} to {} directly; use {}",
            tx.id, tx.status, target, operation
        )))
    }

    pub async fn transition(
        &self,
        id: Uuid,
        target: TransactionStatus,
        actor: Actor,
        notes: Option<String>,
    ) -> Result<Transaction> {
        let change = StatusChange::new(target, actor).with_notes(notes);
        let committed = self
            .mutate(id, |tx| {
                Self::guard_swap(tx, target)?;
                Self::guard_dedicated(tx, target)?;
                tx.apply(&change).map(Some)
            })
            .await?;
        Ok(committed.after)
    }

    pub async fn cancel(&self, id: Uuid, reason: &str, actor: Actor) -> Result<Transaction> {
        let notes = (!reason.trim().is_empty()).then(|| reason.to_string());
        self.transition(id, TransactionStatus::Cancelled, actor, notes)
            .await
    }

    pub async fn refund(
        &self,
        id: Uuid,
        amount: Money,
        reason: &str,
        resolver: Actor,
    ) -> Result<Transaction> {
        let committed = self
            .mutate(id, |tx| {
                Self::guard_swap(tx, TransactionStatus::Refunded)?;
                tx.refund(amount, reason, resolver.clone(), Utc::now())
                    .map(Some)
            })
            .await?;
        tracing::info!(transaction_id = %id, amount = %amount, "Transaction refunded");
        Ok(committed.after)
    }

    pub async fn dispute(&self, id: Uuid, reason: &str, actor: Actor) -> Result<Transaction> {
        let committed = self
            .mutate(id, |tx| {
                Self::guard_swap(tx, TransactionStatus::Disputed)?;
                tx.dispute(reason, actor.clone(), Utc::now()).map(Some)
            })
            .await?;
        Ok(committed.after)
    }

    pub async fn resolve_dispute(
        &self,
        id: Uuid,
        outcome: TransactionStatus,
        resolver: Actor,
        notes: Option<String>,
    ) -> Result<Transaction> {
        let committed = self
            .mutate(id, |tx| {
                Self::guard_swap(tx, outcome)?;
                tx.resolve_dispute(outcome, resolver.clone(), notes.clone(), Utc::now())
                    .map(Some)
            })
            .await?;
        Ok(committed.after)
    }

    pub async fn ship(
        &self,
        id: Uuid,
        tracking_number: &str,
        estimated_delivery: Option<DateTime<Utc>>,
        actor: Actor,
    ) -> Result<Transaction> {
        let committed = self
            .mutate(id, |tx| {
                tx.ship(tracking_number, estimated_delivery, actor.clone(), Utc::now())
                    .map(Some)
            })
            .await?;
        Ok(committed.after)
    }

    pub async fn mark_delivered(&self, id: Uuid, actor: Actor) -> Result<Transaction> {
        let committed = self
            .mutate(id, |tx| tx.mark_delivered(actor.clone(), Utc::now()).map(Some))
            .await?;
        Ok(committed.after)
    }

    pub(crate) async fn attach_gateway_order(
        &self,
        id: Uuid,
        provider: GatewayProvider,
        reference: &str,
    ) -> Result<Transaction> {
        let committed = self
            .mutate(id, |tx| {
                tx.attach_gateway_order(provider, reference, Utc::now())
                    .map(Some)
            })
            .await?;
        Ok(committed.after)
    }

    /// Drives the transaction to the status a gateway event implies, unless it
    /// is already there. The check runs against the freshly loaded row on every
    /// attempt, so duplicate deliveries racing each other still apply once.
    pub async fn apply_gateway_event(
        &self,
        id: Uuid,
        kind: &GatewayEventKind,
        payment_id: Option<&str>,
    ) -> Result<EventApplication> {
        let Some(target) = kind.target_status() else {
            return Ok(EventApplication::AlreadyReflected(self.get(id).await?));
        };

        let committed = self
            .mutate(id, |tx| {
                if kind.is_reflected_by(tx) || kind.is_superseded_by(tx) {
                    return Ok(None);
                }
                Self::guard_swap(tx, target)?;
                let mut next = tx.apply(&StatusChange::new(target, Actor::System))?;
                if let Some(payment_id) = payment_id {
                    next.gateway_payment_id = Some(payment_id.to_string());
                }
                if target == TransactionStatus::Refunded && next.refund_amount.is_none() {
                    next.refund_amount = Some(tx.total_amount);
                }
                Ok(Some(next))
            })
            .await?;

        if committed.changed() {
            Ok(EventApplication::Applied(committed.after))
        } else if kind.is_superseded_by(&committed.after) {
            tracing::warn!(
                transaction_id = %id,
                status = %committed.after.status,
                event = ?kind,
                "Gateway event arrived after the transaction moved past it"
            );
            Ok(EventApplication::Superseded(committed.after))
        } else {
            Ok(EventApplication::AlreadyReflected(committed.after))
        }
    }
}
