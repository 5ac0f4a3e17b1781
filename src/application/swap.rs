//! Barter exchanges as a pair of linked `exchange` transactions.
//!
//! Side A: `party_a` receives `item_b` from `party_b`, carrying any value
//! adjustment. Side B mirrors it at zero. Both rows are created, completed and
//! cancelled together with one multi-row compare-and-swap.

use crate::application::state_machine::{NewTransaction, TransactionService};
use crate::domain::money::{Currency, Money};
use crate::domain::transaction::{
    Actor, PaymentMethod, StatusChange, Transaction, TransactionKind, TransactionStatus,
};
use crate::error::{Result, SettlementError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

fn default_swap_method() -> PaymentMethod {
    PaymentMethod::Upi
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub party_a: String,
    pub item_a: String,
    pub party_b: String,
    pub item_b: String,
    /// Paid by `party_a` when their item is worth less.
    #[serde(default)]
    pub value_adjustment: Money,
    #[serde(default)]
    pub currency: Option<Currency>,
    #[serde(default = "default_swap_method")]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwapPair {
    pub a: Transaction,
    pub b: Transaction,
}

pub struct SwapCoordinator {
    transactions: Arc<TransactionService>,
}

impl SwapCoordinator {
    pub fn new(transactions: Arc<TransactionService>) -> Self {
        Self { transactions }
    }

    pub async fn initiate_swap(&self, request: SwapRequest) -> Result<SwapPair> {
        if request.item_a == request.item_b {
            return Err(SettlementError::Validation(
                "A swap needs two different items".to_string(),
            ));
        }

        let (id_a, id_b) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();
        let side = |buyer: &str, seller: &str, item: &str, amount: Money| NewTransaction {
            buyer_id: buyer.to_string(),
            seller_id: seller.to_string(),
            item_id: item.to_string(),
            kind: TransactionKind::Exchange,
            amount,
            currency: request.currency,
            payment_method: request.payment_method,
            ngo_id: None,
            ngo_donation: None,
            emi_months: None,
            shipping_address: None,
            notes: request.notes.clone(),
        };

        let a = self
            .transactions
            .build(
                id_a,
                &side(&request.party_a, &request.party_b, &request.item_b, request.value_adjustment),
                Some(id_b),
                now,
            )
            .await?;
        let b = self
            .transactions
            .build(
                id_b,
                &side(&request.party_b, &request.party_a, &request.item_a, Money::ZERO),
                Some(id_a),
                now,
            )
            .await?;

        self.transactions.reserve(&a.item_id).await?;
        if let Err(e) = self.transactions.reserve(&b.item_id).await {
            self.transactions.release_quietly(&a.item_id).await;
            return Err(e);
        }

        if let Err(e) = self
            .transactions
            .repository()
            .insert_all(vec![a.clone(), b.clone()])
            .await
        {
            self.transactions.release_quietly(&a.item_id).await;
            self.transactions.release_quietly(&b.item_id).await;
            return Err(e);
        }

        tracing::info!(swap_a = %a.id, swap_b = %b.id, "Swap initiated");
        Ok(SwapPair { a, b })
    }

    /// Loads `id` and its sibling, in A/B order.
    async fn load_pair(&self, id: Uuid) -> Result<SwapPair> {
        let first = self.transactions.get(id).await?;
        let partner_id = first.swap_partner.ok_or_else(|| {
            SettlementError::Validation(format!("Transaction {} is not part of a swap", id))
        })?;
        let second = self.transactions.get(partner_id).await.map_err(|_| {
            SettlementError::SwapFailed(format!("Sibling {} of {} is missing", partner_id, id))
        })?;
        if second.swap_partner != Some(first.id) {
            return Err(SettlementError::SwapFailed(format!(
                "Transactions {} and {} are not linked to each other",
                first.id, second.id
            )));
        }
        Ok(SwapPair { a: first, b: second })
    }

    /// Moves both siblings to `target` in a single write, retrying lost races.
    async fn transition_pair(
        &self,
        id: Uuid,
        target: TransactionStatus,
        actor: &Actor,
        notes: Option<String>,
    ) -> Result<(SwapPair, SwapPair)> {
        for attempt in 0..=self.transactions.max_stale_retries() {
            let before = self.load_pair(id).await?;
            before.a.authorize(actor)?;
            before.b.authorize(actor)?;
            let change = StatusChange::new(target, actor.clone()).with_notes(notes.clone());

            let next = |tx: &Transaction| {
                tx.apply(&change).map_err(|e| {
                    SettlementError::SwapFailed(format!("Transaction {}: {}", tx.id, e))
                })
            };
            let after = SwapPair {
                a: next(&before.a)?,
                b: next(&before.b)?,
            };

            match self
                .transactions
                .repository()
                .compare_and_swap(vec![after.a.clone(), after.b.clone()])
                .await
            {
                Ok(()) => return Ok((before, after)),
                Err(SettlementError::StaleVersion(_)) => {
                    tracing::debug!(swap = %id, attempt, "Swap version race lost, retrying");
                }
                Err(e) => return Err(SettlementError::SwapFailed(e.to_string())),
            }
        }
        Err(SettlementError::SwapFailed(format!(
            "Swap {} is being modified concurrently",
            id
        )))
    }

    /// Completes both sides, or neither.
    pub async fn confirm_swap(&self, id: Uuid, actor: Actor) -> Result<SwapPair> {
        let (before, after) = self
            .transition_pair(id, TransactionStatus::Completed, &actor, None)
            .await?;

        for tx in [&after.a, &after.b] {
            if let Err(e) = self.transactions.items().mark_sold(&tx.item_id).await {
                tracing::error!(transaction_id = %tx.id, item_id = %tx.item_id, error = %e, "Failed to mark swapped item sold");
            }
        }
        for (prev, next) in [(&before.a, &after.a), (&before.b, &after.b)] {
            if !prev.side_effects_applied && next.side_effects_applied {
                self.transactions
                    .dispatcher()
                    .on_transaction_completed(next)
                    .await;
            }
        }

        tracing::info!(swap_a = %after.a.id, swap_b = %after.b.id, "Swap completed");
        Ok(after)
    }

    /// Cancels both sides and frees both items.
    pub async fn cancel_swap(&self, id: Uuid, reason: &str, actor: Actor) -> Result<SwapPair> {
        let notes = (!reason.trim().is_empty()).then(|| reason.to_string());
        let (_, after) = self
            .transition_pair(id, TransactionStatus::Cancelled, &actor, notes)
            .await?;

        for tx in [&after.a, &after.b] {
            self.transactions.release_quietly(&tx.item_id).await;
        }
        tracing::info!(swap_a = %after.a.id, swap_b = %after.b.id, "Swap cancelled");
        Ok(after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::state_machine::tests::{Fixture, fixture};
    use crate::domain::ports::{ItemCatalog, ItemDetails};
    use crate::infrastructure::in_memory::ItemAvailability;
    use rust_decimal_macros::dec;

    async fn setup() -> (SwapCoordinator, Fixture) {
        let f = fixture();
        for (id, owner) in [("bike", "alice"), ("guitar", "bob")] {
            f.catalog
                .insert(ItemDetails {
                    id: id.into(),
                    owner_id: owner.into(),
                    category: "sports".into(),
                    eco_savings: None,
                })
                .await;
        }
        (SwapCoordinator::new(f.service.clone()), f)
    }

    fn request() -> SwapRequest {
        SwapRequest {
            party_a: "alice".into(),
            item_a: "bike".into(),
            party_b: "bob".into(),
            item_b: "guitar".into(),
            value_adjustment: Money::new(dec!(200)).unwrap(),
            currency: None,
            payment_method: PaymentMethod::Upi,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_initiate_links_both_sides() {
        let (swaps, _f) = setup().await;
        let pair = swaps.initiate_swap(request()).await.unwrap();

        assert_eq!(pair.a.buyer_id, "alice");
        assert_eq!(pair.a.seller_id, "bob");
        assert_eq!(pair.a.item_id, "guitar");
        assert_eq!(pair.b.buyer_id, "bob");
        assert_eq!(pair.b.item_id, "bike");
        assert_eq!(pair.a.swap_partner, Some(pair.b.id));
        assert_eq!(pair.b.swap_partner, Some(pair.a.id));
        assert_eq!(pair.a.amount.value(), dec!(200));
        assert!(pair.b.amount.is_zero());
        assert!(pair.a.platform_fee.is_zero());
    }

    #[tokio::test]
    async fn test_initiate_fails_whole_when_one_item_taken() {
        let (swaps, f) = setup().await;
        f.catalog.reserve("bike").await.unwrap();

        let err = swaps.initiate_swap(request()).await.unwrap_err();
        assert!(matches!(err, SettlementError::Conflict(_)));
        // The other item was not left reserved.
        assert_eq!(
            f.catalog.availability("guitar").await,
            Some(ItemAvailability::Available)
        );
        assert!(f.service.list_for_party("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_confirm_completes_both_and_sells_items() {
        let (swaps, f) = setup().await;
        let pair = swaps.initiate_swap(request()).await.unwrap();

        let done = swaps
            .confirm_swap(pair.b.id, Actor::User("bob".into()))
            .await
            .unwrap();
        // Order follows the id that was confirmed.
        assert_eq!(done.a.id, pair.b.id);
        assert_eq!(done.a.status, TransactionStatus::Completed);
        assert_eq!(done.b.status, TransactionStatus::Completed);
        assert_eq!(f.catalog.availability("bike").await, Some(ItemAvailability::Sold));
        assert_eq!(f.catalog.availability("guitar").await, Some(ItemAvailability::Sold));

        let awards = f.scoring.awards().await;
        assert_eq!(awards.len(), 2);
        assert!(awards.iter().all(|a| a.action == "exchange"));

        let again = swaps.confirm_swap(pair.a.id, Actor::User("alice".into())).await;
        assert!(matches!(again, Err(SettlementError::SwapFailed(_))));
        assert_eq!(f.scoring.awards().await.len(), 2);
    }

    #[tokio::test]
    async fn test_confirm_leaves_both_unchanged_on_failure() {
        let (swaps, f) = setup().await;
        let pair = swaps.initiate_swap(request()).await.unwrap();

        // Knock side B off the completable path behind the coordinator's back.
        let mut stuck = f.service.get(pair.b.id).await.unwrap();
        stuck.status = TransactionStatus::Shipped;
        stuck.version += 1;
        f.service
            .repository()
            .compare_and_swap(vec![stuck])
            .await
            .unwrap();

        let err = swaps
            .confirm_swap(pair.a.id, Actor::User("alice".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::SwapFailed(_)));
        assert_eq!(
            f.service.get(pair.a.id).await.unwrap().status,
            TransactionStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_direct_cancel_of_swap_side_is_rejected() {
        let (swaps, f) = setup().await;
        let pair = swaps.initiate_swap(request()).await.unwrap();

        let err = f
            .service
            .cancel(pair.a.id, "nope", Actor::User("alice".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));

        let cancelled = swaps
            .cancel_swap(pair.a.id, "nope", Actor::User("alice".into()))
            .await
            .unwrap();
        assert_eq!(cancelled.a.status, TransactionStatus::Cancelled);
        assert_eq!(cancelled.b.status, TransactionStatus::Cancelled);
        assert_eq!(
            f.catalog.availability("bike").await,
            Some(ItemAvailability::Available)
        );
    }

    #[tokio::test]
    async fn test_stranger_cannot_confirm() {
        let (swaps, _f) = setup().await;
        let pair = swaps.initiate_swap(request()).await.unwrap();
        let err = swaps
            .confirm_swap(pair.a.id, Actor::User("mallory".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::Authorization(_)));
    }
}
