//! Scoring and eco-impact updates fired once per completed transaction.

use crate::config::ScoringConfig;
use crate::domain::ports::{
    EcoImpactServiceHandle, ImpactRecord, ItemCatalogHandle, ScoringServiceHandle,
    TransactionRepositoryHandle, UserDirectoryHandle,
};
use crate::domain::transaction::{Transaction, TransactionKind, TransactionStatus};
use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScoringAction {
    Sale,
    Purchase,
    Donation,
    Exchange,
    Rental,
}

impl ScoringAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sale => "sale",
            Self::Purchase => "purchase",
            Self::Donation => "donation",
            Self::Exchange => "exchange",
            Self::Rental => "rental",
        }
    }

    pub fn for_buyer(kind: TransactionKind) -> Self {
        match kind {
            TransactionKind::Sale => Self::Purchase,
            TransactionKind::Donation => Self::Donation,
            TransactionKind::Exchange => Self::Exchange,
            TransactionKind::Rental => Self::Rental,
        }
    }

    /// `None` for exchanges: each side of a swap scores through its own buyer.
    pub fn for_seller(kind: TransactionKind) -> Option<Self> {
        match kind {
            TransactionKind::Sale => Some(Self::Sale),
            TransactionKind::Donation => Some(Self::Donation),
            TransactionKind::Rental => Some(Self::Rental),
            TransactionKind::Exchange => None,
        }
    }

    /// Whether `user_id` performed this action in `tx`.
    fn performed_in(&self, tx: &Transaction, user_id: &str) -> bool {
        (tx.buyer_id == user_id && Self::for_buyer(tx.kind) == *self)
            || (tx.seller_id == user_id && Self::for_seller(tx.kind) == Some(*self))
    }
}

impl fmt::Display for ScoringAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Facts about the user that modulate the base award.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreContext {
    pub first_time: bool,
    pub streak_days: u32,
    pub eco_friendly: bool,
    pub verified: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScoreCalculator {
    config: ScoringConfig,
}

impl ScoreCalculator {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn base_points(&self, action: ScoringAction) -> u32 {
        let points = &self.config.points;
        match action {
            ScoringAction::Sale => points.sale,
            ScoringAction::Purchase => points.purchase,
            ScoringAction::Donation => points.donation,
            ScoringAction::Exchange => points.exchange,
            ScoringAction::Rental => points.rental,
        }
    }

    pub fn is_eco_friendly(&self, category: &str) -> bool {
        self.config
            .eco_friendly_categories
            .contains(&category.trim().to_lowercase())
    }

    /// `round(base × multipliers) + bonuses`, capped.
    pub fn points(&self, action: ScoringAction, context: &ScoreContext) -> u32 {
        let cfg = &self.config;
        let mut multiplier = Decimal::ONE;
        if context.first_time {
            multiplier *= cfg.first_time_multiplier;
        }
        if context.streak_days >= cfg.streak_days {
            multiplier *= cfg.streak_multiplier;
        }
        if context.eco_friendly {
            multiplier *= cfg.eco_friendly_multiplier;
        }
        if context.verified {
            multiplier *= cfg.verified_multiplier;
        }

        let scaled = (Decimal::from(self.base_points(action)) * multiplier)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_u32()
            .unwrap_or(cfg.max_points);

        let bonus = match action {
            ScoringAction::Donation => cfg.donation_bonus,
            ScoringAction::Exchange => cfg.exchange_bonus,
            _ => 0,
        };

        scaled.saturating_add(bonus).min(cfg.max_points)
    }
}

/// Consecutive days with activity, counting back from `today`.
pub fn activity_streak(activity: impl IntoIterator<Item = DateTime<Utc>>, today: NaiveDate) -> u32 {
    let days: BTreeSet<NaiveDate> = activity.into_iter().map(|at| at.date_naive()).collect();
    let mut streak = 0;
    let mut day = today;
    while days.contains(&day) {
        streak += 1;
        match day.checked_sub_days(Days::new(1)) {
            Some(previous) => day = previous,
            None => break,
        }
    }
    streak
}

/// Fans a completed transaction out to the scoring and eco-impact collaborators.
///
/// Every failure is logged and swallowed: the transaction is already
/// committed, and the `side_effects_applied` flag keeps this from running twice.
pub struct SideEffectDispatcher {
    calculator: ScoreCalculator,
    scoring: ScoringServiceHandle,
    eco_impact: EcoImpactServiceHandle,
    users: UserDirectoryHandle,
    items: ItemCatalogHandle,
    repository: TransactionRepositoryHandle,
}

impl SideEffectDispatcher {
    pub fn new(
        calculator: ScoreCalculator,
        scoring: ScoringServiceHandle,
        eco_impact: EcoImpactServiceHandle,
        users: UserDirectoryHandle,
        items: ItemCatalogHandle,
        repository: TransactionRepositoryHandle,
    ) -> Self {
        Self {
            calculator,
            scoring,
            eco_impact,
            users,
            items,
            repository,
        }
    }

    pub async fn on_transaction_completed(&self, tx: &Transaction) {
        let mut awards = vec![(tx.buyer_id.as_str(), ScoringAction::for_buyer(tx.kind))];
        if let Some(action) = ScoringAction::for_seller(tx.kind) {
            awards.push((tx.seller_id.as_str(), action));
        }

        for (user_id, action) in awards {
            let context = self.context_for(tx, user_id, action).await;
            let points = self.calculator.points(action, &context);
            match self
                .scoring
                .award_points(user_id, action.as_str(), points)
                .await
            {
                Ok(()) => tracing::info!(
                    transaction_id = %tx.id,
                    user_id,
                    action = %action,
                    points,
                    "Points awarded"
                ),
                Err(e) => tracing::error!(
                    transaction_id = %tx.id,
                    user_id,
                    action = %action,
                    error = %e,
                    "Failed to award points"
                ),
            }
        }

        self.record_impact(tx).await;
    }

    async fn record_impact(&self, tx: &Transaction) {
        let savings = match self.items.details(&tx.item_id).await {
            Ok(Some(details)) => details.eco_savings,
            Ok(None) => None,
            Err(e) => {
                tracing::error!(transaction_id = %tx.id, error = %e, "Failed to load item for eco impact");
                None
            }
        };
        let Some(savings) = savings else {
            tracing::debug!(transaction_id = %tx.id, "Item has no eco savings to record");
            return;
        };

        let record = ImpactRecord {
            user_id: tx.buyer_id.clone(),
            item_id: tx.item_id.clone(),
            transaction_id: tx.id,
            savings,
        };
        if let Err(e) = self.eco_impact.record_impact(record).await {
            tracing::error!(transaction_id = %tx.id, error = %e, "Failed to record eco impact");
        }
    }

    async fn context_for(&self, tx: &Transaction, user_id: &str, action: ScoringAction) -> ScoreContext {
        let history = match self.repository.list_for_party(user_id).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Scoring without transaction history");
                Vec::new()
            }
        };

        let first_time = !history.iter().any(|other| {
            other.id != tx.id
                && other.status == TransactionStatus::Completed
                && action.performed_in(other, user_id)
        });

        let today = tx.resolved_at.unwrap_or_else(Utc::now).date_naive();
        let streak_days = activity_streak(
            history
                .iter()
                .map(|other| other.created_at)
                .chain(std::iter::once(tx.created_at)),
            today,
        );

        let verified = self.users.is_verified(user_id).await.unwrap_or_else(|e| {
            tracing::warn!(user_id, error = %e, "Verification lookup failed");
            false
        });

        ScoreContext {
            first_time,
            streak_days,
            eco_friendly: self.calculator.is_eco_friendly(&tx.category),
            verified,
        }
    }
}
