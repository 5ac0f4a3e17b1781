//! Boundaries between the settlement core and everything it does not own.
//!
//! Persistence and each external collaborator (item catalog, NGO funds,
//! scoring, eco-impact, user directory) sit behind an async trait so the core
//! can be exercised entirely in memory.

use super::money::Money;
use super::transaction::Transaction;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Inserts all rows or none. Fails with `Conflict` on a duplicate id or
    /// gateway reference.
    async fn insert_all(&self, txs: Vec<Transaction>) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Transaction>>;
    async fn find_by_gateway_reference(&self, reference: &str) -> Result<Option<Transaction>>;
    /// Writes every row only if each stored row is at `version - 1`.
    /// Otherwise nothing is written and `StaleVersion` is returned.
    async fn compare_and_swap(&self, txs: Vec<Transaction>) -> Result<()>;
    async fn list_for_party(&self, user_id: &str) -> Result<Vec<Transaction>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Reserved,
    AlreadyReserved,
}

/// Environmental savings precomputed by the item subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcoSavings {
    pub co2_saved: f64,
    pub water_saved: f64,
    pub waste_reduced: f64,
    pub energy_saved: f64,
    pub trees_equivalent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDetails {
    pub id: String,
    pub owner_id: String,
    pub category: String,
    pub eco_savings: Option<EcoSavings>,
}

#[async_trait]
pub trait ItemCatalog: Send + Sync {
    async fn details(&self, item_id: &str) -> Result<Option<ItemDetails>>;
    /// Conditional reservation: succeeds only if nobody holds the item.
    async fn reserve(&self, item_id: &str) -> Result<Reservation>;
    async fn release(&self, item_id: &str) -> Result<()>;
    async fn mark_sold(&self, item_id: &str) -> Result<()>;
}

#[async_trait]
pub trait NgoFunds: Send + Sync {
    async fn credit_donation(&self, ngo_id: &str, amount: Money) -> Result<()>;
}

#[async_trait]
pub trait ScoringService: Send + Sync {
    async fn award_points(&self, user_id: &str, action: &str, points: u32) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactRecord {
    pub user_id: String,
    pub item_id: String,
    pub transaction_id: Uuid,
    pub savings: EcoSavings,
}

#[async_trait]
pub trait EcoImpactService: Send + Sync {
    async fn record_impact(&self, record: ImpactRecord) -> Result<()>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn is_verified(&self, user_id: &str) -> Result<bool>;
}

// Components share collaborators, so handles are reference counted.
pub type TransactionRepositoryHandle = Arc<dyn TransactionRepository>;
pub type ItemCatalogHandle = Arc<dyn ItemCatalog>;
pub type NgoFundsHandle = Arc<dyn NgoFunds>;
pub type ScoringServiceHandle = Arc<dyn ScoringService>;
pub type EcoImpactServiceHandle = Arc<dyn EcoImpactService>;
pub type UserDirectoryHandle = Arc<dyn UserDirectory>;
