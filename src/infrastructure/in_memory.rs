use crate::domain::money::Money;
use crate::domain::ports::{
    EcoImpactService, ImpactRecord, ItemCatalog, ItemDetails, NgoFunds, Reservation,
    ScoringService, TransactionRepository, UserDirectory,
};
use crate::domain::transaction::Transaction;
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Default)]
struct TransactionTable {
    rows: HashMap<Uuid, Transaction>,
    /// gateway reference -> transaction id
    references: HashMap<String, Uuid>,
}

impl TransactionTable {
    fn reference_taken(&self, tx: &Transaction) -> bool {
        tx.gateway_reference
            .as_ref()
            .and_then(|r| self.references.get(r))
            .is_some_and(|owner| *owner != tx.id)
    }

    fn write(&mut self, tx: Transaction) {
        if let Some(reference) = &tx.gateway_reference {
            self.references.insert(reference.clone(), tx.id);
        }
        self.rows.insert(tx.id, tx);
    }
}

/// Transaction repository backed by a single `RwLock<HashMap>`.
///
/// Multi-row writes take the write lock once, so `insert_all` and
/// `compare_and_swap` are atomic with respect to every other caller.
#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    table: Arc<RwLock<TransactionTable>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionStore {
    async fn insert_all(&self, txs: Vec<Transaction>) -> Result<()> {
        let mut table = self.table.write().await;
        let mut batch_refs = HashSet::new();
        for tx in &txs {
            if table.rows.contains_key(&tx.id) {
                return Err(SettlementError::Conflict(format!(
                    "Transaction {} already exists",
                    tx.id
                )));
            }
            let duplicate_in_batch = tx
                .gateway_reference
                .as_ref()
                .is_some_and(|r| !batch_refs.insert(r.clone()));
            if table.reference_taken(tx) || duplicate_in_batch {
                return Err(SettlementError::Conflict(format!(
                    "Gateway reference already bound for transaction {}",
                    tx.id
                )));
            }
        }
        for tx in txs {
            table.write(tx);
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>> {
        let table = self.table.read().await;
        Ok(table.rows.get(&id).cloned())
    }

    async fn find_by_gateway_reference(&self, reference: &str) -> Result<Option<Transaction>> {
        let table = self.table.read().await;
        Ok(table
            .references
            .get(reference)
            .and_then(|id| table.rows.get(id))
            .cloned())
    }

    async fn compare_and_swap(&self, txs: Vec<Transaction>) -> Result<()> {
        let mut table = self.table.write().await;
        for tx in &txs {
            let stored = table
                .rows
                .get(&tx.id)
                .ok_or_else(|| SettlementError::NotFound(format!("Transaction {}", tx.id)))?;
            if stored.version + 1 != tx.version {
                return Err(SettlementError::StaleVersion(tx.id));
            }
            if table.reference_taken(tx) {
                return Err(SettlementError::Conflict(format!(
                    "Gateway reference already bound for transaction {}",
                    tx.id
                )));
            }
        }
        for tx in txs {
            table.write(tx);
        }
        Ok(())
    }

    async fn list_for_party(&self, user_id: &str) -> Result<Vec<Transaction>> {
        let table = self.table.read().await;
        let mut txs: Vec<Transaction> = table
            .rows
            .values()
            .filter(|tx| tx.is_party(user_id))
            .cloned()
            .collect();
        txs.sort_by_key(|tx| tx.created_at);
        Ok(txs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemAvailability {
    Available,
    Reserved,
    Sold,
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    details: ItemDetails,
    availability: ItemAvailability,
}

/// Item catalog seeded up front, e.g. from a CSV file.
#[derive(Default, Clone)]
pub struct InMemoryItemCatalog {
    items: Arc<Mutex<HashMap<String, CatalogEntry>>>,
}

impl InMemoryItemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: impl IntoIterator<Item = ItemDetails>) -> Self {
        let entries = items
            .into_iter()
            .map(|details| {
                (
                    details.id.clone(),
                    CatalogEntry {
                        details,
                        availability: ItemAvailability::Available,
                    },
                )
            })
            .collect();
        Self {
            items: Arc::new(Mutex::new(entries)),
        }
    }

    pub async fn insert(&self, details: ItemDetails) {
        let mut items = self.items.lock().await;
        items.insert(
            details.id.clone(),
            CatalogEntry {
                details,
                availability: ItemAvailability::Available,
            },
        );
    }

    pub async fn availability(&self, item_id: &str) -> Option<ItemAvailability> {
        let items = self.items.lock().await;
        items.get(item_id).map(|entry| entry.availability)
    }

    async fn set(&self, item_id: &str, availability: ItemAvailability) -> Result<()> {
        let mut items = self.items.lock().await;
        let entry = items
            .get_mut(item_id)
            .ok_or_else(|| SettlementError::NotFound(format!("Item {}", item_id)))?;
        entry.availability = availability;
        Ok(())
    }
}

#[async_trait]
impl ItemCatalog for InMemoryItemCatalog {
    async fn details(&self, item_id: &str) -> Result<Option<ItemDetails>> {
        let items = self.items.lock().await;
        Ok(items.get(item_id).map(|entry| entry.details.clone()))
    }

    async fn reserve(&self, item_id: &str) -> Result<Reservation> {
        let mut items = self.items.lock().await;
        let entry = items
            .get_mut(item_id)
            .ok_or_else(|| SettlementError::NotFound(format!("Item {}", item_id)))?;
        match entry.availability {
            ItemAvailability::Available => {
                entry.availability = ItemAvailability::Reserved;
                Ok(Reservation::Reserved)
            }
            ItemAvailability::Reserved | ItemAvailability::Sold => Ok(Reservation::AlreadyReserved),
        }
    }

    async fn release(&self, item_id: &str) -> Result<()> {
        self.set(item_id, ItemAvailability::Available).await
    }

    async fn mark_sold(&self, item_id: &str) -> Result<()> {
        self.set(item_id, ItemAvailability::Sold).await
    }
}

/// Accumulates every credited donation per NGO.
#[derive(Default, Clone)]
pub struct InMemoryNgoFunds {
    credited: Arc<Mutex<HashMap<String, Money>>>,
}

impl InMemoryNgoFunds {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn total_for(&self, ngo_id: &str) -> Money {
        let credited = self.credited.lock().await;
        credited.get(ngo_id).copied().unwrap_or_default()
    }
}

#[async_trait]
impl NgoFunds for InMemoryNgoFunds {
    async fn credit_donation(&self, ngo_id: &str, amount: Money) -> Result<()> {
        let mut credited = self.credited.lock().await;
        let total = credited.entry(ngo_id.to_string()).or_default();
        *total = total.checked_add(amount)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointsAward {
    pub user_id: String,
    pub action: String,
    pub points: u32,
}

/// Scoring collaborator that records awards, optionally failing every call.
#[derive(Default, Clone)]
pub struct RecordingScoringService {
    awards: Arc<Mutex<Vec<PointsAward>>>,
    unavailable: bool,
}

impl RecordingScoringService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub async fn awards(&self) -> Vec<PointsAward> {
        self.awards.lock().await.clone()
    }
}

#[async_trait]
impl ScoringService for RecordingScoringService {
    async fn award_points(&self, user_id: &str, action: &str, points: u32) -> Result<()> {
        if self.unavailable {
            return Err(SettlementError::Gateway(
                "scoring service unavailable".to_string(),
            ));
        }
        self.awards.lock().await.push(PointsAward {
            user_id: user_id.to_string(),
            action: action.to_string(),
            points,
        });
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct RecordingEcoImpactService {
    records: Arc<Mutex<Vec<ImpactRecord>>>,
}

impl RecordingEcoImpactService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<ImpactRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl EcoImpactService for RecordingEcoImpactService {
    async fn record_impact(&self, record: ImpactRecord) -> Result<()> {
        self.records.lock().await.push(record);
        Ok(())
    }
}

/// Fixed set of verified users.
#[derive(Default, Clone)]
pub struct StaticUserDirectory {
    verified: HashSet<String>,
}

impl StaticUserDirectory {
    pub fn new<I, S>(verified: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            verified: verified.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn is_verified(&self, user_id: &str) -> Result<bool> {
        Ok(self.verified.contains(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::TransactionKind;
    use crate::domain::transaction::tests::sample;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_insert_and_lookup_by_reference() {
        let store = InMemoryTransactionStore::new();
        let mut tx = sample(TransactionKind::Sale);
        tx.gateway_reference = Some("order_1".into());

        store.insert_all(vec![tx.clone()]).await.unwrap();
        assert_eq!(store.get(tx.id).await.unwrap(), Some(tx.clone()));
        assert_eq!(
            store.find_by_gateway_reference("order_1").await.unwrap(),
            Some(tx.clone())
        );
        assert!(store.find_by_gateway_reference("order_2").await.unwrap().is_none());

        let err = store.insert_all(vec![tx]).await.unwrap_err();
        assert!(matches!(err, SettlementError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_duplicate_reference_rejected() {
        let store = InMemoryTransactionStore::new();
        let mut a = sample(TransactionKind::Sale);
        let mut b = sample(TransactionKind::Sale);
        a.gateway_reference = Some("order_x".into());
        b.gateway_reference = Some("order_x".into());

        store.insert_all(vec![a]).await.unwrap();
        assert!(matches!(
            store.insert_all(vec![b]).await,
            Err(SettlementError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_compare_and_swap_is_all_or_nothing() {
        let store = InMemoryTransactionStore::new();
        let a = sample(TransactionKind::Exchange);
        let b = sample(TransactionKind::Exchange);
        store.insert_all(vec![a.clone(), b.clone()]).await.unwrap();

        let mut a2 = a.clone();
        a2.version += 1;
        let mut b_stale = b.clone();
        b_stale.version += 2;

        let err = store
            .compare_and_swap(vec![a2.clone(), b_stale])
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::StaleVersion(id) if id == b.id));
        assert_eq!(store.get(a.id).await.unwrap().unwrap().version, 1);

        let mut b2 = b.clone();
        b2.version += 1;
        store.compare_and_swap(vec![a2, b2]).await.unwrap();
        assert_eq!(store.get(a.id).await.unwrap().unwrap().version, 2);
        assert_eq!(store.get(b.id).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_list_for_party() {
        let store = InMemoryTransactionStore::new();
        let tx = sample(TransactionKind::Sale);
        store.insert_all(vec![tx.clone()]).await.unwrap();

        assert_eq!(store.list_for_party("buyer").await.unwrap().len(), 1);
        assert_eq!(store.list_for_party("seller").await.unwrap().len(), 1);
        assert!(store.list_for_party("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reservation_is_conditional() {
        let catalog = InMemoryItemCatalog::with_items([ItemDetails {
            id: "item-1".into(),
            owner_id: "seller".into(),
            category: "books".into(),
            eco_savings: None,
        }]);

        assert_eq!(catalog.reserve("item-1").await.unwrap(), Reservation::Reserved);
        assert_eq!(
            catalog.reserve("item-1").await.unwrap(),
            Reservation::AlreadyReserved
        );
        catalog.mark_sold("item-1").await.unwrap();
        assert_eq!(
            catalog.availability("item-1").await,
            Some(ItemAvailability::Sold)
        );
        assert!(matches!(
            catalog.reserve("missing").await,
            Err(SettlementError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_ngo_credits_accumulate() {
        let funds = InMemoryNgoFunds::new();
        funds
            .credit_donation("ngo-1", Money::new(dec!(250)).unwrap())
            .await
            .unwrap();
        funds
            .credit_donation("ngo-1", Money::new(dec!(250)).unwrap())
            .await
            .unwrap();
        assert_eq!(funds.total_for("ngo-1").await.value(), dec!(500));
        assert!(funds.total_for("ngo-2").await.is_zero());
    }
}
