use crate::domain::ports::TransactionRepository;
use crate::domain::transaction::Transaction;
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Column Family holding serialized transactions keyed by id.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family mapping gateway references to transaction ids.
pub const CF_GATEWAY_REFS: &str = "gateway_refs";

/// A persistent transaction repository on RocksDB.
///
/// Reads go straight to the database. Writes are applied as one `WriteBatch`
/// while holding `write_lock`, which makes the version check and the write a
/// single step for every caller sharing this store.
#[derive(Clone)]
pub struct RocksDBTransactionStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

fn corrupt(what: &str, err: serde_json::Error) -> SettlementError {
    SettlementError::Storage(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("{}: {}", what, err),
    )))
}

impl RocksDBTransactionStore {
    /// Opens or creates a RocksDB instance at `path`, creating missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Options::default()),
            ColumnFamilyDescriptor::new(CF_GATEWAY_REFS, Options::default()),
        ];
        let db = DB::open_cf_descriptors(&opts, path, cfs).map_err(SettlementError::storage)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            SettlementError::Storage(Box::new(std::io::Error::other(format!(
                "{} column family not found",
                name
            ))))
        })
    }

    fn load(&self, id: Uuid) -> Result<Option<Transaction>> {
        let cf = self.cf(CF_TRANSACTIONS)?;
        match self
            .db
            .get_cf(cf, id.as_bytes())
            .map_err(SettlementError::storage)?
        {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).map_err(|e| corrupt("Deserialization error", e))?,
            )),
            None => Ok(None),
        }
    }

    fn reference_owner(&self, reference: &str) -> Result<Option<Uuid>> {
        let cf = self.cf(CF_GATEWAY_REFS)?;
        let owner = self
            .db
            .get_cf(cf, reference.as_bytes())
            .map_err(SettlementError::storage)?;
        Ok(owner.and_then(|bytes| Uuid::from_slice(&bytes).ok()))
    }

    fn check_reference(&self, tx: &Transaction) -> Result<()> {
        if let Some(reference) = &tx.gateway_reference
            && let Some(owner) = self.reference_owner(reference)?
            && owner != tx.id
        {
            return Err(SettlementError::Conflict(format!(
                "Gateway reference {} already bound to {}",
                reference, owner
            )));
        }
        Ok(())
    }

    fn write_batch(&self, txs: &[Transaction]) -> Result<()> {
        let cf_txs = self.cf(CF_TRANSACTIONS)?;
        let cf_refs = self.cf(CF_GATEWAY_REFS)?;
        let mut batch = WriteBatch::default();
        for tx in txs {
            let value = serde_json::to_vec(tx).map_err(|e| corrupt("Serialization error", e))?;
            batch.put_cf(cf_txs, tx.id.as_bytes(), value);
            if let Some(reference) = &tx.gateway_reference {
                batch.put_cf(cf_refs, reference.as_bytes(), tx.id.as_bytes());
            }
        }
        self.db.write(batch).map_err(SettlementError::storage)
    }
}

#[async_trait]
impl TransactionRepository for RocksDBTransactionStore {
    async fn insert_all(&self, txs: Vec<Transaction>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        for tx in &txs {
            if self.load(tx.id)?.is_some() {
                return Err(SettlementError::Conflict(format!(
                    "Transaction {} already exists",
                    tx.id
                )));
            }
            self.check_reference(tx)?;
        }
        self.write_batch(&txs)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>> {
        self.load(id)
    }

    async fn find_by_gateway_reference(&self, reference: &str) -> Result<Option<Transaction>> {
        match self.reference_owner(reference)? {
            Some(id) => self.load(id),
            None => Ok(None),
        }
    }

    async fn compare_and_swap(&self, txs: Vec<Transaction>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        for tx in &txs {
            let stored = self
                .load(tx.id)?
                .ok_or_else(|| SettlementError::NotFound(format!("Transaction {}", tx.id)))?;
            if stored.version + 1 != tx.version {
                return Err(SettlementError::StaleVersion(tx.id));
            }
            self.check_reference(tx)?;
        }
        self.write_batch(&txs)
    }

    async fn list_for_party(&self, user_id: &str) -> Result<Vec<Transaction>> {
        let cf = self.cf(CF_TRANSACTIONS)?;
        let mut txs = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item.map_err(SettlementError::storage)?;
            let tx: Transaction =
                serde_json::from_slice(&value).map_err(|e| corrupt("Deserialization error", e))?;
            if tx.is_party(user_id) {
                txs.push(tx);
            }
        }
        txs.sort_by_key(|tx| tx.created_at);
        Ok(txs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::TransactionKind;
    use crate::domain::transaction::tests::sample;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBTransactionStore::open(dir.path()).expect("Failed to open RocksDB");

        assert!(store.db.cf_handle(CF_TRANSACTIONS).is_some());
        assert!(store.db.cf_handle(CF_GATEWAY_REFS).is_some());
    }

    #[tokio::test]
    async fn test_rocksdb_round_trip_and_reference_index() {
        let dir = tempdir().unwrap();
        let store = RocksDBTransactionStore::open(dir.path()).unwrap();

        let mut tx = sample(TransactionKind::Sale);
        tx.gateway_reference = Some("order_42".into());
        store.insert_all(vec![tx.clone()]).await.unwrap();

        assert_eq!(store.get(tx.id).await.unwrap(), Some(tx.clone()));
        assert_eq!(
            store.find_by_gateway_reference("order_42").await.unwrap(),
            Some(tx.clone())
        );
        assert_eq!(store.list_for_party("buyer").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rocksdb_compare_and_swap() {
        let dir = tempdir().unwrap();
        let store = RocksDBTransactionStore::open(dir.path()).unwrap();
        let tx = sample(TransactionKind::Sale);
        store.insert_all(vec![tx.clone()]).await.unwrap();

        let mut stale = tx.clone();
        stale.version = 5;
        assert!(matches!(
            store.compare_and_swap(vec![stale]).await,
            Err(SettlementError::StaleVersion(_))
        ));

        let mut next = tx.clone();
        next.version = 2;
        store.compare_and_swap(vec![next]).await.unwrap();
        assert_eq!(store.get(tx.id).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_rocksdb_survives_reopen() {
        let dir = tempdir().unwrap();
        let tx = sample(TransactionKind::Donation);
        {
            let store = RocksDBTransactionStore::open(dir.path()).unwrap();
            store.insert_all(vec![tx.clone()]).await.unwrap();
        }
        let store = RocksDBTransactionStore::open(dir.path()).unwrap();
        assert_eq!(store.get(tx.id).await.unwrap(), Some(tx));
    }
}
