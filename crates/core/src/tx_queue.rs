//! Durable, insertion-ordered transaction queue (§4.7 / §6 wire shape).
//!
//! An `IndexMap<TxId, QueuedTx>` in memory, keeping insertion order without
//! a separate ordering index, persisted as one `serde_json` blob via
//! [`crate::secure_store::SecureStore`].

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::QueueError;
use crate::secure_store::SecureStore;

const STORAGE_KEY: &str = "tx_queue";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Queued,
    Pending,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    Relay,
    OnChain,
    Ble,
    SecureBle,
    Qr,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenSpec {
    pub symbol: String,
    pub address: Option<String>,
    pub decimals: u8,
    pub is_native: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityMetadata {
    pub balance_validated: bool,
    pub duplicate_checked: bool,
    pub nonce_validated: bool,
    pub created_offline_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxMetadata {
    pub merchant: Option<String>,
    pub location: Option<String>,
    pub max_amount: Option<String>,
    pub min_amount: Option<String>,
    pub expiry: Option<i64>,
    pub adjusted_gas_price: Option<String>,
    pub adjusted_gas_limit: Option<u64>,
    pub delay_hours: Option<f64>,
    pub original_timestamp: Option<i64>,
}

/// A queued payment. Immutable after insert except for `status`, `error`,
/// and `retry_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTx {
    pub id: String,
    pub chain: String,
    pub to: String,
    /// Decimal string in token base units.
    pub amount: String,
    pub token: TokenSpec,
    pub payment_reference: Option<String>,
    pub signed_raw: Option<String>,
    /// The forwarder nonce this tx was signed with, so a repricing resign
    /// (§4.11 step 1) can rebuild the same payload under a new gas price.
    #[serde(default)]
    pub nonce: String,
    pub transport: Transport,
    pub created_at: i64,
    pub status: TxStatus,
    pub retry_count: u32,
    pub error: Option<String>,
    pub security_metadata: SecurityMetadata,
    pub metadata: TxMetadata,
}

/// Per-status counts, the shape `queue_status()` returns.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStatusCounts {
    pub queued: usize,
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub expired: usize,
}

/// Patch applied by [`TxQueue::update`]. `status`/`error`/`retry_count`
/// track sync progress; `signed_raw`/`metadata` are overwritten only when
/// [`crate::sync_engine::SyncEngine`] re-prices and re-signs a stale tx —
/// the rest of `QueuedTx` stays immutable after insert.
#[derive(Debug, Clone, Default)]
pub struct TxPatch {
    pub status: Option<TxStatus>,
    pub error: Option<Option<String>>,
    pub retry_count: Option<u32>,
    pub signed_raw: Option<Option<String>>,
    pub metadata: Option<TxMetadata>,
}

pub struct TxQueue {
    store: Arc<dyn SecureStore>,
    entries: tokio::sync::RwLock<IndexMap<String, QueuedTx>>,
}

impl TxQueue {
    pub fn new(store: Arc<dyn SecureStore>) -> Self {
        Self { store, entries: tokio::sync::RwLock::new(IndexMap::new()) }
    }

    /// Load the persisted queue from storage, replacing in-memory state.
    pub async fn load(&self) -> Result<(), QueueError> {
        let Some(raw) = self
            .store
            .get(STORAGE_KEY)
            .await
            .map_err(|e| QueueError::PersistenceFailure(e.to_string()))?
        else {
            return Ok(());
        };
        let loaded: Vec<QueuedTx> =
            serde_json::from_slice(&raw).map_err(|e| QueueError::PersistenceFailure(e.to_string()))?;
        let mut entries = self.entries.write().await;
        entries.clear();
        for tx in loaded {
            entries.insert(tx.id.clone(), tx);
        }
        Ok(())
    }

    async fn persist(&self, entries: &IndexMap<String, QueuedTx>) -> Result<(), QueueError> {
        let list: Vec<&QueuedTx> = entries.values().collect();
        let raw = serde_json::to_vec(&list).map_err(|e| QueueError::PersistenceFailure(e.to_string()))?;
        self.store
            .put(STORAGE_KEY, &raw)
            .await
            .map_err(|e| QueueError::PersistenceFailure(e.to_string()))?;
        debug!(count = list.len(), "persisted tx queue");
        Ok(())
    }

    pub async fn add(&self, tx: QueuedTx) -> Result<(), QueueError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&tx.id) {
            return Err(QueueError::DuplicateId(tx.id));
        }
        entries.insert(tx.id.clone(), tx);
        self.persist(&entries).await
    }

    pub async fn update(&self, id: &str, patch: TxPatch) -> Result<(), QueueError> {
        let mut entries = self.entries.write().await;
        let tx = entries.get_mut(id).ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        if let Some(status) = patch.status {
            tx.status = status;
        }
        if let Some(error) = patch.error {
            tx.error = error;
        }
        if let Some(retry_count) = patch.retry_count {
            tx.retry_count = retry_count;
        }
        if let Some(signed_raw) = patch.signed_raw {
            tx.signed_raw = signed_raw;
        }
        if let Some(metadata) = patch.metadata {
            tx.metadata = metadata;
        }
        self.persist(&entries).await
    }

    pub async fn remove(&self, id: &str) -> Result<(), QueueError> {
        let mut entries = self.entries.write().await;
        entries.shift_remove(id).ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        self.persist(&entries).await
    }

    pub async fn get(&self, id: &str) -> Option<QueuedTx> {
        self.entries.read().await.get(id).cloned()
    }

    pub async fn list_by_status(&self, status: TxStatus) -> Vec<QueuedTx> {
        self.entries
            .read()
            .await
            .values()
            .filter(|tx| tx.status == status)
            .cloned()
            .collect()
    }

    pub async fn list_all(&self) -> Vec<QueuedTx> {
        self.entries.read().await.values().cloned().collect()
    }

    pub async fn queue_status(&self) -> QueueStatusCounts {
        let entries = self.entries.read().await;
        let mut counts = QueueStatusCounts::default();
        for tx in entries.values() {
            match tx.status {
                TxStatus::Queued => counts.queued += 1,
                TxStatus::Pending => counts.pending += 1,
                TxStatus::Completed => counts.completed += 1,
                TxStatus::Failed => counts.failed += 1,
                TxStatus::Cancelled => counts.cancelled += 1,
                TxStatus::Expired => counts.expired += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secure_store::EncryptedFileStore;

    fn sample_tx(id: &str, to: &str, amount: &str) -> QueuedTx {
        QueuedTx {
            id: id.to_string(),
            chain: "ethereum".to_string(),
            to: to.to_string(),
            amount: amount.to_string(),
            token: TokenSpec { symbol: "ETH".to_string(), address: None, decimals: 18, is_native: true },
            payment_reference: None,
            signed_raw: None,
            nonce: "0".to_string(),
            transport: Transport::Relay,
            created_at: 0,
            status: TxStatus::Queued,
            retry_count: 0,
            error: None,
            security_metadata: SecurityMetadata::default(),
            metadata: TxMetadata::default(),
        }
    }

    async fn queue() -> TxQueue {
        let dir = std::env::temp_dir().join(format!(
            "tx-queue-test-{}",
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos()
        ));
        let store = Arc::new(EncryptedFileStore::new(dir.join("store.bin"), b"key"));
        TxQueue::new(store)
    }

    #[tokio::test]
    async fn add_rejects_duplicate_id() {
        let q = queue().await;
        q.add(sample_tx("1", "0xabc", "100")).await.unwrap();
        let err = q.add(sample_tx("1", "0xabc", "200")).await.unwrap_err();
        assert!(matches!(err, QueueError::DuplicateId(_)));
    }

    #[tokio::test]
    async fn update_only_touches_status_error_retry() {
        let q = queue().await;
        q.add(sample_tx("1", "0xabc", "100")).await.unwrap();
        q.update(
            "1",
            TxPatch { status: Some(TxStatus::Pending), error: None, retry_count: Some(1), ..Default::default() },
        )
        .await
        .unwrap();
        let tx = q.get("1").await.unwrap();
        assert_eq!(tx.status, TxStatus::Pending);
        assert_eq!(tx.retry_count, 1);
        assert_eq!(tx.to, "0xabc");
    }

    #[tokio::test]
    async fn list_by_status_preserves_insertion_order() {
        let q = queue().await;
        q.add(sample_tx("1", "0xa", "1")).await.unwrap();
        q.add(sample_tx("2", "0xb", "2")).await.unwrap();
        let queued = q.list_by_status(TxStatus::Queued).await;
        assert_eq!(queued.iter().map(|t| t.id.clone()).collect::<Vec<_>>(), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn queue_status_counts_per_state() {
        let q = queue().await;
        q.add(sample_tx("1", "0xa", "1")).await.unwrap();
        q.add(sample_tx("2", "0xb", "2")).await.unwrap();
        q.update("2", TxPatch { status: Some(TxStatus::Completed), ..Default::default() }).await.unwrap();
        let counts = q.queue_status().await;
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.completed, 1);
    }
}
