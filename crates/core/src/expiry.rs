//! Background sweeper that warns, expires, and releases funds for stale
//! queued transactions (§4.10).
//!
//! Two `tokio::time::interval`-driven tasks, one per cadence: a 15-minute
//! warning sweep and an hourly (`cleanup_period`) cleanup sweep.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::chain_state::ChainStateRegistry;
use crate::tx_queue::{QueuedTx, TxPatch, TxQueue, TxStatus};

pub const MAX_OFFLINE_DURATION: Duration = Duration::from_secs(24 * 3600);
pub const WARNING_THRESHOLD: Duration = Duration::from_secs(12 * 3600);
pub const CLEANUP_PERIOD: Duration = Duration::from_secs(3600);
const WARNING_INTERVAL: Duration = Duration::from_secs(15 * 60);
const MAX_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct ExpiryWarning {
    pub tx_id: String,
    pub age_secs: u64,
    pub severity: WarningSeverity,
}

/// Append-only record of an expired transaction, bounded to the most
/// recent [`MAX_HISTORY`] entries.
#[derive(Debug, Clone)]
pub struct ExpiredTxRecord {
    pub tx: QueuedTx,
    pub reason: String,
    pub expired_at: i64,
}

pub struct ExpiryService {
    queue: Arc<TxQueue>,
    chain_states: Arc<ChainStateRegistry>,
    history: Mutex<VecDeque<ExpiredTxRecord>>,
}

impl ExpiryService {
    pub fn new(queue: Arc<TxQueue>, chain_states: Arc<ChainStateRegistry>) -> Self {
        Self { queue, chain_states, history: Mutex::new(VecDeque::new()) }
    }

    pub fn history(&self) -> Vec<ExpiredTxRecord> {
        self.history.lock().iter().cloned().collect()
    }

    fn record_history(&self, record: ExpiredTxRecord) {
        let mut history = self.history.lock();
        history.push_back(record);
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }
    }

    /// One warning sweep: emits [`ExpiryWarning`]s for ageing queued txs.
    pub async fn warning_sweep(&self, now: i64) -> Vec<ExpiryWarning> {
        let warning_start = MAX_OFFLINE_DURATION.as_secs() as i64 - WARNING_THRESHOLD.as_secs() as i64;
        let critical_start = MAX_OFFLINE_DURATION.as_secs() as i64 - 2 * 3600;

        let mut warnings = Vec::new();
        for tx in self.queue.list_by_status(TxStatus::Queued).await {
            let age = now - tx.created_at;
            if age >= warning_start {
                let severity = if age >= critical_start { WarningSeverity::Critical } else { WarningSeverity::Warning };
                warn!(tx_id = %tx.id, age_secs = age, ?severity, "transaction approaching expiry");
                warnings.push(ExpiryWarning { tx_id: tx.id, age_secs: age as u64, severity });
            }
        }
        warnings
    }

    /// One cleanup sweep: expires and debits any tx past its TTL.
    pub async fn cleanup_sweep(&self, now: i64) -> Vec<String> {
        let mut expired_ids = Vec::new();
        for tx in self.queue.list_by_status(TxStatus::Queued).await {
            let age = now - tx.created_at;
            if age < MAX_OFFLINE_DURATION.as_secs() as i64 {
                continue;
            }

            if let Some(state_lock) = self.chain_states.get(&tx.chain) {
                if let Ok(amount) = tx.amount.parse::<rust_decimal::Decimal>() {
                    let mut state = state_lock.lock().await;
                    state.debit(&tx.token.symbol, amount, now);
                }
            }

            if self
                .queue
                .update(&tx.id, TxPatch { status: Some(TxStatus::Expired), ..Default::default() })
                .await
                .is_ok()
            {
                info!(tx_id = %tx.id, age_secs = age, "expired stale offline transaction");
                self.record_history(ExpiredTxRecord {
                    tx: tx.clone(),
                    reason: "max_offline_duration exceeded".to_string(),
                    expired_at: now,
                });
                expired_ids.push(tx.id);
            }
        }
        expired_ids
    }

    /// Manual cancellation (§4.10): equivalent of expiry, allowed only from
    /// a terminal-eligible `queued` state. Never touches on-chain nonce —
    /// the freed slot is reused by the next admission.
    pub async fn cancel(&self, id: &str) -> Result<(), crate::errors::QueueError> {
        let Some(tx) = self.queue.get(id).await else {
            return Err(crate::errors::QueueError::NotFound(id.to_string()));
        };
        if tx.status != TxStatus::Queued {
            return Err(crate::errors::QueueError::NotFound(id.to_string()));
        }

        if let Some(state_lock) = self.chain_states.get(&tx.chain) {
            if let Ok(amount) = tx.amount.parse::<rust_decimal::Decimal>() {
                let mut state = state_lock.lock().await;
                state.debit(&tx.token.symbol, amount, chrono::Utc::now().timestamp());
            }
        }

        self.queue
            .update(id, TxPatch { status: Some(TxStatus::Cancelled), ..Default::default() })
            .await
    }

    /// Spawn the warning and cleanup sweepers as independent background
    /// tasks, each driven by its own `tokio::time::interval`.
    pub fn spawn(self: Arc<Self>) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let warning_handle = {
            let this = self.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(WARNING_INTERVAL);
                loop {
                    interval.tick().await;
                    this.warning_sweep(chrono::Utc::now().timestamp()).await;
                }
            })
        };

        let cleanup_handle = {
            let this = self.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(CLEANUP_PERIOD);
                loop {
                    interval.tick().await;
                    this.cleanup_sweep(chrono::Utc::now().timestamp()).await;
                }
            })
        };

        (warning_handle, cleanup_handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secure_store::EncryptedFileStore;
    use crate::tx_queue::{SecurityMetadata, TokenSpec, Transport, TxMetadata};

    fn sample_tx(id: &str, created_at: i64) -> QueuedTx {
        QueuedTx {
            id: id.to_string(),
            chain: "ethereum".to_string(),
            to: "0xabc".to_string(),
            amount: "5".to_string(),
            token: TokenSpec { symbol: "ETH".to_string(), address: None, decimals: 18, is_native: true },
            payment_reference: None,
            signed_raw: None,
            nonce: "0".to_string(),
            transport: Transport::Relay,
            created_at,
            status: TxStatus::Queued,
            retry_count: 0,
            error: None,
            security_metadata: SecurityMetadata::default(),
            metadata: TxMetadata::default(),
        }
    }

    async fn harness() -> (Arc<TxQueue>, Arc<ChainStateRegistry>, ExpiryService) {
        let dir = std::env::temp_dir().join(format!(
            "expiry-test-{}",
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos()
        ));
        let store = Arc::new(EncryptedFileStore::new(dir.join("store.bin"), b"key"));
        let queue = Arc::new(TxQueue::new(store));
        let mut registry = ChainStateRegistry::new();
        registry.register("ethereum");
        let chain_states = Arc::new(registry);
        let service = ExpiryService::new(queue.clone(), chain_states.clone());
        (queue, chain_states, service)
    }

    #[tokio::test]
    async fn cleanup_expires_stale_tx_and_debits_balance() {
        let (queue, chain_states, service) = harness().await;
        let state_lock = chain_states.get("ethereum").unwrap();
        {
            let mut state = state_lock.lock().await;
            state.credit("ETH", rust_decimal::Decimal::from(5), 0);
        }
        queue.add(sample_tx("1", 0)).await.unwrap();

        let now = MAX_OFFLINE_DURATION.as_secs() as i64 + 3660;
        let expired = service.cleanup_sweep(now).await;
        assert_eq!(expired, vec!["1".to_string()]);

        let tx = queue.get("1").await.unwrap();
        assert_eq!(tx.status, TxStatus::Expired);

        let balance = state_lock.lock().await.balance_for("ETH").pending_amount_base_units;
        assert_eq!(balance, rust_decimal::Decimal::ZERO);
        assert_eq!(service.history().len(), 1);
    }

    #[tokio::test]
    async fn warning_sweep_ignores_fresh_tx() {
        let (queue, _chain_states, service) = harness().await;
        queue.add(sample_tx("1", chrono::Utc::now().timestamp())).await.unwrap();
        let warnings = service.warning_sweep(chrono::Utc::now().timestamp()).await;
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn cancel_is_rejected_for_non_queued_tx() {
        let (queue, _chain_states, service) = harness().await;
        let mut tx = sample_tx("1", 0);
        tx.status = TxStatus::Completed;
        queue.add(tx).await.unwrap();
        assert!(service.cancel("1").await.is_err());
    }
}
