//! Reconciles the offline queue against the network once connectivity
//! returns (§4.11): relay-first broadcast with on-chain fallback, bounded
//! concurrency, exponential backoff.
//!
//! `futures::stream::iter(...).buffer_unordered(MAX_CONCURRENT)` bounds
//! how many chains are synced concurrently.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};
use wallet_chain::{ChainAdapter, GasPolicy, Priority, TxShape};

use crate::admission::{decimal_to_base_units, default_gas_limit};
use crate::chain_state::ChainStateRegistry;
use crate::errors::AdmissionError;
use crate::meta_tx::MetaTxBuilder;
use crate::tx_queue::{QueuedTx, TxMetadata, TxPatch, TxQueue, TxStatus};
use crate::wallet_vault::WalletVault;

const MAX_CONCURRENT: usize = 2;
const BATCH_PAUSE: Duration = Duration::from_millis(1000);
const MAX_RETRIES: u32 = 3;
const REPRICE_AGE: Duration = Duration::from_secs(6 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Relayed,
    Broadcast,
    Skipped,
    Failed,
}

pub struct SyncEngine {
    adapters: std::collections::HashMap<String, Arc<dyn ChainAdapter>>,
    gas_policies: std::collections::HashMap<String, Arc<GasPolicy>>,
    meta_txs: std::collections::HashMap<String, MetaTxBuilder>,
    chain_states: Arc<ChainStateRegistry>,
    queue: Arc<TxQueue>,
    vault: Arc<WalletVault>,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapters: std::collections::HashMap<String, Arc<dyn ChainAdapter>>,
        gas_policies: std::collections::HashMap<String, Arc<GasPolicy>>,
        meta_txs: std::collections::HashMap<String, MetaTxBuilder>,
        chain_states: Arc<ChainStateRegistry>,
        queue: Arc<TxQueue>,
        vault: Arc<WalletVault>,
    ) -> Self {
        Self { adapters, gas_policies, meta_txs, chain_states, queue, vault }
    }

    /// Relay submission for a queued tx. No relay service is wired in yet —
    /// this always falls through to the on-chain path, matching the
    /// `relay-then-onchain` shape without pretending relay exists.
    async fn try_relay(&self, _tx: &QueuedTx) -> bool {
        false
    }

    async fn try_onchain(&self, tx: &QueuedTx) -> Result<(), AdmissionError> {
        let adapter = self
            .adapters
            .get(&tx.chain)
            .ok_or_else(|| AdmissionError::Chain(crate::errors::ChainError::ChainUnsupported(tx.chain.clone())))?;
        let Some(raw) = tx.signed_raw.as_deref() else {
            return Err(AdmissionError::AmountInvalid("missing signed payload".to_string()));
        };
        adapter.broadcast_raw(raw).await.map_err(|e| AdmissionError::AmountInvalid(e.to_string()))?;
        Ok(())
    }

    /// Re-derive gas pricing for a queued tx that has aged past
    /// [`REPRICE_AGE`] via [`GasPolicy::adjust_for_delay`], then rebuild and
    /// re-sign the same payment (same nonce, same payment reference) under
    /// the new price, persisting the updated `signed_raw`/`metadata` before
    /// resubmission (§4.11 step 1). Returns the updated tx, or `None` if the
    /// tx isn't stale enough to reprice or the rebuild failed.
    async fn reprice_and_resign(&self, tx: &QueuedTx, now: i64) -> Option<QueuedTx> {
        let age = Duration::from_secs((now - tx.created_at).max(0) as u64);
        if age < REPRICE_AGE {
            return None;
        }
        let policy = self.gas_policies.get(&tx.chain)?;
        let adapter = self.adapters.get(&tx.chain)?;
        let meta_tx = self.meta_txs.get(&tx.chain)?;

        let live_gwei = adapter.gas_price().await.ok()? as f64 / 1_000_000_000.0;
        policy.observe(live_gwei);
        let live_wei = policy.estimate_optimal(live_gwei, Priority::Normal);

        let original_wei = tx
            .metadata
            .adjusted_gas_price
            .as_ref()
            .and_then(|s| s.parse::<u128>().ok())
            .unwrap_or(live_wei);
        let hours = age.as_secs_f64() / 3600.0;
        let repriced_wei = policy.adjust_for_delay(original_wei, hours, live_wei);

        let nonce: u128 = tx.nonce.parse().ok()?;
        let amount: rust_decimal::Decimal = tx.amount.parse().ok()?;
        let u256_amount = decimal_to_base_units(amount, tx.token.decimals);
        let to: Address = tx.to.parse().ok()?;
        let shape = if tx.token.is_native { TxShape::NativeTransfer } else { TxShape::Erc20Transfer };
        let gas_limit = default_gas_limit(shape);

        let signed = if tx.token.is_native {
            meta_tx
                .build_native(&self.vault, to, u256_amount, U256::from(nonce), tx.payment_reference.clone())
                .await
                .ok()?
        } else {
            let token: Address = tx.token.address.as_deref()?.parse().ok()?;
            meta_tx
                .build_token(&self.vault, to, token, u256_amount, U256::from(nonce), tx.payment_reference.clone())
                .await
                .ok()?
        };

        let metadata = TxMetadata {
            adjusted_gas_price: Some(repriced_wei.to_string()),
            adjusted_gas_limit: Some(gas_limit),
            delay_hours: Some(hours),
            original_timestamp: tx.metadata.original_timestamp.or(Some(tx.created_at)),
            ..tx.metadata.clone()
        };
        let signed_raw = Some(format!("0x{}", hex::encode(signed.signature.as_bytes())));

        self.queue
            .update(
                &tx.id,
                TxPatch { signed_raw: Some(signed_raw.clone()), metadata: Some(metadata.clone()), ..Default::default() },
            )
            .await
            .ok()?;

        info!(id = %tx.id, repriced_gwei = repriced_wei as f64 / 1_000_000_000.0, "repriced and resigned stale queued tx");

        let mut updated = tx.clone();
        updated.signed_raw = signed_raw;
        updated.metadata = metadata;
        Some(updated)
    }

    /// Process one queued tx: idempotent — `pending`/`completed` txs are
    /// skipped without side effects.
    pub async fn sync_one(&self, tx: &QueuedTx) -> SyncOutcome {
        if !matches!(tx.status, TxStatus::Queued | TxStatus::Failed) {
            return SyncOutcome::Skipped;
        }

        let now = chrono::Utc::now().timestamp();
        let resigned = self.reprice_and_resign(tx, now).await;
        let tx = resigned.as_ref().unwrap_or(tx);

        if self.try_relay(tx).await {
            self.mark_pending(tx).await;
            return SyncOutcome::Relayed;
        }

        if !self.adapters.contains_key(&tx.chain) {
            warn!(id = %tx.id, chain = %tx.chain, "sync target has no configured adapter");
            let _ = self
                .queue
                .update(
                    &tx.id,
                    TxPatch { status: Some(TxStatus::Failed), error: Some(Some("chain unsupported".to_string())), ..Default::default() },
                )
                .await;
            return SyncOutcome::Failed;
        }

        let mut attempt = 0;
        loop {
            match self.try_onchain(tx).await {
                Ok(()) => {
                    self.mark_pending(tx).await;
                    return SyncOutcome::Broadcast;
                }
                Err(e) if attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!(id = %tx.id, attempt, error = %e, "sync attempt failed, backing off");
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
                Err(e) => {
                    warn!(id = %tx.id, error = %e, "sync exhausted retries");
                    let _ = self
                        .queue
                        .update(
                            &tx.id,
                            TxPatch {
                                status: Some(TxStatus::Failed),
                                error: Some(Some(e.to_string())),
                                retry_count: Some(attempt),
                                ..Default::default()
                            },
                        )
                        .await;
                    return SyncOutcome::Failed;
                }
            }
        }
    }

    async fn mark_pending(&self, tx: &QueuedTx) {
        if self
            .queue
            .update(&tx.id, TxPatch { status: Some(TxStatus::Pending), error: Some(None), ..Default::default() })
            .await
            .is_ok()
        {
            if let Some(state_lock) = self.chain_states.get(&tx.chain) {
                if let Ok(amount) = tx.amount.parse::<rust_decimal::Decimal>() {
                    let mut state = state_lock.lock().await;
                    state.debit(&tx.token.symbol, amount, chrono::Utc::now().timestamp());
                }
            }
            info!(id = %tx.id, chain = %tx.chain, "transaction submitted");
        }
    }

    /// Drain the whole queued+failed backlog, `MAX_CONCURRENT` at a time,
    /// pausing [`BATCH_PAUSE`] between batches.
    pub async fn sync_all(&self) -> Vec<(String, SyncOutcome)> {
        let mut pending: Vec<QueuedTx> = self.queue.list_by_status(TxStatus::Queued).await;
        pending.extend(self.queue.list_by_status(TxStatus::Failed).await);

        let mut results = Vec::with_capacity(pending.len());
        for batch in pending.chunks(MAX_CONCURRENT * 4) {
            let outcomes: Vec<(String, SyncOutcome)> = stream::iter(batch.iter().cloned())
                .map(|tx| async move { (tx.id.clone(), self.sync_one(&tx).await) })
                .buffer_unordered(MAX_CONCURRENT)
                .collect()
                .await;
            results.extend(outcomes);
            tokio::time::sleep(BATCH_PAUSE).await;
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secure_store::EncryptedFileStore;
    use crate::tx_queue::{SecurityMetadata, TokenSpec, Transport, TxMetadata};

    fn sample_tx(id: &str, status: TxStatus) -> QueuedTx {
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
            created_at: chrono::Utc::now().timestamp(),
            status,
            retry_count: 0,
            error: None,
            security_metadata: SecurityMetadata::default(),
            metadata: TxMetadata::default(),
        }
    }

    async fn engine() -> (Arc<TxQueue>, SyncEngine) {
        let dir = std::env::temp_dir().join(format!(
            "sync-engine-test-{}",
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos()
        ));
        let store = Arc::new(EncryptedFileStore::new(dir.join("store.bin"), b"key"));
        let queue = Arc::new(TxQueue::new(store));
        let registry = Arc::new(ChainStateRegistry::new());
        let vault_store: Arc<dyn crate::secure_store::SecureStore> =
            Arc::new(EncryptedFileStore::new(dir.join("vault.bin"), b"key"));
        let vault = Arc::new(WalletVault::new(vault_store));
        vault.create_random().await.unwrap();
        let engine = SyncEngine::new(Default::default(), Default::default(), Default::default(), registry, queue.clone(), vault);
        (queue, engine)
    }

    #[tokio::test]
    async fn sync_skips_already_completed_tx() {
        let (_queue, engine) = engine().await;
        let tx = sample_tx("1", TxStatus::Completed);
        assert_eq!(engine.sync_one(&tx).await, SyncOutcome::Skipped);
    }

    #[tokio::test]
    async fn sync_fails_queued_tx_with_unknown_chain() {
        let (_queue, engine) = engine().await;
        let tx = sample_tx("1", TxStatus::Queued);
        assert_eq!(engine.sync_one(&tx).await, SyncOutcome::Failed);
    }
}
