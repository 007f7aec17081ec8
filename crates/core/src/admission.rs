//! The offline admission pipeline (§4.8): the gate every new payment must
//! pass before it is persisted to [`crate::tx_queue::TxQueue`].
//!
//! One `async fn admit(...)` threads the chain writer-lock guard through
//! all eight steps and returns `Result<QueuedTx, AdmissionError>`: acquire
//! the lock once, run the whole critical section, release.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy::primitives::Address;
use rust_decimal::Decimal;
use tracing::{info, warn};
use wallet_chain::{ChainAdapter, GasPolicy, Priority as GasPriority, Reasonableness, TxShape};

use crate::amount::parse_amount;
use crate::chain_state::{ChainStateRegistry, SyncedBalanceSnapshotRecord, FRESH_TTL};
use crate::cross_wallet::{classify_conflict, CrossWalletMonitor, NonceConflict};
use crate::errors::{AdmissionError, ChainError, GasError};
use crate::meta_tx::MetaTxBuilder;
use crate::tx_queue::{QueuedTx, SecurityMetadata, TokenSpec, Transport, TxQueue, TxStatus};
use crate::wallet_vault::WalletVault;

const BALANCE_SYNC_TIMEOUT: Duration = Duration::from_secs(10);
const LARGE_GAP_STRICT_THRESHOLD: i64 = 100;

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Request to admit a new payment into the offline queue.
pub struct AdmissionRequest {
    pub chain: String,
    pub to: Address,
    pub amount_raw: String,
    pub token: TokenSpec,
    pub payment_reference: Option<String>,
    pub transport: Transport,
    pub chain_reachable: bool,
    pub priority: GasPriority,
}

/// Wires together everything the pipeline needs for one chain's admission
/// attempts: chain adapter, gas policy, writer-locked state, the queue,
/// the vault, the meta-tx builder, and the cross-wallet monitor.
pub struct OfflineAdmission {
    adapter: Arc<dyn ChainAdapter>,
    gas_policy: Arc<GasPolicy>,
    chain_states: Arc<ChainStateRegistry>,
    queue: Arc<TxQueue>,
    vault: Arc<WalletVault>,
    meta_tx: MetaTxBuilder,
    monitor: Arc<CrossWalletMonitor>,
    chain: String,
    max_decimals: u32,
}

impl OfflineAdmission {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: impl Into<String>,
        adapter: Arc<dyn ChainAdapter>,
        gas_policy: Arc<GasPolicy>,
        chain_states: Arc<ChainStateRegistry>,
        queue: Arc<TxQueue>,
        vault: Arc<WalletVault>,
        meta_tx: MetaTxBuilder,
        monitor: Arc<CrossWalletMonitor>,
        max_decimals: u32,
    ) -> Self {
        Self {
            adapter,
            gas_policy,
            chain_states,
            queue,
            vault,
            meta_tx,
            monitor,
            chain: chain.into(),
            max_decimals,
        }
    }

    pub async fn admit(&self, req: AdmissionRequest) -> Result<QueuedTx, AdmissionError> {
        let amount = parse_amount(&req.amount_raw, self.max_decimals).map_err(AdmissionError::AmountInvalid)?;
        let own_address = self.vault.address().await?;

        let state_lock = self
            .chain_states
            .get(&self.chain)
            .ok_or_else(|| AdmissionError::Chain(ChainError::ChainUnsupported(self.chain.clone())))?;
        let mut state = state_lock.lock().await;

        // Step 1: force balance sync attempt (best-effort).
        let offline_origin = !req.chain_reachable;
        let snapshot = self.sync_balance(offline_origin, own_address, &mut state).await?;

        // Step 2: cross-wallet reconciliation (logged, non-fatal by itself).
        if let Err(e) = self.monitor.reconcile_nonce(&self.chain).await {
            warn!(chain = %self.chain, error = %e, "cross-wallet reconciliation failed during admission");
        }

        // Step 3: balance check.
        let pending = state.balance_for(&req.token.symbol).pending_amount_base_units;
        let external_pending = self.monitor.external_pending_value(&self.chain).await.unwrap_or_else(|e| {
            warn!(chain = %self.chain, error = %e, "external pending lookup failed, treating as zero");
            Decimal::ZERO
        });
        let available = Decimal::from(u128_from_u256(snapshot)) - pending - external_pending;
        if available < amount {
            return Err(AdmissionError::InsufficientAvailableBalance {
                required: amount.to_string(),
                available: available.to_string(),
                external_activity: external_pending > Decimal::ZERO,
            });
        }

        // Step 4: duplicate check.
        let existing = self.queue.list_by_status(TxStatus::Queued).await;
        let to_hex = format!("{:#x}", req.to);
        if existing
            .iter()
            .any(|tx| tx.chain == self.chain && tx.to == to_hex && tx.amount == amount.to_string())
        {
            return Err(AdmissionError::DuplicateTransaction);
        }
        let recent_same_target = existing.iter().any(|tx| {
            tx.chain == self.chain && tx.to == to_hex && now_unix() - tx.created_at <= 300
        });
        if recent_same_target {
            warn!(chain = %self.chain, to = %to_hex, "similar transaction queued within the last 5 minutes");
        }

        // Step 5: nonce check.
        let chain_nonce = if req.chain_reachable {
            self.adapter.nonce(own_address).await.unwrap_or(state.nonce.chain_observed_nonce)
        } else {
            state.nonce.chain_observed_nonce
        };
        let conflict = classify_conflict(chain_nonce, state.nonce.offline_nonce);
        match conflict {
            NonceConflict::OfflineAhead => return Err(AdmissionError::NonceOfflineAhead),
            NonceConflict::LargeGap { gap } if gap.unsigned_abs() as i64 > LARGE_GAP_STRICT_THRESHOLD => {
                return Err(AdmissionError::NonceLargeGap { gap })
            }
            NonceConflict::LargeGap { gap } => return Err(AdmissionError::NonceLargeGap { gap }),
            NonceConflict::BlockchainAhead => {
                state.nonce.offline_nonce = chain_nonce.max(state.nonce.offline_nonce);
            }
            NonceConflict::None => {}
        }
        let assigned_nonce = state.nonce.offline_nonce;
        state.nonce.offline_nonce += 1;

        // Step 6: gas validation.
        let live_gwei = self.adapter.gas_price().await.unwrap_or(0) as f64 / 1_000_000_000.0;
        self.gas_policy.observe(live_gwei);
        let optimal_wei = self.gas_policy.estimate_optimal(live_gwei, req.priority);
        let validation = self.gas_policy.validate_price(optimal_wei);
        if !validation.valid {
            if validation.gwei < self.gas_policy.bounds().min_gwei {
                return Err(GasError::GasPriceTooLow { gwei: validation.gwei, min_gwei: self.gas_policy.bounds().min_gwei }.into());
            }
            return Err(GasError::GasPriceTooHigh { gwei: validation.gwei, max_gwei: self.gas_policy.bounds().max_gwei }.into());
        }
        if self.gas_policy.detect_spike(optimal_wei) {
            return Err(GasError::GasPriceSpike { gwei: validation.gwei, mean_gwei: live_gwei }.into());
        }
        if self.gas_policy.reasonableness(optimal_wei, live_gwei) == Reasonableness::VeryHigh {
            return Err(GasError::GasPriceUnreasonable { gwei: validation.gwei, network_gwei: live_gwei }.into());
        }
        let shape = if req.token.is_native { TxShape::NativeTransfer } else { TxShape::Erc20Transfer };
        let limit_validation = self.gas_policy.validate_limit(default_gas_limit(shape), shape);
        if !limit_validation.valid {
            return Err(GasError::GasLimitOutOfBounds { limit: default_gas_limit(shape) }.into());
        }

        // Step 7: sign.
        let u256_amount = decimal_to_base_units(amount, req.token.decimals);
        let signed = self
            .meta_tx
            .build_native(
                &self.vault,
                req.to,
                u256_amount,
                alloy::primitives::U256::from(assigned_nonce),
                req.payment_reference.clone(),
            )
            .await?;

        // Step 8: persist.
        let now = now_unix();
        let tx = QueuedTx {
            id: format!("{}-{}-{}", self.chain, to_hex, now),
            chain: self.chain.clone(),
            to: to_hex,
            amount: amount.to_string(),
            token: req.token.clone(),
            payment_reference: Some(signed.payment_reference),
            signed_raw: Some(format!("0x{}", hex::encode(signed.signature.as_bytes()))),
            nonce: assigned_nonce.to_string(),
            transport: req.transport,
            created_at: now,
            status: TxStatus::Queued,
            retry_count: 0,
            error: None,
            security_metadata: SecurityMetadata {
                balance_validated: true,
                duplicate_checked: true,
                nonce_validated: true,
                created_offline_at: offline_origin.then_some(now),
            },
            metadata: Default::default(),
        };

        state.credit(&req.token.symbol, amount, now);
        self.queue.add(tx.clone()).await?;

        info!(chain = %self.chain, id = %tx.id, %amount, "admitted offline transaction");
        Ok(tx)
    }

    async fn sync_balance(
        &self,
        offline_origin: bool,
        address: Address,
        state: &mut crate::chain_state::ChainState,
    ) -> Result<alloy::primitives::U256, AdmissionError> {
        let attempt = tokio::time::timeout(BALANCE_SYNC_TIMEOUT, self.adapter.balance(address)).await;
        match attempt {
            Ok(Ok(balance)) => {
                state.snapshot = Some(SyncedBalanceSnapshotRecord { balance, fetched_at_unix: now_unix() });
                Ok(balance)
            }
            _ => match state.snapshot {
                Some(snapshot) if now_unix() - snapshot.fetched_at_unix < FRESH_TTL.as_secs() as i64 => {
                    Ok(snapshot.balance)
                }
                _ if offline_origin => Err(AdmissionError::SyncRequired),
                Some(snapshot) => Ok(snapshot.balance),
                None => Ok(alloy::primitives::U256::ZERO),
            },
        }
    }
}

fn u128_from_u256(value: alloy::primitives::U256) -> u128 {
    value.try_into().unwrap_or(u128::MAX)
}

/// Scale a decimal token amount up to an integer base-unit value, e.g.
/// `1.5` at 18 decimals becomes `1_500_000_000_000_000_000`.
pub(crate) fn decimal_to_base_units(amount: Decimal, decimals: u8) -> alloy::primitives::U256 {
    let scaled = amount.round_dp(decimals as u32) * Decimal::from(10u64.pow(decimals as u32));
    let as_u128: u128 = scaled.trunc().try_into().unwrap_or(0);
    alloy::primitives::U256::from(as_u128)
}

pub(crate) fn default_gas_limit(shape: TxShape) -> u64 {
    match shape {
        TxShape::NativeTransfer => 21_000,
        TxShape::Erc20Transfer => 65_000,
        TxShape::ContractCall => 150_000,
        TxShape::Complex => 300_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_gap_threshold_matches_spec_boundaries() {
        assert!(!matches!(classify_conflict(14, 4), NonceConflict::LargeGap { .. })); // gap 10
        assert!(matches!(classify_conflict(15, 4), NonceConflict::LargeGap { .. })); // gap 11
        assert!(matches!(classify_conflict(105, 4), NonceConflict::LargeGap { gap: 101 })); // gap 101
    }
}
