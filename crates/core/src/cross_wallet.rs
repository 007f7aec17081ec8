//! Detects whether the wallet's address is being operated from elsewhere
//! and reconciles the offline nonce against it (§4.9).
//!
//! The 30s poll loop is a plain `tokio::spawn`ed loop. `SecurityWarning`s
//! go out over a `tokio::sync::broadcast` channel — event emission rather
//! than a direct call back into `OfflineAdmission`, breaking the cyclic
//! dependency described in §9.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use tokio::sync::broadcast;
use tracing::{info, warn};
use wallet_chain::ChainAdapter;

use crate::chain_state::ChainStateRegistry;

const POLL_INTERVAL: Duration = Duration::from_secs(30);
const ACTIVITY_BLOCK_WINDOW: u64 = 20;

/// A signature-trailer marker embedded in `paymentReference` so this
/// wallet's own transactions are distinguishable from externally signed
/// ones on the same address.
pub const SIGNATURE_TRAILER_MARKER: &str = "#acp1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone)]
pub enum SecurityWarning {
    ExternalWalletActivity { chain: String, severity: Severity, tx_count: usize },
    NonceConflict { chain: String, severity: Severity, conflict: NonceConflict },
    LowAvailableBalance { chain: String, severity: Severity },
}

/// Classification of the relationship between `offline_nonce` and
/// `chain_nonce` (§4.9, used by admission step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceConflict {
    None,
    OfflineAhead,
    BlockchainAhead,
    LargeGap { gap: i64 },
}

/// `gap` is `chain_nonce - offline_nonce`.
pub fn classify_conflict(chain_nonce: u64, offline_nonce: u64) -> NonceConflict {
    let gap = chain_nonce as i64 - offline_nonce as i64;
    if gap < 0 {
        return NonceConflict::OfflineAhead;
    }
    if gap.unsigned_abs() > 100 {
        return NonceConflict::LargeGap { gap };
    }
    if gap.unsigned_abs() > 10 {
        return NonceConflict::LargeGap { gap };
    }
    if gap > 1 {
        return NonceConflict::BlockchainAhead;
    }
    NonceConflict::None
}

pub struct CrossWalletMonitor {
    adapters: std::collections::HashMap<String, Arc<dyn ChainAdapter>>,
    chain_states: Arc<ChainStateRegistry>,
    address: Address,
    events: broadcast::Sender<SecurityWarning>,
}

impl CrossWalletMonitor {
    pub fn new(
        adapters: std::collections::HashMap<String, Arc<dyn ChainAdapter>>,
        chain_states: Arc<ChainStateRegistry>,
        address: Address,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self { adapters, chain_states, address, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SecurityWarning> {
        self.events.subscribe()
    }

    /// Outbound activity on `chain` over the last [`ACTIVITY_BLOCK_WINDOW`]
    /// blocks that lacks this wallet's signature-trailer marker.
    pub async fn external_activity(&self, chain: &str) -> anyhow::Result<usize> {
        Ok(self.external_txs(chain).await?.len())
    }

    async fn external_txs(
        &self,
        chain: &str,
    ) -> anyhow::Result<Vec<wallet_chain::TxReceiptView>> {
        let Some(adapter) = self.adapters.get(chain) else {
            return Ok(Vec::new());
        };
        let txs = adapter.recent_txs_from(self.address, ACTIVITY_BLOCK_WINDOW).await?;
        Ok(txs
            .into_iter()
            .filter(|tx| !String::from_utf8_lossy(&tx.input).contains(SIGNATURE_TRAILER_MARKER))
            .collect())
    }

    /// Total value moved by this wallet's externally-signed recent activity
    /// on `chain` (§4.8 step 3): the cross-wallet contribution that must be
    /// subtracted from `available` alongside this device's own pending txs.
    pub async fn external_pending_value(&self, chain: &str) -> anyhow::Result<rust_decimal::Decimal> {
        let txs = self.external_txs(chain).await?;
        let total: u128 = txs.iter().map(|tx| tx.value.try_into().unwrap_or(u128::MAX)).sum();
        Ok(rust_decimal::Decimal::from(total))
    }

    /// `effective = max(chain_nonce, external_max_nonce, offline_nonce)`.
    /// If `offline_nonce < effective`, heals it to `effective + 1`.
    pub async fn reconcile_nonce(&self, chain: &str) -> anyhow::Result<NonceConflict> {
        let Some(adapter) = self.adapters.get(chain) else {
            return Ok(NonceConflict::None);
        };
        let Some(state_lock) = self.chain_states.get(chain) else {
            return Ok(NonceConflict::None);
        };

        let chain_nonce = adapter.nonce(self.address).await?;
        let mut state = state_lock.lock().await;
        let conflict = classify_conflict(chain_nonce, state.nonce.offline_nonce);
        state.nonce.chain_observed_nonce = chain_nonce;

        if let NonceConflict::BlockchainAhead = conflict {
            let effective = chain_nonce.max(state.nonce.offline_nonce);
            state.nonce.offline_nonce = effective + 1;
            info!(chain, healed_to = state.nonce.offline_nonce, "self-healed offline nonce");
        }
        Ok(conflict)
    }

    /// Spawn the 30 s poll loop as a background task.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            loop {
                interval.tick().await;
                for chain in self.adapters.keys().cloned().collect::<Vec<_>>() {
                    match self.reconcile_nonce(&chain).await {
                        Ok(NonceConflict::None) => {}
                        Ok(conflict) => {
                            let severity = match conflict {
                                NonceConflict::OfflineAhead => Severity::Critical,
                                NonceConflict::LargeGap { gap } if gap.unsigned_abs() > 100 => Severity::Critical,
                                NonceConflict::LargeGap { .. } => Severity::High,
                                NonceConflict::BlockchainAhead => Severity::Medium,
                                NonceConflict::None => Severity::Low,
                            };
                            let _ = self.events.send(SecurityWarning::NonceConflict {
                                chain: chain.clone(),
                                severity,
                                conflict,
                            });
                        }
                        Err(e) => warn!(chain, error = %e, "cross-wallet nonce reconciliation failed"),
                    }

                    match self.external_activity(&chain).await {
                        Ok(0) => {}
                        Ok(count) => {
                            let _ = self.events.send(SecurityWarning::ExternalWalletActivity {
                                chain: chain.clone(),
                                severity: Severity::Medium,
                                tx_count: count,
                            });
                        }
                        Err(e) => warn!(chain, error = %e, "external activity scan failed"),
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gap_of_exactly_ten_is_not_large() {
        assert_eq!(classify_conflict(14, 4), NonceConflict::BlockchainAhead);
    }

    #[test]
    fn gap_of_eleven_is_large() {
        assert!(matches!(classify_conflict(15, 4), NonceConflict::LargeGap { .. }));
    }

    #[test]
    fn gap_of_101_is_large_gap() {
        assert!(matches!(classify_conflict(105, 4), NonceConflict::LargeGap { gap: 101 }));
    }

    #[test]
    fn offline_ahead_is_detected() {
        assert_eq!(classify_conflict(4, 10), NonceConflict::OfflineAhead);
    }

    #[test]
    fn equal_nonces_have_no_conflict() {
        assert_eq!(classify_conflict(4, 4), NonceConflict::None);
    }
}
