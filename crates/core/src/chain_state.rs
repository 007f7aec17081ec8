//! Per-chain mutable state guarded by a single async writer lock (§5):
//! `OfflineBalanceTracking` and `NonceState`. `tokio::sync::Mutex` because
//! the admission pipeline holds the guard across `.await` points — a plain
//! `parking_lot` mutex would be wrong here, unlike the purely-synchronous
//! caches in [`crate::gas`] (re-exported from `wallet-chain`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub const FRESH_TTL: Duration = Duration::from_secs(5 * 60);

/// Per `(chain, token)` pending-amount tracker (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OfflineBalanceTracking {
    pub pending_amount_base_units: rust_decimal::Decimal,
    pub last_updated: i64,
}

impl OfflineBalanceTracking {
    pub fn credit(&mut self, amount: rust_decimal::Decimal, now: i64) {
        self.pending_amount_base_units += amount;
        self.last_updated = now;
    }

    /// Debit, flooring at zero (§4.10 expiry fund recovery).
    pub fn debit(&mut self, amount: rust_decimal::Decimal, now: i64) {
        self.pending_amount_base_units =
            (self.pending_amount_base_units - amount).max(rust_decimal::Decimal::ZERO);
        self.last_updated = now;
    }
}

/// Per-chain nonce bookkeeping (§3).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NonceState {
    pub chain_observed_nonce: u64,
    pub offline_nonce: u64,
    pub last_sync: i64,
}

/// A cached chain balance reading with a freshness window.
#[derive(Debug, Clone, Copy)]
pub struct SyncedBalanceSnapshot {
    pub balance: alloy::primitives::U256,
    pub fetched_at: SystemTime,
}

impl SyncedBalanceSnapshot {
    pub fn is_fresh(&self, now: SystemTime) -> bool {
        now.duration_since(self.fetched_at).map(|age| age < FRESH_TTL).unwrap_or(false)
    }
}

/// All mutable per-chain state guarded by one writer lock.
#[derive(Debug, Default)]
pub struct ChainState {
    pub balances: HashMap<String, OfflineBalanceTracking>,
    pub nonce: NonceState,
    pub snapshot: Option<SyncedBalanceSnapshotRecord>,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncedBalanceSnapshotRecord {
    pub balance: alloy::primitives::U256,
    pub fetched_at_unix: i64,
}

impl ChainState {
    fn token_key(token_symbol: &str) -> String {
        token_symbol.to_string()
    }

    pub fn balance_for(&self, token_symbol: &str) -> OfflineBalanceTracking {
        self.balances.get(&Self::token_key(token_symbol)).cloned().unwrap_or_default()
    }

    pub fn credit(&mut self, token_symbol: &str, amount: rust_decimal::Decimal, now: i64) {
        self.balances.entry(Self::token_key(token_symbol)).or_default().credit(amount, now);
    }

    pub fn debit(&mut self, token_symbol: &str, amount: rust_decimal::Decimal, now: i64) {
        self.balances.entry(Self::token_key(token_symbol)).or_default().debit(amount, now);
    }
}

/// Owns one writer-locked [`ChainState`] per configured chain, constructed
/// at startup the same way `ChainRegistry` builds its immutable chain map.
#[derive(Default)]
pub struct ChainStateRegistry {
    states: HashMap<String, Arc<Mutex<ChainState>>>,
}

impl ChainStateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, chain: impl Into<String>) {
        self.states.entry(chain.into()).or_insert_with(|| Arc::new(Mutex::new(ChainState::default())));
    }

    pub fn get(&self, chain: &str) -> Option<Arc<Mutex<ChainState>>> {
        self.states.get(chain).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn credit_then_debit_floors_at_zero() {
        let mut tracking = OfflineBalanceTracking::default();
        tracking.credit(Decimal::from(5), 1);
        tracking.debit(Decimal::from(10), 2);
        assert_eq!(tracking.pending_amount_base_units, Decimal::ZERO);
    }

    #[tokio::test]
    async fn registry_returns_same_arc_for_same_chain() {
        let mut registry = ChainStateRegistry::new();
        registry.register("ethereum");
        let a = registry.get("ethereum").unwrap();
        let b = registry.get("ethereum").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
