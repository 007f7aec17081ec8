//! Per-chain gas policy: price bounds, spike detection, reasonableness
//! classification, and gas-limit bounds per transaction shape.
//!
//! A `GasSource` trait pair (EIP-1559 and legacy) supplies live prices;
//! `GasPolicy` is chain-parameterized and judges, rather than just
//! fetches, a gas price.

mod eip1559;
mod legacy;

pub use eip1559::Eip1559GasSource;
pub use legacy::LegacyGasSource;

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::registry::GasBounds;

const SPIKE_WINDOW: Duration = Duration::from_secs(10 * 60);
const SPIKE_MULTIPLIER: f64 = 3.0;
const GWEI: f64 = 1_000_000_000.0;

/// Source of a live gas price reading from the chain.
#[async_trait]
pub trait GasSource: Send + Sync + std::fmt::Debug {
    async fn fetch_gwei(&self, rpc_url: &str) -> anyhow::Result<f64>;
    fn strategy_name(&self) -> &'static str;
}

/// Severity bucket for a validated gas price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasLevel {
    None,
    Warning,
    Emergency,
}

/// Result of [`GasPolicy::validate_price`].
#[derive(Debug, Clone, Copy)]
pub struct PriceValidation {
    pub valid: bool,
    pub gwei: f64,
    pub level: GasLevel,
}

/// Ratio-based reasonableness classification vs. the current network price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reasonableness {
    VeryLow,
    Low,
    Reasonable,
    High,
    VeryHigh,
}

/// Shape of the transaction a gas limit is being validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxShape {
    NativeTransfer,
    Erc20Transfer,
    ContractCall,
    Complex,
}

impl TxShape {
    /// `(min, max)` gas-limit bounds for this shape.
    fn bounds(self) -> (u64, u64) {
        match self {
            TxShape::NativeTransfer => (21_000, 30_000),
            TxShape::Erc20Transfer => (45_000, 120_000),
            TxShape::ContractCall => (80_000, 400_000),
            TxShape::Complex => (150_000, 1_500_000),
        }
    }
}

/// Efficiency bucket for a gas limit relative to its shape's expected range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitEfficiency {
    Optimal,
    Good,
    High,
}

/// Result of [`GasPolicy::validate_limit`].
#[derive(Debug, Clone, Copy)]
pub struct LimitValidation {
    pub valid: bool,
    pub efficiency: LimitEfficiency,
}

/// Urgency tier used by [`GasPolicy::estimate_optimal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    fn multiplier(self) -> f64 {
        match self {
            Priority::Low => 0.9,
            Priority::Normal => 1.0,
            Priority::High => 1.2,
            Priority::Urgent => 1.5,
        }
    }
}

/// Per-chain gas policy: bounds, rolling price history for spike detection,
/// and gas-limit validation.
#[derive(Debug)]
pub struct GasPolicy {
    bounds: GasBounds,
    /// Rolling window of `(observed_at, gwei)` for spike detection, newest last.
    history: Mutex<VecDeque<(Instant, f64)>>,
}

impl GasPolicy {
    pub fn new(bounds: GasBounds) -> Self {
        Self {
            bounds,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn bounds(&self) -> GasBounds {
        self.bounds
    }

    /// Record an observed network gas price, trimming entries older than
    /// [`SPIKE_WINDOW`].
    pub fn observe(&self, gwei: f64) {
        let mut history = self.history.lock();
        let now = Instant::now();
        history.push_back((now, gwei));
        while let Some((ts, _)) = history.front() {
            if now.duration_since(*ts) > SPIKE_WINDOW {
                history.pop_front();
            } else {
                break;
            }
        }
    }

    fn rolling_mean(&self) -> Option<f64> {
        let history = self.history.lock();
        if history.is_empty() {
            return None;
        }
        let sum: f64 = history.iter().map(|(_, gwei)| gwei).sum();
        Some(sum / history.len() as f64)
    }

    /// §4.5 `validate_price`: reject `p < min` or `p > max`.
    pub fn validate_price(&self, wei: u128) -> PriceValidation {
        let gwei = wei as f64 / GWEI;
        let valid = gwei >= self.bounds.min_gwei && gwei <= self.bounds.max_gwei;
        let level = if gwei >= self.bounds.emergency_gwei {
            GasLevel::Emergency
        } else if gwei >= self.bounds.warn_gwei {
            GasLevel::Warning
        } else {
            GasLevel::None
        };
        PriceValidation { valid, gwei, level }
    }

    /// §4.5 `detect_spike`: `p > 3 * mean(history)` over the last 10 minutes.
    pub fn detect_spike(&self, wei: u128) -> bool {
        let gwei = wei as f64 / GWEI;
        match self.rolling_mean() {
            Some(mean) if mean > 0.0 => gwei > SPIKE_MULTIPLIER * mean,
            _ => false,
        }
    }

    /// §4.5 `reasonableness`: classify `p` vs. the current network price.
    pub fn reasonableness(&self, wei: u128, network_gwei: f64) -> Reasonableness {
        if network_gwei <= 0.0 {
            return Reasonableness::Reasonable;
        }
        let gwei = wei as f64 / GWEI;
        let ratio = gwei / network_gwei;
        if ratio < 0.5 {
            Reasonableness::VeryLow
        } else if ratio < 0.8 {
            Reasonableness::Low
        } else if ratio <= 1.5 {
            Reasonableness::Reasonable
        } else if ratio <= 3.0 {
            Reasonableness::High
        } else {
            Reasonableness::VeryHigh
        }
    }

    /// §4.5 `validate_limit`.
    pub fn validate_limit(&self, gas_limit: u64, shape: TxShape) -> LimitValidation {
        let (min, max) = shape.bounds();
        let valid = gas_limit >= min && gas_limit <= max;
        let span = (max - min).max(1);
        let offset = gas_limit.saturating_sub(min);
        let efficiency = if !valid {
            LimitEfficiency::High
        } else if offset * 4 <= span {
            LimitEfficiency::Optimal
        } else if offset * 4 <= span * 3 {
            LimitEfficiency::Good
        } else {
            LimitEfficiency::High
        };
        LimitValidation { valid, efficiency }
    }

    /// §4.5 `estimate_optimal`: priority multiplier applied to the current
    /// network price, clamped to `[min_gwei, max_gwei]`.
    pub fn estimate_optimal(&self, network_gwei: f64, priority: Priority) -> u128 {
        let proposed = network_gwei * priority.multiplier();
        let clamped = proposed.clamp(self.bounds.min_gwei, self.bounds.max_gwei);
        (clamped * GWEI) as u128
    }

    /// §4.5 `adjust_for_delay`: `min(1 + 0.05 * hours, 2.0)` multiplier on
    /// the original price; final price is the max of that and the current
    /// live price.
    pub fn adjust_for_delay(&self, original_wei: u128, hours_since_queued: f64, live_wei: u128) -> u128 {
        let multiplier = (1.0 + 0.05 * hours_since_queued).min(2.0);
        let adjusted = (original_wei as f64 * multiplier) as u128;
        adjusted.max(live_wei)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> GasPolicy {
        GasPolicy::new(GasBounds {
            min_gwei: 1.0,
            max_gwei: 500.0,
            warn_gwei: 100.0,
            emergency_gwei: 300.0,
        })
    }

    #[test]
    fn validate_price_rejects_out_of_bounds() {
        let p = policy();
        assert!(!p.validate_price(0).valid);
        assert!(p.validate_price((50.0 * GWEI) as u128).valid);
        assert!(!p.validate_price((600.0 * GWEI) as u128).valid);
    }

    #[test]
    fn validate_price_levels() {
        let p = policy();
        assert_eq!(p.validate_price((50.0 * GWEI) as u128).level, GasLevel::None);
        assert_eq!(p.validate_price((150.0 * GWEI) as u128).level, GasLevel::Warning);
        assert_eq!(p.validate_price((350.0 * GWEI) as u128).level, GasLevel::Emergency);
    }

    #[test]
    fn detect_spike_needs_history() {
        let p = policy();
        assert!(!p.detect_spike((100.0 * GWEI) as u128));
        for _ in 0..5 {
            p.observe(10.0);
        }
        assert!(p.detect_spike((40.0 * GWEI) as u128));
        assert!(!p.detect_spike((20.0 * GWEI) as u128));
    }

    #[test]
    fn reasonableness_buckets() {
        let p = policy();
        assert_eq!(p.reasonableness((4.0 * GWEI) as u128, 10.0), Reasonableness::VeryLow);
        assert_eq!(p.reasonableness((10.0 * GWEI) as u128, 10.0), Reasonableness::Reasonable);
        assert_eq!(p.reasonableness((40.0 * GWEI) as u128, 10.0), Reasonableness::VeryHigh);
    }

    #[test]
    fn validate_limit_bounds() {
        let p = policy();
        assert!(p.validate_limit(21_000, TxShape::NativeTransfer).valid);
        assert!(!p.validate_limit(1, TxShape::NativeTransfer).valid);
        assert!(!p.validate_limit(1_000_000, TxShape::NativeTransfer).valid);
    }

    #[test]
    fn estimate_optimal_respects_bounds_and_multiplier() {
        let p = policy();
        assert_eq!(p.estimate_optimal(50.0, Priority::Normal), (50.0 * GWEI) as u128);
        assert_eq!(p.estimate_optimal(50.0, Priority::Urgent), (75.0 * GWEI) as u128);
        // Clamped even if urgent multiplier would exceed max_gwei.
        assert_eq!(p.estimate_optimal(400.0, Priority::Urgent), (500.0 * GWEI) as u128);
    }

    #[test]
    fn adjust_for_delay_caps_multiplier_and_floors_on_live_price() {
        let p = policy();
        let original = (10.0 * GWEI) as u128;
        // 10 hours => 1.5x
        assert_eq!(p.adjust_for_delay(original, 10.0, (5.0 * GWEI) as u128), (15.0 * GWEI) as u128);
        // 100 hours => capped at 2.0x
        assert_eq!(p.adjust_for_delay(original, 100.0, (5.0 * GWEI) as u128), (20.0 * GWEI) as u128);
        // live price higher than adjusted original wins
        assert_eq!(p.adjust_for_delay(original, 1.0, (50.0 * GWEI) as u128), (50.0 * GWEI) as u128);
    }
}
