//! Application-level configuration: offline-queue timing, lockout and
//! session windows, payload verification strictness.
//!
//! Per-chain RPC endpoints and gas bounds live in
//! [`wallet_chain::ChainRegistry`] — this module only covers the timing and
//! policy knobs that sit above any single chain.

mod app;

pub use app::{config, init_config, AppConfig, ExpiryTimingConfig, SecurityConfig};
