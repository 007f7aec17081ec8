//! Multi-chain EVM connectivity layer.
//!
//! This crate provides:
//! - [`registry`]: the table of supported chains, loaded from TOML config
//! - [`gas`]: per-chain gas policy (price bounds, spikes, limit validation)
//! - [`adapter`]: the uniform [`adapter::ChainAdapter`] trait each chain is
//!   reached through, with RPC endpoint failover

mod adapter;
mod gas;
mod registry;

pub use adapter::{AdapterError, ChainAdapter, ChainStatus, HttpChainAdapter, TxReceiptView};
pub use gas::{
    Eip1559GasSource, GasLevel, GasPolicy, GasSource, LegacyGasSource, LimitEfficiency,
    LimitValidation, PriceValidation, Priority, Reasonableness, TxShape,
};
pub use registry::{ChainEntry, ChainRegistry, GasBounds, NativeToken, RpcEndpoints};
