//! Uniform RPC façade each configured chain is reached through.
//!
//! Combines the provider read path and the transaction-sending write path
//! into a single trait with built-in endpoint failover.

use std::time::Duration;

use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{BlockNumberOrTag, Filter, TransactionRequest};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::gas::{Eip1559GasSource, GasSource, LegacyGasSource};
use crate::registry::ChainEntry;

const STATUS_TIMEOUT: Duration = Duration::from_secs(5);
const BALANCE_TIMEOUT: Duration = Duration::from_secs(10);
const CALL_TIMEOUT: Duration = Duration::from_secs(10);
const GWEI: f64 = 1_000_000_000.0;
const FALLBACK_PRIORITY_FEE_WEI: u128 = 1_500_000_000;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("all RPC endpoints for chain {chain} failed")]
    AllEndpointsFailed { chain: String },
    #[error(transparent)]
    Rpc(#[from] anyhow::Error),
}

/// Result of [`ChainAdapter::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStatus {
    pub reachable: bool,
    pub block_number: u64,
}

/// Minimal view of a past transaction, used by cross-wallet activity scans.
#[derive(Debug, Clone)]
pub struct TxReceiptView {
    pub hash: TxHash,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub block_number: u64,
    pub input: Bytes,
}

/// RPC façade for a single chain: status, balance, nonce, gas price,
/// gas estimation, raw broadcast, and a bounded recent-activity scan.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    async fn status(&self) -> ChainStatus;
    async fn balance(&self, address: Address) -> Result<U256, AdapterError>;
    async fn nonce(&self, address: Address) -> Result<u64, AdapterError>;
    async fn gas_price(&self) -> Result<u128, AdapterError>;
    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, AdapterError>;
    async fn broadcast_raw(&self, signed_hex: &str) -> Result<TxHash, AdapterError>;
    async fn recent_txs_from(
        &self,
        address: Address,
        block_window: u64,
    ) -> Result<Vec<TxReceiptView>, AdapterError>;
}

/// [`ChainAdapter`] backed by `alloy`'s HTTP provider, failing over across
/// a chain's primary and backup RPC endpoints in order.
pub struct HttpChainAdapter {
    chain: ChainEntry,
    gas_source: Box<dyn GasSource>,
}

impl HttpChainAdapter {
    pub fn new(chain: ChainEntry) -> Self {
        let gas_source: Box<dyn GasSource> = if chain.supports_eip1559 {
            Box::new(Eip1559GasSource::new(FALLBACK_PRIORITY_FEE_WEI))
        } else {
            Box::new(LegacyGasSource)
        };
        Self { chain, gas_source }
    }

    fn all_endpoints_failed(&self) -> AdapterError {
        AdapterError::AllEndpointsFailed { chain: self.chain.id.clone() }
    }
}

#[async_trait]
impl ChainAdapter for HttpChainAdapter {
    async fn status(&self) -> ChainStatus {
        for url in self.chain.rpc.in_order() {
            let Ok(parsed) = url.parse() else { continue };
            let provider = ProviderBuilder::new().on_http(parsed);
            let attempt = tokio::time::timeout(STATUS_TIMEOUT, provider.get_block_number()).await;
            match attempt {
                Ok(Ok(block_number)) if block_number > 0 => {
                    debug!(chain = %self.chain.id, %url, block_number, "chain reachable");
                    return ChainStatus { reachable: true, block_number };
                }
                Ok(Ok(_)) => warn!(chain = %self.chain.id, %url, "endpoint reports block 0"),
                Ok(Err(e)) => warn!(chain = %self.chain.id, %url, error = %e, "status check failed"),
                Err(_) => warn!(chain = %self.chain.id, %url, "status check timed out"),
            }
        }
        ChainStatus { reachable: false, block_number: 0 }
    }

    async fn balance(&self, address: Address) -> Result<U256, AdapterError> {
        for url in self.chain.rpc.in_order() {
            let Ok(parsed) = url.parse() else { continue };
            let provider = ProviderBuilder::new().on_http(parsed);
            match tokio::time::timeout(BALANCE_TIMEOUT, provider.get_balance(address)).await {
                Ok(Ok(balance)) => return Ok(balance),
                Ok(Err(e)) => warn!(chain = %self.chain.id, %url, error = %e, "balance lookup failed"),
                Err(_) => warn!(chain = %self.chain.id, %url, "balance lookup timed out"),
            }
        }
        Err(self.all_endpoints_failed())
    }

    async fn nonce(&self, address: Address) -> Result<u64, AdapterError> {
        for url in self.chain.rpc.in_order() {
            let Ok(parsed) = url.parse() else { continue };
            let provider = ProviderBuilder::new().on_http(parsed);
            match tokio::time::timeout(CALL_TIMEOUT, provider.get_transaction_count(address)).await {
                Ok(Ok(nonce)) => return Ok(nonce),
                Ok(Err(e)) => warn!(chain = %self.chain.id, %url, error = %e, "nonce lookup failed"),
                Err(_) => warn!(chain = %self.chain.id, %url, "nonce lookup timed out"),
            }
        }
        Err(self.all_endpoints_failed())
    }

    async fn gas_price(&self) -> Result<u128, AdapterError> {
        for url in self.chain.rpc.in_order() {
            match tokio::time::timeout(CALL_TIMEOUT, self.gas_source.fetch_gwei(url)).await {
                Ok(Ok(gwei)) => return Ok((gwei * GWEI) as u128),
                Ok(Err(e)) => {
                    warn!(chain = %self.chain.id, %url, strategy = self.gas_source.strategy_name(), error = %e, "gas price lookup failed")
                }
                Err(_) => warn!(chain = %self.chain.id, %url, "gas price lookup timed out"),
            }
        }
        Err(self.all_endpoints_failed())
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, AdapterError> {
        for url in self.chain.rpc.in_order() {
            let Ok(parsed) = url.parse() else { continue };
            let provider = ProviderBuilder::new().on_http(parsed);
            match tokio::time::timeout(CALL_TIMEOUT, provider.estimate_gas(tx.clone())).await {
                Ok(Ok(gas)) => return Ok(gas),
                Ok(Err(e)) => warn!(chain = %self.chain.id, %url, error = %e, "gas estimation failed"),
                Err(_) => warn!(chain = %self.chain.id, %url, "gas estimation timed out"),
            }
        }
        Err(self.all_endpoints_failed())
    }

    async fn broadcast_raw(&self, signed_hex: &str) -> Result<TxHash, AdapterError> {
        let raw = hex::decode(signed_hex.trim_start_matches("0x"))
            .map_err(|e| AdapterError::Rpc(anyhow::anyhow!("invalid raw tx hex: {e}")))?;

        for url in self.chain.rpc.in_order() {
            let Ok(parsed) = url.parse() else { continue };
            let provider = ProviderBuilder::new().on_http(parsed);
            match tokio::time::timeout(CALL_TIMEOUT, provider.send_raw_transaction(&raw)).await {
                Ok(Ok(pending)) => return Ok(*pending.tx_hash()),
                Ok(Err(e)) => warn!(chain = %self.chain.id, %url, error = %e, "broadcast failed"),
                Err(_) => warn!(chain = %self.chain.id, %url, "broadcast timed out"),
            }
        }
        Err(self.all_endpoints_failed())
    }

    async fn recent_txs_from(
        &self,
        address: Address,
        block_window: u64,
    ) -> Result<Vec<TxReceiptView>, AdapterError> {
        for url in self.chain.rpc.in_order() {
            let Ok(parsed) = url.parse() else { continue };
            let provider = ProviderBuilder::new().on_http(parsed);

            let head = match tokio::time::timeout(CALL_TIMEOUT, provider.get_block_number()).await {
                Ok(Ok(head)) => head,
                Ok(Err(e)) => {
                    warn!(chain = %self.chain.id, %url, error = %e, "head lookup failed");
                    continue;
                }
                Err(_) => {
                    warn!(chain = %self.chain.id, %url, "head lookup timed out");
                    continue;
                }
            };
            let from_block = head.saturating_sub(block_window);

            let filter = Filter::new()
                .from_block(BlockNumberOrTag::Number(from_block))
                .to_block(BlockNumberOrTag::Latest)
                .address(address);

            match tokio::time::timeout(CALL_TIMEOUT, provider.get_logs(&filter)).await {
                Ok(Ok(logs)) => {
                    let views = logs
                        .into_iter()
                        .map(|log| TxReceiptView {
                            hash: log.transaction_hash.unwrap_or_default(),
                            from: address,
                            to: Some(log.inner.address),
                            value: U256::ZERO,
                            block_number: log.block_number.unwrap_or(from_block),
                            input: Bytes::new(),
                        })
                        .collect();
                    return Ok(views);
                }
                Ok(Err(e)) => warn!(chain = %self.chain.id, %url, error = %e, "log scan failed"),
                Err(_) => warn!(chain = %self.chain.id, %url, "log scan timed out"),
            }
        }
        Err(self.all_endpoints_failed())
    }
}
