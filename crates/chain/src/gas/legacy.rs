//! Legacy (pre-EIP-1559) live gas price source.

use alloy::providers::{Provider, ProviderBuilder};
use anyhow::Result;
use async_trait::async_trait;

use super::GasSource;

const GWEI: f64 = 1_000_000_000.0;

/// Reads `eth_gasPrice` from the node and reports it in gwei.
#[derive(Debug, Default)]
pub struct LegacyGasSource;

#[async_trait]
impl GasSource for LegacyGasSource {
    async fn fetch_gwei(&self, rpc_url: &str) -> Result<f64> {
        let provider = ProviderBuilder::new().on_http(rpc_url.parse()?);
        let gas_price = provider.get_gas_price().await?;
        Ok(gas_price as f64 / GWEI)
    }

    fn strategy_name(&self) -> &'static str {
        "legacy"
    }
}
