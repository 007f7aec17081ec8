//! EIP-1559 live gas price source, for chains that support base-fee +
//! priority-fee pricing.

use alloy::eips::BlockNumberOrTag;
use alloy::providers::{Provider, ProviderBuilder};
use anyhow::Result;
use async_trait::async_trait;

use super::GasSource;

const GWEI: f64 = 1_000_000_000.0;

/// Reads the latest block's base fee plus the network's suggested priority
/// fee and reports their sum in gwei.
#[derive(Debug, Default)]
pub struct Eip1559GasSource {
    fallback_priority_fee_wei: u128,
}

impl Eip1559GasSource {
    pub fn new(fallback_priority_fee_wei: u128) -> Self {
        Self { fallback_priority_fee_wei }
    }
}

#[async_trait]
impl GasSource for Eip1559GasSource {
    async fn fetch_gwei(&self, rpc_url: &str) -> Result<f64> {
        let provider = ProviderBuilder::new().on_http(rpc_url.parse()?);

        let block = provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no latest block returned by {rpc_url}"))?;

        let base_fee = block.header.base_fee_per_gas.map(|b| b as u128).unwrap_or(0);

        let priority_fee = provider
            .get_max_priority_fee_per_gas()
            .await
            .unwrap_or(self.fallback_priority_fee_wei);

        Ok((base_fee + priority_fee) as f64 / GWEI)
    }

    fn strategy_name(&self) -> &'static str {
        "eip1559"
    }
}
