//! Immutable table of supported chains, loaded from `config/chains/*.toml`:
//! one TOML file per chain, `${VAR}` environment expansion for RPC URLs,
//! `serde(default = ...)` fallbacks for every tunable.

use std::collections::HashMap;
use std::path::Path;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// A chain's RPC endpoints: one primary plus an ordered list of backups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEndpoints {
    pub primary: String,
    #[serde(default)]
    pub backups: Vec<String>,
}

impl RpcEndpoints {
    /// Iterate primary then backups, in failover order.
    pub fn in_order(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.backups.iter().map(String::as_str))
    }
}

/// Native token metadata for a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeToken {
    pub symbol: String,
    pub name: String,
    #[serde(default = "default_native_decimals")]
    pub decimals: u8,
}

fn default_native_decimals() -> u8 {
    18
}

/// Per-chain gas-price bounds (gwei) used by [`crate::gas::GasPolicy`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GasBounds {
    pub min_gwei: f64,
    pub max_gwei: f64,
    pub warn_gwei: f64,
    pub emergency_gwei: f64,
}

impl Default for GasBounds {
    fn default() -> Self {
        Self {
            min_gwei: 1.0,
            max_gwei: 500.0,
            warn_gwei: 100.0,
            emergency_gwei: 300.0,
        }
    }
}

/// One supported chain: id, numeric chain_id, RPC endpoints, forwarder
/// contract address, block-explorer base, native token, gas bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEntry {
    /// Opaque string key, e.g. "ethereum", "base", "arbitrum".
    pub id: String,
    pub chain_id: u64,
    pub rpc: RpcEndpoints,
    pub forwarder: Address,
    #[serde(default)]
    pub explorer_base: Option<String>,
    pub native_token: NativeToken,
    #[serde(default)]
    pub gas: GasBounds,
    /// Whether this chain prices transactions with base-fee + priority-fee
    /// (§4.4). Chains that still use a flat `eth_gasPrice` should set this
    /// to `false` in their config file.
    #[serde(default = "default_supports_eip1559")]
    pub supports_eip1559: bool,
}

fn default_supports_eip1559() -> bool {
    true
}

impl ChainEntry {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut entry: ChainEntry = toml::from_str(&content)?;
        entry.expand_env_vars();
        Ok(entry)
    }

    fn expand_env_vars(&mut self) {
        self.rpc.primary = expand_env(&self.rpc.primary);
        self.rpc.backups = self.rpc.backups.iter().map(|s| expand_env(s)).collect();
    }
}

/// Expand `${VAR_NAME}` patterns with environment variable values.
fn expand_env(s: &str) -> String {
    let mut result = s.to_string();
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}").unwrap();

    for cap in re.captures_iter(s) {
        if let (Some(full_match), Some(var_match)) = (cap.get(0), cap.get(1)) {
            if let Ok(value) = std::env::var(var_match.as_str()) {
                result = result.replace(full_match.as_str(), &value);
            }
        }
    }

    result
}

/// Immutable map of `ChainId -> ChainEntry`, built once at startup.
#[derive(Debug, Default, Clone)]
pub struct ChainRegistry {
    chains: HashMap<String, ChainEntry>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.toml` file in `dir` as a [`ChainEntry`].
    pub fn load_from_dir(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        info!(dir = %dir.display(), "loading chain registry");
        let mut registry = Self::new();

        if !dir.exists() {
            warn!(dir = %dir.display(), "chain config dir does not exist, registry is empty");
            return Ok(registry);
        }

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let chain = ChainEntry::from_file(&path)?;
            debug!(chain = %chain.id, chain_id = chain.chain_id, "loaded chain entry");
            registry.insert(chain);
        }

        Ok(registry)
    }

    pub fn insert(&mut self, chain: ChainEntry) {
        self.chains.insert(chain.id.clone(), chain);
    }

    pub fn get(&self, chain_id: &str) -> Option<&ChainEntry> {
        self.chains.get(chain_id)
    }

    pub fn is_supported(&self, chain_id: &str) -> bool {
        self.chains.contains_key(chain_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainEntry> {
        self.chains.values()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_env_vars_in_rpc_urls() {
        std::env::set_var("WALLET_TEST_RPC_KEY", "abc123");
        assert_eq!(
            expand_env("https://rpc.example.com/${WALLET_TEST_RPC_KEY}"),
            "https://rpc.example.com/abc123"
        );
        std::env::remove_var("WALLET_TEST_RPC_KEY");
    }

    #[test]
    fn rpc_endpoints_iterate_primary_first() {
        let endpoints = RpcEndpoints {
            primary: "https://a".into(),
            backups: vec!["https://b".into(), "https://c".into()],
        };
        let ordered: Vec<_> = endpoints.in_order().collect();
        assert_eq!(ordered, vec!["https://a", "https://b", "https://c"]);
    }

    #[test]
    fn registry_reports_supported_chains() {
        let mut registry = ChainRegistry::new();
        registry.insert(ChainEntry {
            id: "ethereum".into(),
            chain_id: 1,
            rpc: RpcEndpoints { primary: "https://eth".into(), backups: vec![] },
            forwarder: Address::ZERO,
            explorer_base: None,
            native_token: NativeToken { symbol: "ETH".into(), name: "Ether".into(), decimals: 18 },
            gas: GasBounds::default(),
            supports_eip1559: true,
        });

        assert!(registry.is_supported("ethereum"));
        assert!(!registry.is_supported("base"));
        assert_eq!(registry.len(), 1);
    }
}
