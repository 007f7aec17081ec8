//! AirChainPay offline-safe payment core.
//!
//! A wallet-side daemon that keeps a multi-chain EVM wallet usable while
//! offline: queues signed meta-transactions locally, reconciles against
//! the network once reachable, and watches for external activity on the
//! same address.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wallet_chain::{ChainAdapter, ChainRegistry, GasPolicy, HttpChainAdapter};
use wallet_core::{
    config, init_config, AppConfig, ChainStateRegistry, CrossWalletMonitor, EncryptedFileStore, ExpiryService,
    MetaTxBuilder, OfflineAdmission, SecureStore, SyncEngine, TxQueue, WalletVault,
};

/// Environment variable names.
mod env {
    pub const CHAIN_CONFIG_DIR: &str = "AIRCHAINPAY_CHAIN_CONFIG_DIR";
    pub const DATA_DIR: &str = "AIRCHAINPAY_DATA_DIR";
    pub const DEVICE_KEY: &str = "AIRCHAINPAY_DEVICE_KEY";
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,wallet_core=debug,wallet_chain=debug")),
        )
        .init();

    let app_config = AppConfig::from_env();
    app_config.log_config();
    init_config(app_config);
    let _ = config();

    info!("starting AirChainPay offline-safe payment core");

    let (admissions, sync_engine, expiry_service, monitors) = initialize_components().await?;
    info!(chains = admissions.len(), "all components initialized, entering steady state");

    let _expiry_handles = Arc::new(expiry_service).spawn();
    let monitor_handles: Vec<_> = monitors.into_iter().map(CrossWalletMonitor::spawn).collect();

    let sync_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            interval.tick().await;
            let outcomes = sync_engine.sync_all().await;
            if !outcomes.is_empty() {
                info!(count = outcomes.len(), "sync pass completed");
            }
        }
    });

    // Keep the per-chain admission pipelines alive for the process lifetime;
    // they're handed out to the (not-yet-wired) request surface that accepts
    // new payments.
    let _ = admissions;

    sync_handle.await?;
    for handle in monitor_handles {
        handle.abort();
    }

    Ok(())
}

type Admissions = HashMap<String, Arc<OfflineAdmission>>;

async fn initialize_components() -> Result<(Admissions, SyncEngine, ExpiryService, Vec<Arc<CrossWalletMonitor>>)> {
    info!("initializing components");

    let chain_config_dir = std::env::var(env::CHAIN_CONFIG_DIR).unwrap_or_else(|_| "config/chains".to_string());
    let registry = ChainRegistry::load_from_dir(&chain_config_dir)?;
    info!(chain_count = registry.len(), dir = %chain_config_dir, "chain registry loaded");

    let data_dir = std::env::var(env::DATA_DIR).unwrap_or_else(|_| "data".to_string());
    let device_key = std::env::var(env::DEVICE_KEY).unwrap_or_else(|_| "dev-only-insecure-key".to_string());

    let vault_file = EncryptedFileStore::new(format!("{data_dir}/vault.bin"), device_key.as_bytes());
    vault_file.load().await?;
    let vault_store: Arc<dyn SecureStore> = Arc::new(vault_file);
    let vault = Arc::new(WalletVault::new(vault_store));
    let address = match vault.load().await {
        Ok(addr) => addr,
        Err(_) => vault.create_random().await?,
    };
    info!(%address, "wallet loaded");

    let queue_file = EncryptedFileStore::new(format!("{data_dir}/tx_queue.bin"), device_key.as_bytes());
    queue_file.load().await?;
    let queue_store: Arc<dyn SecureStore> = Arc::new(queue_file);
    let queue = Arc::new(TxQueue::new(queue_store));
    queue.load().await?;

    let mut adapters: HashMap<String, Arc<dyn ChainAdapter>> = HashMap::new();
    let mut gas_policies: HashMap<String, Arc<GasPolicy>> = HashMap::new();
    let mut chain_states = ChainStateRegistry::new();

    for chain in registry.iter() {
        adapters.insert(chain.id.clone(), Arc::new(HttpChainAdapter::new(chain.clone())));
        gas_policies.insert(chain.id.clone(), Arc::new(GasPolicy::new(chain.gas)));
        chain_states.register(chain.id.clone());
    }
    let chain_states = Arc::new(chain_states);

    let monitor = Arc::new(CrossWalletMonitor::new(adapters.clone(), chain_states.clone(), address));

    let mut admissions: Admissions = HashMap::new();
    let mut meta_txs: HashMap<String, MetaTxBuilder> = HashMap::new();
    for chain in registry.iter() {
        let Some(adapter) = adapters.get(&chain.id).cloned() else { continue };
        let Some(gas_policy) = gas_policies.get(&chain.id).cloned() else { continue };
        let meta_tx = MetaTxBuilder::new(chain.forwarder, chain.chain_id);
        meta_txs.insert(chain.id.clone(), meta_tx.clone());
        let admission = Arc::new(OfflineAdmission::new(
            chain.id.clone(),
            adapter,
            gas_policy,
            chain_states.clone(),
            queue.clone(),
            vault.clone(),
            meta_tx,
            monitor.clone(),
            chain.native_token.decimals as u32,
        ));
        admissions.insert(chain.id.clone(), admission);
    }

    let sync_engine = SyncEngine::new(adapters, gas_policies, meta_txs, chain_states.clone(), queue.clone(), vault.clone());
    let expiry_service = ExpiryService::new(queue, chain_states);

    info!("all components initialized");
    Ok((admissions, sync_engine, expiry_service, vec![monitor]))
}

/// Print startup banner.
fn print_banner() {
    println!(
        r#"
    ╔═╗┬┬─┐╔═╗┬ ┬┌─┐┬┌┐┌╔═╗┌─┐┬ ┬
    ╠═╣│├┬┘║  ├─┤├─┤││││╠═╝├─┤└┬┘
    ╩ ╩┴┴└─╚═╝┴ ┴┴ ┴┴┘└┘╩  ┴ ┴ ┴
    Offline-Safe Payment Core v0.1.0
    "#
    );
}
