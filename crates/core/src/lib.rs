//! AirChainPay offline-safe payment core.
//!
//! This crate provides the wallet-side logic that lets a mobile EVM wallet
//! keep accepting and queuing payments while offline:
//! - Encrypted key storage and wallet recovery (`wallet_vault`, `secure_store`, `password`)
//! - EIP-712 meta-transaction construction (`meta_tx`)
//! - The durable offline transaction queue (`tx_queue`)
//! - Per-chain balance/nonce bookkeeping (`chain_state`)
//! - The offline admission pipeline that gates every new payment (`admission`)
//! - Cross-wallet activity and nonce-conflict detection (`cross_wallet`)
//! - Queue expiry and fund recovery (`expiry`)
//! - Reconnection sync back to the network (`sync_engine`)
//! - Standalone payload signing for QR/BLE channels (`payload_signer`)
//! - Authenticated device-to-device sessions (`secure_channel`)

mod admission;
pub mod amount;
mod chain_state;
pub mod config;
mod cross_wallet;
mod errors;
mod expiry;
mod meta_tx;
mod password;
mod payload_signer;
mod secure_channel;
mod secure_store;
mod sync_engine;
mod tx_queue;
mod wallet_vault;

pub use admission::{AdmissionRequest, OfflineAdmission};
pub use amount::parse_amount;
pub use chain_state::{ChainState, ChainStateRegistry, NonceState, OfflineBalanceTracking, SyncedBalanceSnapshotRecord};
pub use config::{config, init_config, AppConfig};
pub use cross_wallet::{classify_conflict, CrossWalletMonitor, NonceConflict, SecurityWarning, Severity};
pub use errors::{
    AdmissionError, ChainError, ChannelError, GasError, PayloadError, QueueError, StoreError, VaultError,
};
pub use expiry::{ExpiredTxRecord, ExpiryService, ExpiryWarning, WarningSeverity};
pub use meta_tx::{MetaTxBuilder, SignedMetaTx};
pub use password::{classify_strength, hash_password, verify_password, PasswordAttempts, StrengthReport};
pub use payload_signer::{PayloadSigner, SignedEnvelope, Strictness};
pub use secure_channel::{Frame, HandshakeMessage, HandshakeState, SecureChannel, Session};
pub use secure_store::{EncryptedFileStore, KeyringSecureStore, SecureStore};
pub use sync_engine::{SyncEngine, SyncOutcome};
pub use tx_queue::{
    QueueStatusCounts, QueuedTx, SecurityMetadata, TokenSpec, Transport, TxMetadata, TxPatch, TxQueue, TxStatus,
};
pub use wallet_vault::WalletVault;
