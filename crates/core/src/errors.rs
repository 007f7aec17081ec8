//! Per-subsystem error taxonomy (§7). Library code returns these enums so
//! callers can branch on error kind instead of parsing a message string.

use thiserror::Error;

/// Errors raised while the wallet is locked, unlocked, loaded, or imported.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("wallet is corrupt and was quarantined")]
    WalletCorrupt,
    #[error("no wallet has been created or imported")]
    WalletMissing,
    #[error("password is invalid")]
    PasswordInvalid,
    #[error("too many failed password attempts, locked out until {retry_after_secs}s from now")]
    PasswordLockedOut { retry_after_secs: u64 },
    #[error("device authentication is required to continue")]
    AuthRequired,
    #[error("device authentication was cancelled")]
    AuthCancelled,
    #[error("mnemonic does not derive to the stored private key")]
    SeedMismatch,
    #[error("invalid payment: {0}")]
    InvalidPayment(String),
    #[error(transparent)]
    Signing(#[from] alloy::signers::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by a [`crate::secure_store::SecureStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("device authentication is required to retrieve this value")]
    AuthRequired,
    #[error("device authentication was cancelled")]
    AuthCancelled,
    #[error("hardware-backed storage is unavailable")]
    HardwareUnavailable,
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

/// Errors raised by [`crate::chain_state::ChainAdapterExt`]-consuming
/// components: chain selection, network reachability, RPC deadlines.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain {0} is not supported")]
    ChainUnsupported(String),
    #[error("network appears offline for chain {0}")]
    NetworkOffline(String),
    #[error("rpc call to chain {0} timed out")]
    NetworkTimeout(String),
    #[error("no rpc endpoint for chain {0} is reachable")]
    ProviderUnavailable(String),
}

/// Errors raised by [`crate::gas`]-consuming validation in the admission
/// pipeline (wallet-chain's `GasPolicy` produces the underlying judgement;
/// this enum carries it into `AdmissionError`).
#[derive(Debug, Error)]
pub enum GasError {
    #[error("gas price {gwei} gwei is below the minimum {min_gwei} gwei")]
    GasPriceTooLow { gwei: f64, min_gwei: f64 },
    #[error("gas price {gwei} gwei is above the maximum {max_gwei} gwei")]
    GasPriceTooHigh { gwei: f64, max_gwei: f64 },
    #[error("gas price {gwei} gwei is a spike vs. rolling mean {mean_gwei} gwei")]
    GasPriceSpike { gwei: f64, mean_gwei: f64 },
    #[error("gas price {gwei} gwei is unreasonable vs. network price {network_gwei} gwei")]
    GasPriceUnreasonable { gwei: f64, network_gwei: f64 },
    #[error("gas limit {limit} is out of bounds for this transaction shape")]
    GasLimitOutOfBounds { limit: u64 },
}

/// Errors raised while validating or admitting a new offline transaction.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("a fresh balance snapshot is required before this offline-origin admission can proceed")]
    SyncRequired,
    #[error("insufficient available balance: required {required}, available {available}")]
    InsufficientAvailableBalance {
        required: String,
        available: String,
        external_activity: bool,
    },
    #[error("an identical transaction is already queued")]
    DuplicateTransaction,
    #[error("offline nonce is ahead of the chain, re-sync required")]
    NonceOfflineAhead,
    #[error("nonce gap between chain and offline state is too large ({gap})")]
    NonceLargeGap { gap: i64 },
    #[error("nonce {nonce} is out of the accepted range")]
    NonceOutOfRange { nonce: u64 },
    #[error("amount is invalid: {0}")]
    AmountInvalid(String),
    #[error(transparent)]
    Gas(#[from] GasError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Errors raised by [`crate::tx_queue::TxQueue`].
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("transaction id {0} already exists in the queue")]
    DuplicateId(String),
    #[error("transaction id {0} was not found in the queue")]
    NotFound(String),
    #[error("queue is full")]
    QueueFull,
    #[error("failed to persist the queue: {0}")]
    PersistenceFailure(String),
}

/// Errors raised validating or verifying a scannable payment payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("signature does not match declared signer")]
    SignatureInvalid,
    #[error("payload is expired")]
    PayloadExpired,
    #[error("payload is timestamped in the future")]
    PayloadFuture,
    #[error("payload is malformed: {0}")]
    PayloadFormat(String),
}

/// Errors raised by [`crate::secure_channel::SecureChannel`].
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("session has expired")]
    SessionExpired,
    #[error("session has not completed the handshake")]
    SessionUnauthenticated,
    #[error("replayed nonce counter detected")]
    ReplayDetected,
    #[error("hmac verification failed")]
    HmacMismatch,
    #[error("handshake message arrived in the wrong state")]
    UnexpectedMessage,
    #[error("signature on handshake message does not match the stated public key")]
    SignatureInvalid,
}
