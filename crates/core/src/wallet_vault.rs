//! Owns the private key material and mediates every signing operation
//! (§4.3), built around `alloy::signers::local::PrivateKeySigner`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;

use alloy::consensus::SignableTransaction;
use alloy::primitives::{Address, B256};
use alloy::signers::local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner};
use alloy::network::TxSigner;
use alloy::signers::{Signature, Signer};
use secrecy::{ExposeSecret, Secret};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::errors::{StoreError, VaultError};
use crate::password::{self, PasswordAttempts};
use crate::secure_store::SecureStore;

const DERIVATION_PATH: &str = "m/44'/60'/0'/0/0";
const SENTINEL_STRINGS: &[&str] = &["true", "false", "null", "undefined", "nan"];
const PASSWORD_KEY: &str = "wallet_password";
const PASSWORD_ATTEMPTS_KEY: &str = "password_attempts";
const PASSWORD_MIGRATED_AT_KEY: &str = "password_migration_completed_at";

/// A loaded wallet: signer plus whether the mnemonic backup has been
/// confirmed by the user.
pub struct WalletVault {
    store: Arc<dyn SecureStore>,
    signer: tokio::sync::RwLock<Option<PrivateKeySigner>>,
}

impl WalletVault {
    pub fn new(store: Arc<dyn SecureStore>) -> Self {
        Self { store, signer: tokio::sync::RwLock::new(None) }
    }

    /// Generate a fresh random wallet and persist both the scalar and a
    /// freshly generated mnemonic.
    pub async fn create_random(&self) -> Result<Address, VaultError> {
        let mnemonic = bip39::Mnemonic::generate_in(bip39::Language::English, 12)
            .map_err(|e| VaultError::Store(crate::errors::StoreError::PersistenceFailure(e.to_string())))?;
        let phrase = mnemonic.to_string();
        self.import_seed(&phrase).await
    }

    /// Import a BIP-39 mnemonic, deriving the account at [`DERIVATION_PATH`].
    pub async fn import_seed(&self, phrase: &str) -> Result<Address, VaultError> {
        let signer: PrivateKeySigner = MnemonicBuilder::<English>::default()
            .phrase(phrase)
            .derivation_path(DERIVATION_PATH)
            .expect("static derivation path is always valid")
            .build()
            .map_err(|e| VaultError::Store(crate::errors::StoreError::PersistenceFailure(e.to_string())))?;

        let address = signer.address();
        self.persist_seed(phrase).await?;
        self.persist_scalar(&signer).await?;
        *self.signer.write().await = Some(signer);
        info!(%address, "wallet imported from seed phrase");
        Ok(address)
    }

    /// Import a raw private key scalar, rejecting sentinel / corrupt values.
    pub async fn import_private(&self, scalar_hex: &str) -> Result<Address, VaultError> {
        validate_scalar_format(scalar_hex)?;
        let signer = PrivateKeySigner::from_str(scalar_hex).map_err(|_| VaultError::WalletCorrupt)?;
        let address = signer.address();
        self.persist_scalar(&signer).await?;
        *self.signer.write().await = Some(signer);
        info!(%address, "wallet imported from private key");
        Ok(address)
    }

    /// Load the previously persisted scalar, quarantining and regenerating
    /// on any corruption per §4.3.
    pub async fn load(&self) -> Result<Address, VaultError> {
        let Some(raw) = self.store.get_sensitive("wallet_private_key", "unlock wallet").await? else {
            return Err(VaultError::WalletMissing);
        };
        let scalar_hex = String::from_utf8_lossy(&raw).into_owned();

        match self.try_load_scalar(&scalar_hex).await {
            Ok(address) => Ok(address),
            Err(_) => {
                warn!("wallet scalar failed corruption checks, quarantining");
                self.store.delete("wallet_private_key").await.ok();
                self.store.delete("wallet_seed_phrase").await.ok();
                Err(VaultError::WalletCorrupt)
            }
        }
    }

    async fn try_load_scalar(&self, scalar_hex: &str) -> Result<Address, VaultError> {
        validate_scalar_format(scalar_hex)?;
        let signer = PrivateKeySigner::from_str(scalar_hex).map_err(|_| VaultError::WalletCorrupt)?;
        let address = signer.address();
        self.validate_consistency(&signer).await?;
        *self.signer.write().await = Some(signer);
        Ok(address)
    }

    /// §3: if both mnemonic and scalar are present, the scalar derived
    /// from the mnemonic must equal the stored scalar.
    async fn validate_consistency(&self, signer: &PrivateKeySigner) -> Result<(), VaultError> {
        let Some(raw_phrase) = self.store.get_sensitive("wallet_seed_phrase", "verify backup").await? else {
            return Ok(());
        };
        let phrase = String::from_utf8_lossy(&raw_phrase).into_owned();
        let derived: PrivateKeySigner = MnemonicBuilder::<English>::default()
            .phrase(phrase.as_str())
            .derivation_path(DERIVATION_PATH)
            .expect("static derivation path is always valid")
            .build()
            .map_err(|_| VaultError::SeedMismatch)?;

        if derived.address() != signer.address() {
            return Err(VaultError::SeedMismatch);
        }
        Ok(())
    }

    pub async fn validate_consistency_public(&self) -> Result<(), VaultError> {
        let guard = self.signer.read().await;
        let signer = guard.as_ref().ok_or(VaultError::WalletMissing)?;
        self.validate_consistency(signer).await
    }

    async fn persist_scalar(&self, signer: &PrivateKeySigner) -> Result<(), VaultError> {
        let hex = format!("0x{}", hex::encode(signer.to_bytes()));
        self.store.put("wallet_private_key", hex.as_bytes()).await?;
        Ok(())
    }

    async fn persist_seed(&self, phrase: &str) -> Result<(), VaultError> {
        self.store.put("wallet_seed_phrase", phrase.as_bytes()).await?;
        Ok(())
    }

    pub async fn address(&self) -> Result<Address, VaultError> {
        let guard = self.signer.read().await;
        guard.as_ref().map(Signer::address).ok_or(VaultError::WalletMissing)
    }

    /// Export the private scalar, wrapped so it can never leak via `Debug`.
    pub async fn export_private(&self) -> Result<Secret<String>, VaultError> {
        let guard = self.signer.read().await;
        let signer = guard.as_ref().ok_or(VaultError::WalletMissing)?;
        Ok(Secret::new(format!("0x{}", hex::encode(signer.to_bytes()))))
    }

    /// Export the mnemonic, if one was imported/generated, wrapped in
    /// [`Secret`] the same way as [`Self::export_private`].
    pub async fn export_seed(&self) -> Result<Secret<String>, VaultError> {
        let raw = self
            .store
            .get_sensitive("wallet_seed_phrase", "export backup")
            .await?
            .ok_or(VaultError::WalletMissing)?;
        Ok(Secret::new(String::from_utf8_lossy(&raw).into_owned()))
    }

    pub async fn sign_tx(&self, tx: &mut dyn SignableTransaction<Signature>) -> Result<Signature, VaultError> {
        let guard = self.signer.read().await;
        let signer = guard.as_ref().ok_or(VaultError::WalletMissing)?;
        let sig = signer.sign_transaction(tx).await?;
        Ok(sig)
    }

    pub async fn sign_message(&self, message: &[u8]) -> Result<Signature, VaultError> {
        let guard = self.signer.read().await;
        let signer = guard.as_ref().ok_or(VaultError::WalletMissing)?;
        Ok(signer.sign_message(message).await?)
    }

    /// Sign a pre-hashed EIP-712 digest (see [`crate::meta_tx`]).
    pub async fn sign_typed_hash(&self, digest: B256) -> Result<Signature, VaultError> {
        let guard = self.signer.read().await;
        let signer = guard.as_ref().ok_or(VaultError::WalletMissing)?;
        Ok(signer.sign_hash(&digest).await?)
    }

    pub async fn clear_all(&self) -> Result<(), VaultError> {
        self.store.delete("wallet_private_key").await?;
        self.store.delete("wallet_seed_phrase").await?;
        self.store.delete("temp_seed_phrase").await?;
        self.store.delete("backup_confirmed").await?;
        self.store.delete(PASSWORD_KEY).await?;
        self.store.delete(PASSWORD_ATTEMPTS_KEY).await?;
        self.store.delete(PASSWORD_MIGRATED_AT_KEY).await?;
        *self.signer.write().await = None;
        Ok(())
    }

    /// Hash and persist a new unlock password, replacing whatever was there
    /// (legacy plaintext or a previous `v1$...` hash) and clearing lockout
    /// state.
    pub async fn set_password(&self, password: &str) -> Result<(), VaultError> {
        self.store.put(PASSWORD_KEY, password::hash_password(password).as_bytes()).await?;
        self.store.delete(PASSWORD_ATTEMPTS_KEY).await?;
        Ok(())
    }

    async fn load_attempts(&self) -> Result<PasswordAttempts, VaultError> {
        match self.store.get(PASSWORD_ATTEMPTS_KEY).await? {
            Some(raw) => Ok(serde_json::from_slice(&raw).unwrap_or_default()),
            None => Ok(PasswordAttempts::default()),
        }
    }

    async fn save_attempts(&self, attempts: &PasswordAttempts) -> Result<(), VaultError> {
        let raw = serde_json::to_vec(attempts).map_err(|e| VaultError::Store(StoreError::PersistenceFailure(e.to_string())))?;
        self.store.put(PASSWORD_ATTEMPTS_KEY, &raw).await?;
        Ok(())
    }

    /// Verify `password` against the stored unlock password (§4.2), enforcing
    /// the lockout window and transparently migrating a legacy plaintext
    /// password to the salted `v1$...` hash on success.
    pub async fn authenticate(&self, password: &str) -> Result<(), VaultError> {
        let now = SystemTime::now();
        let mut attempts = self.load_attempts().await?;
        if let Some(retry_after_secs) = attempts.locked_out_for(now) {
            return Err(VaultError::PasswordLockedOut { retry_after_secs });
        }

        let stored = self.store.get(PASSWORD_KEY).await?.ok_or(VaultError::WalletMissing)?;
        let stored_hash = String::from_utf8_lossy(&stored).into_owned();

        let matched = if password::is_legacy_plaintext(&stored_hash) {
            let matched = bool::from(password.as_bytes().ct_eq(stored_hash.as_bytes()));
            if matched {
                self.migrate_legacy_password(password).await?;
            }
            matched
        } else {
            password::verify_password(password, &stored_hash)?
        };

        if matched {
            attempts.reset();
            self.save_attempts(&attempts).await?;
            Ok(())
        } else {
            attempts.record_failure(now);
            self.save_attempts(&attempts).await?;
            Err(VaultError::PasswordInvalid)
        }
    }

    async fn migrate_legacy_password(&self, password: &str) -> Result<(), VaultError> {
        self.store.put(PASSWORD_KEY, password::hash_password(password).as_bytes()).await?;
        let now_secs = SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs();
        self.store.put(PASSWORD_MIGRATED_AT_KEY, now_secs.to_string().as_bytes()).await?;
        info!("migrated legacy plaintext password to salted hash on successful authentication");
        Ok(())
    }
}

fn validate_scalar_format(scalar_hex: &str) -> Result<(), VaultError> {
    let lowered = scalar_hex.to_ascii_lowercase();
    if SENTINEL_STRINGS.contains(&lowered.as_str())
        || SENTINEL_STRINGS
            .iter()
            .any(|s| lowered == format!("0x{s}"))
    {
        return Err(VaultError::WalletCorrupt);
    }
    let hex_part = scalar_hex.strip_prefix("0x").unwrap_or(scalar_hex);
    if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(VaultError::WalletCorrupt);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secure_store::EncryptedFileStore;

    fn store() -> Arc<dyn SecureStore> {
        let dir = std::env::temp_dir().join(format!("wallet-vault-test-{}", uuid_like()));
        Arc::new(EncryptedFileStore::new(dir.join("store.bin"), b"test-key"))
    }

    fn uuid_like() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64
    }

    #[tokio::test]
    async fn create_random_produces_consistent_wallet() {
        let vault = WalletVault::new(store());
        let address = vault.create_random().await.unwrap();
        assert_eq!(vault.address().await.unwrap(), address);
        vault.validate_consistency_public().await.unwrap();
    }

    #[test]
    fn rejects_sentinel_scalars() {
        assert!(validate_scalar_format("true").is_err());
        assert!(validate_scalar_format("0xnull").is_err());
        assert!(validate_scalar_format("0xNaN").is_err());
    }

    #[test]
    fn rejects_wrong_length_scalar() {
        assert!(validate_scalar_format("0x1234").is_err());
    }

    #[tokio::test]
    async fn authenticate_accepts_correct_password() {
        let vault = WalletVault::new(store());
        vault.set_password("correct horse battery staple").await.unwrap();
        vault.authenticate("correct horse battery staple").await.unwrap();
    }

    #[tokio::test]
    async fn authenticate_rejects_wrong_password_and_tracks_attempts() {
        let vault = WalletVault::new(store());
        vault.set_password("correct horse battery staple").await.unwrap();
        let err = vault.authenticate("wrong password").await.unwrap_err();
        assert!(matches!(err, VaultError::PasswordInvalid));
    }

    #[tokio::test]
    async fn authenticate_locks_out_after_max_attempts() {
        let vault = WalletVault::new(store());
        vault.set_password("correct horse battery staple").await.unwrap();
        for _ in 0..password::MAX_PASSWORD_ATTEMPTS {
            let _ = vault.authenticate("wrong password").await;
        }
        let err = vault.authenticate("correct horse battery staple").await.unwrap_err();
        assert!(matches!(err, VaultError::PasswordLockedOut { .. }));
    }

    #[tokio::test]
    async fn authenticate_migrates_legacy_plaintext_password_on_success() {
        let s = store();
        s.put(PASSWORD_KEY, b"my-legacy-password").await.unwrap();
        let vault = WalletVault::new(s.clone());

        vault.authenticate("my-legacy-password").await.unwrap();

        let migrated = s.get(PASSWORD_KEY).await.unwrap().unwrap();
        let migrated_hash = String::from_utf8_lossy(&migrated).into_owned();
        assert!(!password::is_legacy_plaintext(&migrated_hash));
        assert!(password::verify_password("my-legacy-password", &migrated_hash).unwrap());
        assert!(s.get(PASSWORD_MIGRATED_AT_KEY).await.unwrap().is_some());

        // the migrated hash is now authoritative; the old plaintext no longer matches
        vault.authenticate("my-legacy-password").await.unwrap();
    }

    #[tokio::test]
    async fn import_private_round_trips_through_export() {
        let vault = WalletVault::new(store());
        let address = vault
            .import_private("0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318")
            .await
            .unwrap();
        let exported = vault.export_private().await.unwrap();
        assert_eq!(exported.expose_secret().to_ascii_lowercase(), "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318");
        assert_eq!(vault.address().await.unwrap(), address);
    }
}
