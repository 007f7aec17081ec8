//! Key-value storage over two trust tiers. Callers hold a `dyn SecureStore`
//! handle rather than reaching for an ambient singleton.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use async_trait::async_trait;
use rand::RngCore;
use tracing::{debug, warn};

use crate::errors::StoreError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const PBKDF2_ITERATIONS: u32 = 100_000;

/// Two-tier key-value store: hardware-backed sensitive retrieval (may
/// prompt for device auth) and plain encrypted-at-rest retrieval.
#[async_trait]
pub trait SecureStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn get_sensitive(&self, key: &str, prompt: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    async fn clear_backup(&self) -> Result<(), StoreError>;
}

/// Hardware-backed tier over the OS credential store, the way
/// `lexe-app`'s `SecretStore` wraps `keyring::Entry`.
pub struct KeyringSecureStore {
    service: String,
}

impl KeyringSecureStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self { service: service.into() }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, StoreError> {
        keyring::Entry::new(&self.service, key)
            .map_err(|_| StoreError::HardwareUnavailable)
    }
}

#[async_trait]
impl SecureStore for KeyringSecureStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.get_sensitive(key, "").await
    }

    async fn get_sensitive(&self, key: &str, _prompt: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entry = self.entry(key)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value.into_bytes())),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(_) => {
                warn!(key, "keyring retrieval failed, hardware unavailable");
                Err(StoreError::HardwareUnavailable)
            }
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let entry = self.entry(key)?;
        let text = String::from_utf8_lossy(value).into_owned();
        entry
            .set_password(&text)
            .map_err(|e| StoreError::PersistenceFailure(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let entry = self.entry(key)?;
        match entry.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::PersistenceFailure(e.to_string())),
        }
    }

    async fn clear_backup(&self) -> Result<(), StoreError> {
        self.delete("temp_seed_phrase").await
    }
}

/// Encrypted-at-rest tier: a `HashMap<String, Vec<u8>>` serialized with
/// `serde_json`, encrypted under a key derived from a device key via
/// PBKDF2, written temp-file-then-rename for crash safety.
pub struct EncryptedFileStore {
    path: PathBuf,
    key: [u8; 32],
    state: tokio::sync::Mutex<HashMap<String, Vec<u8>>>,
}

impl EncryptedFileStore {
    pub fn new(path: impl Into<PathBuf>, device_key: &[u8]) -> Self {
        let mut derived = [0u8; 32];
        let salt = b"airchainpay-encrypted-file-store";
        pbkdf2::pbkdf2_hmac::<sha2::Sha256>(device_key, salt, PBKDF2_ITERATIONS, &mut derived);
        Self {
            path: path.into(),
            key: derived,
            state: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Load the encrypted blob from disk into memory, if present.
    pub async fn load(&self) -> Result<(), StoreError> {
        if !self.path.exists() {
            return Ok(());
        }
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|e| StoreError::PersistenceFailure(e.to_string()))?;
        if raw.len() < 16 {
            return Err(StoreError::PersistenceFailure("store file truncated".into()));
        }
        let (iv, ciphertext) = raw.split_at(16);
        let mut buf = ciphertext.to_vec();
        let plaintext = Aes256CbcDec::new(&self.key.into(), iv.into())
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|e| StoreError::PersistenceFailure(format!("decrypt failed: {e}")))?;
        let map: HashMap<String, Vec<u8>> = serde_json::from_slice(plaintext)
            .map_err(|e| StoreError::PersistenceFailure(e.to_string()))?;
        *self.state.lock().await = map;
        Ok(())
    }

    async fn persist(&self, map: &HashMap<String, Vec<u8>>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::PersistenceFailure(e.to_string()))?;
        }
        let plaintext = serde_json::to_vec(map).map_err(|e| StoreError::PersistenceFailure(e.to_string()))?;
        let mut iv = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut iv);
        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(&plaintext);

        let mut out = Vec::with_capacity(16 + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);

        let tmp = tmp_path(&self.path);
        tokio::fs::write(&tmp, &out)
            .await
            .map_err(|e| StoreError::PersistenceFailure(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::PersistenceFailure(e.to_string()))?;
        debug!(path = %self.path.display(), "persisted encrypted file store");
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[async_trait]
impl SecureStore for EncryptedFileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.state.lock().await.get(key).cloned())
    }

    async fn get_sensitive(&self, key: &str, _prompt: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.get(key).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut guard = self.state.lock().await;
        guard.insert(key.to_string(), value.to_vec());
        self.persist(&guard).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut guard = self.state.lock().await;
        guard.remove(key);
        self.persist(&guard).await
    }

    async fn clear_backup(&self) -> Result<(), StoreError> {
        self.delete("temp_seed_phrase").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn encrypted_file_store_round_trips() {
        let dir = std::env::temp_dir().join(format!("wallet-core-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("store.bin");

        let store = EncryptedFileStore::new(&path, b"device-key-material");
        store.put("wallet_password", b"v1$100000$abc$def").await.unwrap();
        assert_eq!(
            store.get("wallet_password").await.unwrap(),
            Some(b"v1$100000$abc$def".to_vec())
        );

        // Re-open from disk and confirm the value survived encryption.
        let reopened = EncryptedFileStore::new(&path, b"device-key-material");
        reopened.load().await.unwrap();
        assert_eq!(
            reopened.get("wallet_password").await.unwrap(),
            Some(b"v1$100000$abc$def".to_vec())
        );

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn get_missing_key_returns_none() {
        let dir = std::env::temp_dir().join(format!("wallet-core-test-missing-{}", std::process::id()));
        let store = EncryptedFileStore::new(dir.join("store.bin"), b"key");
        assert_eq!(store.get("nope").await.unwrap(), None);
    }
}
