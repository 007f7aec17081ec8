//! EIP-712 typed-data meta-transaction builder for the forwarder contract
//! (§4.6). Declares the typed-data structs with `alloy::sol!` in its
//! EIP-712-only mode (no `#[sol(rpc)]`).

use std::time::{SystemTime, UNIX_EPOCH};

use alloy::primitives::{Address, U256};
use alloy::signers::Signature;
use alloy::sol;
use alloy::sol_types::{eip712_domain, SolStruct};

use crate::cross_wallet::SIGNATURE_TRAILER_MARKER;
use crate::errors::VaultError;
use crate::wallet_vault::WalletVault;

const DEFAULT_DEADLINE_SECS: u64 = 3600;

sol! {
    #[derive(Debug)]
    struct NativePayment {
        address from;
        address to;
        uint256 amount;
        string paymentReference;
        uint256 nonce;
        uint256 deadline;
    }

    #[derive(Debug)]
    struct TokenPayment {
        address from;
        address to;
        address token;
        uint256 amount;
        string paymentReference;
        uint256 nonce;
        uint256 deadline;
    }

    #[derive(Debug)]
    struct BatchNativePayment {
        address from;
        address[] recipients;
        uint256[] amounts;
        string paymentReference;
        uint256 nonce;
        uint256 deadline;
    }

    #[derive(Debug)]
    struct BatchTokenPayment {
        address from;
        address token;
        address[] recipients;
        uint256[] amounts;
        string paymentReference;
        uint256 nonce;
        uint256 deadline;
    }
}

/// A signed meta-transaction ready for relay or on-chain submission.
#[derive(Debug, Clone)]
pub struct SignedMetaTx {
    pub signature: Signature,
    pub nonce: U256,
    pub deadline: U256,
    pub payment_reference: String,
}

/// Builds and signs forwarder-bound typed-data payloads.
#[derive(Clone)]
pub struct MetaTxBuilder {
    forwarder: Address,
    chain_id: u64,
}

impl MetaTxBuilder {
    pub fn new(forwarder: Address, chain_id: u64) -> Self {
        Self { forwarder, chain_id }
    }

    fn default_payment_reference(from: Address, to: Address) -> String {
        let now_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        format!("Payment from {from} to {to} at {now_ms}")
    }

    /// Every payment reference this wallet signs carries the signature
    /// trailer marker, so [`crate::cross_wallet::CrossWalletMonitor`] can
    /// tell this device's own on-chain activity apart from someone else
    /// operating the same address.
    fn tag_payment_reference(payment_reference: String) -> String {
        if payment_reference.contains(SIGNATURE_TRAILER_MARKER) {
            payment_reference
        } else {
            format!("{payment_reference} {SIGNATURE_TRAILER_MARKER}")
        }
    }

    fn default_deadline() -> U256 {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        U256::from(now + DEFAULT_DEADLINE_SECS)
    }

    fn validate(amount: U256, deadline: U256) -> Result<(), String> {
        if amount.is_zero() {
            return Err("amount must be greater than zero".to_string());
        }
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        if deadline <= U256::from(now) {
            return Err("deadline must be in the future".to_string());
        }
        Ok(())
    }

    pub async fn build_native(
        &self,
        vault: &WalletVault,
        to: Address,
        amount: U256,
        nonce: U256,
        payment_reference: Option<String>,
    ) -> Result<SignedMetaTx, VaultError> {
        let from = vault.address().await?;
        let deadline = Self::default_deadline();
        Self::validate(amount, deadline).map_err(VaultError::InvalidPayment)?;

        let payment_reference = payment_reference.unwrap_or_else(|| Self::default_payment_reference(from, to));
        let payment_reference = Self::tag_payment_reference(payment_reference);
        let payload = NativePayment {
            from,
            to,
            amount,
            paymentReference: payment_reference.clone(),
            nonce,
            deadline,
        };
        let digest = payload.eip712_signing_hash(&self.domain());
        let signature = vault.sign_typed_hash(digest).await?;

        Ok(SignedMetaTx { signature, nonce, deadline, payment_reference })
    }

    pub async fn build_token(
        &self,
        vault: &WalletVault,
        to: Address,
        token: Address,
        amount: U256,
        nonce: U256,
        payment_reference: Option<String>,
    ) -> Result<SignedMetaTx, VaultError> {
        let from = vault.address().await?;
        let deadline = Self::default_deadline();
        Self::validate(amount, deadline).map_err(VaultError::InvalidPayment)?;

        let payment_reference = payment_reference.unwrap_or_else(|| Self::default_payment_reference(from, to));
        let payment_reference = Self::tag_payment_reference(payment_reference);
        let payload = TokenPayment {
            from,
            to,
            token,
            amount,
            paymentReference: payment_reference.clone(),
            nonce,
            deadline,
        };
        let digest = payload.eip712_signing_hash(&self.domain());
        let signature = vault.sign_typed_hash(digest).await?;

        Ok(SignedMetaTx { signature, nonce, deadline, payment_reference })
    }

    fn validate_batch(recipients: &[Address], amounts: &[U256], deadline: U256) -> Result<(), String> {
        if recipients.is_empty() || recipients.len() != amounts.len() {
            return Err("batch requires a non-empty, equal-length recipients/amounts pair".to_string());
        }
        for amount in amounts {
            Self::validate(*amount, deadline)?;
        }
        Ok(())
    }

    /// Sign a single meta-transaction paying out to multiple recipients in
    /// one forwarder call (§4.6 batch native payment).
    pub async fn build_batch_native(
        &self,
        vault: &WalletVault,
        recipients: Vec<Address>,
        amounts: Vec<U256>,
        nonce: U256,
        payment_reference: Option<String>,
    ) -> Result<SignedMetaTx, VaultError> {
        let from = vault.address().await?;
        let deadline = Self::default_deadline();
        Self::validate_batch(&recipients, &amounts, deadline).map_err(VaultError::InvalidPayment)?;

        let payment_reference = payment_reference.unwrap_or_else(|| Self::default_payment_reference(from, recipients[0]));
        let payment_reference = Self::tag_payment_reference(payment_reference);
        let payload = BatchNativePayment {
            from,
            recipients,
            amounts,
            paymentReference: payment_reference.clone(),
            nonce,
            deadline,
        };
        let digest = payload.eip712_signing_hash(&self.domain());
        let signature = vault.sign_typed_hash(digest).await?;

        Ok(SignedMetaTx { signature, nonce, deadline, payment_reference })
    }

    /// Sign a single meta-transaction paying a single ERC-20 token out to
    /// multiple recipients in one forwarder call (§4.6 batch token payment).
    pub async fn build_batch_token(
        &self,
        vault: &WalletVault,
        token: Address,
        recipients: Vec<Address>,
        amounts: Vec<U256>,
        nonce: U256,
        payment_reference: Option<String>,
    ) -> Result<SignedMetaTx, VaultError> {
        let from = vault.address().await?;
        let deadline = Self::default_deadline();
        Self::validate_batch(&recipients, &amounts, deadline).map_err(VaultError::InvalidPayment)?;

        let payment_reference = payment_reference.unwrap_or_else(|| Self::default_payment_reference(from, recipients[0]));
        let payment_reference = Self::tag_payment_reference(payment_reference);
        let payload = BatchTokenPayment {
            from,
            token,
            recipients,
            amounts,
            paymentReference: payment_reference.clone(),
            nonce,
            deadline,
        };
        let digest = payload.eip712_signing_hash(&self.domain());
        let signature = vault.sign_typed_hash(digest).await?;

        Ok(SignedMetaTx { signature, nonce, deadline, payment_reference })
    }

    fn domain(&self) -> alloy::sol_types::Eip712Domain {
        eip712_domain! {
            name: "AirChainPayToken",
            version: "1",
            chain_id: self.chain_id,
            verifying_contract: self.forwarder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secure_store::EncryptedFileStore;
    use std::sync::Arc;

    async fn vault_with_wallet() -> WalletVault {
        let dir = std::env::temp_dir().join(format!(
            "meta-tx-test-{}",
            std::time::SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos()
        ));
        let store: Arc<dyn crate::secure_store::SecureStore> =
            Arc::new(EncryptedFileStore::new(dir.join("store.bin"), b"test-key"));
        let vault = WalletVault::new(store);
        vault.create_random().await.unwrap();
        vault
    }

    #[tokio::test]
    async fn build_native_signs_with_wallet_address_as_signer() {
        let vault = vault_with_wallet().await;
        let builder = MetaTxBuilder::new(Address::ZERO, 1);
        let signed = builder
            .build_native(&vault, Address::repeat_byte(0x42), U256::from(1000u64), U256::ZERO, None)
            .await
            .unwrap();
        assert!(!signed.payment_reference.is_empty());
    }

    #[tokio::test]
    async fn build_native_rejects_zero_amount() {
        let vault = vault_with_wallet().await;
        let builder = MetaTxBuilder::new(Address::ZERO, 1);
        let err = builder
            .build_native(&vault, Address::repeat_byte(0x42), U256::ZERO, U256::ZERO, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidPayment(_)));
    }

    #[tokio::test]
    async fn build_native_tags_default_payment_reference() {
        let vault = vault_with_wallet().await;
        let builder = MetaTxBuilder::new(Address::ZERO, 1);
        let signed = builder
            .build_native(&vault, Address::repeat_byte(0x42), U256::from(1000u64), U256::ZERO, None)
            .await
            .unwrap();
        assert!(signed.payment_reference.contains(SIGNATURE_TRAILER_MARKER));
    }

    #[tokio::test]
    async fn build_batch_native_signs_multiple_recipients() {
        let vault = vault_with_wallet().await;
        let builder = MetaTxBuilder::new(Address::ZERO, 1);
        let signed = builder
            .build_batch_native(
                &vault,
                vec![Address::repeat_byte(0x1), Address::repeat_byte(0x2)],
                vec![U256::from(100u64), U256::from(200u64)],
                U256::ZERO,
                None,
            )
            .await
            .unwrap();
        assert!(signed.payment_reference.contains(SIGNATURE_TRAILER_MARKER));
    }

    #[tokio::test]
    async fn build_batch_native_rejects_mismatched_lengths() {
        let vault = vault_with_wallet().await;
        let builder = MetaTxBuilder::new(Address::ZERO, 1);
        let err = builder
            .build_batch_native(&vault, vec![Address::repeat_byte(0x1)], vec![U256::from(100u64), U256::from(200u64)], U256::ZERO, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidPayment(_)));
    }
}
