//! Signs and verifies standalone JSON payloads for out-of-band channels —
//! QR codes, BLE frames — independent of the meta-tx EIP-712 flow (§4.12).
//!
//! Canonicalization + `keccak256` + ECDSA recovery reuse `alloy::primitives`
//! rather than pulling in a second crypto stack — one ecosystem for both
//! signing and ABI encoding.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy::primitives::{keccak256, Address, B256};
use alloy::signers::{local::PrivateKeySigner, Signature, Signer};
use serde_json::Value;

use crate::errors::PayloadError;

const PREFIX: &str = "AIRCHAINPAY_SIGNATURE\n";
const STRICT_MAX_AGE_SECS: i64 = 5 * 60;
const LENIENT_MAX_AGE_SECS: i64 = 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    Strict,
    Lenient,
}

impl Strictness {
    fn max_age_secs(self) -> i64 {
        match self {
            Strictness::Strict => STRICT_MAX_AGE_SECS,
            Strictness::Lenient => LENIENT_MAX_AGE_SECS,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SignedEnvelope {
    pub version: String,
    pub signer: Address,
    pub signature: String,
    pub created_at: i64,
    pub chain: String,
    pub message_hash: B256,
    pub payload: Value,
}

/// Recursively sort object keys so semantically identical JSON always
/// serializes to the same bytes before hashing.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect();
            serde_json::to_value(sorted).unwrap_or(Value::Null)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn canonical_message(payload: &Value) -> Result<Vec<u8>, PayloadError> {
    let canonical = canonicalize(payload);
    let json = serde_json::to_string(&canonical).map_err(|e| PayloadError::PayloadFormat(e.to_string()))?;
    Ok(format!("{PREFIX}{json}").into_bytes())
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

pub struct PayloadSigner {
    chain: String,
}

impl PayloadSigner {
    pub fn new(chain: impl Into<String>) -> Self {
        Self { chain: chain.into() }
    }

    pub async fn sign(&self, signer: &PrivateKeySigner, payload: Value) -> Result<SignedEnvelope, PayloadError> {
        let message = canonical_message(&payload)?;
        let message_hash = keccak256(&message);
        let signature = signer.sign_message(&message).await.map_err(|_| PayloadError::SignatureInvalid)?;

        Ok(SignedEnvelope {
            version: "v1".to_string(),
            signer: signer.address(),
            signature: format!("0x{}", hex::encode(signature.as_bytes())),
            created_at: now_unix(),
            chain: self.chain.clone(),
            message_hash,
            payload,
        })
    }

    /// Verify an envelope: well-formed signature, not from the future, not
    /// older than `strictness` allows, recovered signer matches the
    /// claimed one, and the recomputed message hash matches.
    pub fn verify(&self, envelope: &SignedEnvelope, strictness: Strictness) -> Result<(), PayloadError> {
        let now = now_unix();
        if envelope.created_at > now {
            return Err(PayloadError::PayloadFuture);
        }
        if now - envelope.created_at > strictness.max_age_secs() {
            return Err(PayloadError::PayloadExpired);
        }

        let message = canonical_message(&envelope.payload)?;
        let recomputed_hash = keccak256(&message);
        if recomputed_hash != envelope.message_hash {
            return Err(PayloadError::PayloadFormat("message hash mismatch".to_string()));
        }

        let sig_bytes = hex::decode(envelope.signature.trim_start_matches("0x"))
            .map_err(|_| PayloadError::SignatureInvalid)?;
        let signature = Signature::try_from(sig_bytes.as_slice()).map_err(|_| PayloadError::SignatureInvalid)?;

        let prehash = alloy::primitives::eip191_hash_message(&message);
        let recovered = signature
            .recover_address_from_prehash(&prehash)
            .map_err(|_| PayloadError::SignatureInvalid)?;
        if recovered != envelope.signer {
            return Err(PayloadError::SignatureInvalid);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signer() -> PrivateKeySigner {
        PrivateKeySigner::random()
    }

    #[tokio::test]
    async fn round_trip_signs_and_verifies() {
        let key = signer();
        let payload_signer = PayloadSigner::new("ethereum");
        let envelope = payload_signer.sign(&key, json!({"b": 2, "a": 1})).await.unwrap();
        payload_signer.verify(&envelope, Strictness::Strict).unwrap();
    }

    #[tokio::test]
    async fn key_order_does_not_change_the_hash() {
        let key = signer();
        let payload_signer = PayloadSigner::new("ethereum");
        let a = payload_signer.sign(&key, json!({"b": 2, "a": 1})).await.unwrap();
        let b = payload_signer.sign(&key, json!({"a": 1, "b": 2})).await.unwrap();
        assert_eq!(a.message_hash, b.message_hash);
    }

    #[tokio::test]
    async fn rejects_payload_from_the_future() {
        let key = signer();
        let payload_signer = PayloadSigner::new("ethereum");
        let mut envelope = payload_signer.sign(&key, json!({"x": 1})).await.unwrap();
        envelope.created_at = now_unix() + 3600;
        assert!(matches!(payload_signer.verify(&envelope, Strictness::Strict), Err(PayloadError::PayloadFuture)));
    }

    #[tokio::test]
    async fn strict_window_rejects_what_lenient_accepts() {
        let key = signer();
        let payload_signer = PayloadSigner::new("ethereum");
        let mut envelope = payload_signer.sign(&key, json!({"x": 1})).await.unwrap();
        envelope.created_at = now_unix() - 600;
        assert!(matches!(payload_signer.verify(&envelope, Strictness::Strict), Err(PayloadError::PayloadExpired)));
        payload_signer.verify(&envelope, Strictness::Lenient).unwrap();
    }

    #[tokio::test]
    async fn tampered_payload_fails_verification() {
        let key = signer();
        let payload_signer = PayloadSigner::new("ethereum");
        let mut envelope = payload_signer.sign(&key, json!({"amount": 10})).await.unwrap();
        envelope.payload = json!({"amount": 99});
        assert!(payload_signer.verify(&envelope, Strictness::Lenient).is_err());
    }
}
