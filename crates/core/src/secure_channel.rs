//! Authenticated, encrypted BLE/relay sessions between two wallet devices
//! (§4.13): a signed ECDH handshake followed by HMAC-verified, AES-CBC
//! encrypted application messages.
//!
//! `k256::ecdh` for the key agreement, `k256::ecdsa` recoverable signatures
//! for handshake authentication, `hmac`+`sha2` for the message MAC, and
//! `aes`+`cbc` for payload confidentiality are the same primitives
//! `wallet_vault` already depends on for local-secret encryption — reused
//! here for transport instead of at-rest secrecy.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use alloy::primitives::{keccak256, Address};
use hmac::{Hmac, Mac};
use k256::ecdh::diffie_hellman;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::PublicKey;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::errors::ChannelError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

const SESSION_TTL: Duration = Duration::from_secs(5 * 60);
/// Handshake messages older (or newer, to guard against clock skew abuse)
/// than this are rejected even if the signature checks out.
const HANDSHAKE_MAX_SKEW_SECS: i64 = 120;

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Ethereum-style address derived from an uncompressed secp256k1 point,
/// so a handshake signature can be checked against the address the peer
/// claims to be without needing a separate certificate authority.
fn address_from_public_key(public_key: &PublicKey) -> Address {
    let encoded = public_key.to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

fn address_from_verifying_key(verifying_key: &VerifyingKey) -> Address {
    address_from_public_key(&PublicKey::from(*verifying_key))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitInit,
    AwaitResponse,
    AwaitConfirm,
    Authenticated,
}

pub struct Session {
    pub session_id: String,
    pub peer_id: String,
    /// The address recovered from the peer's handshake signature, i.e. the
    /// identity this session is authenticated to.
    pub peer_address: Address,
    shared_key: [u8; 32],
    hmac_key: [u8; 32],
    created_at: SystemTime,
    last_activity: SystemTime,
    state: HandshakeState,
    tx_nonce: u64,
    last_rx_nonce: u64,
}

impl Session {
    fn touch(&mut self) {
        self.last_activity = SystemTime::now();
    }

    fn expired(&self) -> bool {
        SystemTime::now().duration_since(self.last_activity).map(|age| age > SESSION_TTL).unwrap_or(true)
    }

    /// Derive the per-message AES key as `H(shared_key || nonce_counter)`,
    /// so a compromised single-message key never exposes the whole session.
    fn message_key(&self, nonce: u64) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.shared_key);
        hasher.update(nonce.to_be_bytes());
        hasher.finalize().into()
    }

    /// Encrypt and MAC an application message, bumping the outbound nonce.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Frame, ChannelError> {
        if self.state != HandshakeState::Authenticated {
            return Err(ChannelError::SessionUnauthenticated);
        }
        self.touch();
        self.tx_nonce += 1;
        let nonce = self.tx_nonce;
        let key = self.message_key(nonce);

        let iv = rand::random::<[u8; 16]>();
        let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut mac = HmacSha256::new_from_slice(&self.hmac_key).expect("hmac accepts any key length");
        mac.update(&nonce.to_be_bytes());
        mac.update(&iv);
        mac.update(&ciphertext);
        let tag = mac.finalize().into_bytes().to_vec();

        Ok(Frame { nonce, iv: iv.to_vec(), ciphertext, tag })
    }

    /// Verify the MAC (constant-time) before decrypting, and enforce that
    /// `frame.nonce` is strictly greater than any previously accepted nonce.
    pub fn open(&mut self, frame: &Frame) -> Result<Vec<u8>, ChannelError> {
        if self.state != HandshakeState::Authenticated {
            return Err(ChannelError::SessionUnauthenticated);
        }
        if self.expired() {
            return Err(ChannelError::SessionExpired);
        }
        if frame.nonce <= self.last_rx_nonce {
            return Err(ChannelError::ReplayDetected);
        }

        let mut mac = HmacSha256::new_from_slice(&self.hmac_key).expect("hmac accepts any key length");
        mac.update(&frame.nonce.to_be_bytes());
        mac.update(&frame.iv);
        mac.update(&frame.ciphertext);
        let expected = mac.finalize().into_bytes();
        if expected.as_slice().ct_eq(&frame.tag).unwrap_u8() == 0 {
            return Err(ChannelError::HmacMismatch);
        }

        let iv: [u8; 16] = frame.iv.clone().try_into().map_err(|_| ChannelError::UnexpectedMessage)?;
        let key = self.message_key(frame.nonce);
        let plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&frame.ciphertext)
            .map_err(|_| ChannelError::UnexpectedMessage)?;

        self.last_rx_nonce = frame.nonce;
        self.touch();
        Ok(plaintext)
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub nonce: u64,
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

/// The wire messages exchanged while establishing a [`Session`]. Every
/// variant carries `{public_key, nonce, timestamp, signature}` so the
/// recipient can recover the signer and check it against the stated
/// `public_key` before trusting anything else in the message (§4.13).
pub enum HandshakeMessage {
    Init { session_id: String, peer_id: String, public_key: PublicKey, nonce: u64, timestamp: i64, signature: Vec<u8> },
    Response { session_id: String, public_key: PublicKey, nonce: u64, timestamp: i64, signature: Vec<u8> },
    Confirm { session_id: String, public_key: PublicKey, nonce: u64, timestamp: i64, signature: Vec<u8> },
}

/// Drives the three-step signed-ECDH handshake and owns the resulting
/// sessions.
pub struct SecureChannel {
    local_key: SigningKey,
    sessions: HashMap<String, Session>,
}

impl SecureChannel {
    pub fn new() -> Self {
        Self { local_key: SigningKey::random(&mut OsRng), sessions: HashMap::new() }
    }

    pub fn local_public(&self) -> PublicKey {
        PublicKey::from(*self.local_key.verifying_key())
    }

    fn derive_keys(shared_secret: &k256::ecdh::SharedSecret) -> ([u8; 32], [u8; 32]) {
        let raw = shared_secret.raw_secret_bytes();
        let mut encryption = Sha256::new();
        encryption.update(b"airchainpay-secure-channel-encryption");
        encryption.update(raw.as_slice());
        let mut hmac_seed = Sha256::new();
        hmac_seed.update(b"airchainpay-secure-channel-hmac");
        hmac_seed.update(raw.as_slice());
        (encryption.finalize().into(), hmac_seed.finalize().into())
    }

    fn handshake_digest(session_id: &str, public_key: &PublicKey, nonce: u64, timestamp: i64) -> [u8; 32] {
        let mut buf = Vec::new();
        buf.extend_from_slice(session_id.as_bytes());
        buf.extend_from_slice(public_key.to_encoded_point(true).as_bytes());
        buf.extend_from_slice(&nonce.to_be_bytes());
        buf.extend_from_slice(&timestamp.to_be_bytes());
        keccak256(&buf).0
    }

    /// Sign `H(session_id || public_key || nonce || timestamp)` with the
    /// local identity key, returning a 65-byte `r || s || recovery_id`.
    fn sign_handshake(&self, session_id: &str, public_key: &PublicKey, nonce: u64, timestamp: i64) -> Vec<u8> {
        let digest = Self::handshake_digest(session_id, public_key, nonce, timestamp);
        let (signature, recovery_id) = self
            .local_key
            .sign_prehash_recoverable(&digest)
            .expect("signing a fixed-size digest cannot fail");
        let mut bytes = signature.to_bytes().to_vec();
        bytes.push(recovery_id.to_byte());
        bytes
    }

    /// Recover the signer from `signature` and confirm it matches the
    /// address derived from `public_key`, rejecting stale timestamps.
    /// Returns the recovered address on success.
    fn verify_handshake(
        session_id: &str,
        public_key: &PublicKey,
        nonce: u64,
        timestamp: i64,
        signature: &[u8],
    ) -> Result<Address, ChannelError> {
        if (now_unix() - timestamp).abs() > HANDSHAKE_MAX_SKEW_SECS {
            return Err(ChannelError::SignatureInvalid);
        }
        if signature.len() != 65 {
            return Err(ChannelError::SignatureInvalid);
        }
        let digest = Self::handshake_digest(session_id, public_key, nonce, timestamp);
        let sig = EcdsaSignature::from_slice(&signature[..64]).map_err(|_| ChannelError::SignatureInvalid)?;
        let recovery_id = RecoveryId::from_byte(signature[64]).ok_or(ChannelError::SignatureInvalid)?;
        let recovered = VerifyingKey::recover_from_prehash(&digest, &sig, recovery_id)
            .map_err(|_| ChannelError::SignatureInvalid)?;

        let claimed = address_from_public_key(public_key);
        let signer = address_from_verifying_key(&recovered);
        if signer != claimed {
            return Err(ChannelError::SignatureInvalid);
        }
        Ok(claimed)
    }

    /// Initiator: begin a signed handshake with `peer_id`.
    pub fn initiate(&self, peer_id: impl Into<String>, session_id: impl Into<String>) -> HandshakeMessage {
        let session_id = session_id.into();
        let public_key = self.local_public();
        let nonce = rand::random::<u64>();
        let timestamp = now_unix();
        let signature = self.sign_handshake(&session_id, &public_key, nonce, timestamp);
        HandshakeMessage::Init { session_id, peer_id: peer_id.into(), public_key, nonce, timestamp, signature }
    }

    /// Responder: verify an `Init` and produce a signed `Response`,
    /// establishing a not-yet-authenticated session pending the
    /// initiator's `Confirm`.
    pub fn accept(&mut self, init: &HandshakeMessage) -> Result<HandshakeMessage, ChannelError> {
        let HandshakeMessage::Init { session_id, peer_id, public_key, nonce, timestamp, signature } = init else {
            return Err(ChannelError::UnexpectedMessage);
        };
        let peer_address = Self::verify_handshake(session_id, public_key, *nonce, *timestamp, signature)?;

        let shared = diffie_hellman(self.local_key.as_nonzero_scalar(), public_key.as_affine());
        let (shared_key, hmac_key) = Self::derive_keys(&shared);

        self.sessions.insert(
            session_id.clone(),
            Session {
                session_id: session_id.clone(),
                peer_id: peer_id.clone(),
                peer_address,
                shared_key,
                hmac_key,
                created_at: SystemTime::now(),
                last_activity: SystemTime::now(),
                state: HandshakeState::AwaitConfirm,
                tx_nonce: 0,
                last_rx_nonce: 0,
            },
        );

        let response_key = self.local_public();
        let resp_nonce = rand::random::<u64>();
        let resp_timestamp = now_unix();
        let resp_signature = self.sign_handshake(session_id, &response_key, resp_nonce, resp_timestamp);
        Ok(HandshakeMessage::Response {
            session_id: session_id.clone(),
            public_key: response_key,
            nonce: resp_nonce,
            timestamp: resp_timestamp,
            signature: resp_signature,
        })
    }

    /// Initiator: verify the responder's signed `Response`, derive the same
    /// shared secret independently, and produce the closing `Confirm`.
    pub fn complete(&mut self, peer_id: String, response: &HandshakeMessage) -> Result<HandshakeMessage, ChannelError> {
        let HandshakeMessage::Response { session_id, public_key, nonce, timestamp, signature } = response else {
            return Err(ChannelError::UnexpectedMessage);
        };
        let peer_address = Self::verify_handshake(session_id, public_key, *nonce, *timestamp, signature)?;

        let shared = diffie_hellman(self.local_key.as_nonzero_scalar(), public_key.as_affine());
        let (shared_key, hmac_key) = Self::derive_keys(&shared);

        self.sessions.insert(
            session_id.clone(),
            Session {
                session_id: session_id.clone(),
                peer_id,
                peer_address,
                shared_key,
                hmac_key,
                created_at: SystemTime::now(),
                last_activity: SystemTime::now(),
                state: HandshakeState::Authenticated,
                tx_nonce: 0,
                last_rx_nonce: 0,
            },
        );

        let confirm_key = self.local_public();
        let confirm_nonce = rand::random::<u64>();
        let confirm_timestamp = now_unix();
        let confirm_signature = self.sign_handshake(session_id, &confirm_key, confirm_nonce, confirm_timestamp);
        Ok(HandshakeMessage::Confirm {
            session_id: session_id.clone(),
            public_key: confirm_key,
            nonce: confirm_nonce,
            timestamp: confirm_timestamp,
            signature: confirm_signature,
        })
    }

    /// Responder: verify the initiator's `Confirm`, moving the session from
    /// `AwaitConfirm` to `Authenticated`. A forged or replayed `Confirm` is
    /// rejected before the state transition happens.
    pub fn confirm(&mut self, confirm: &HandshakeMessage) -> Result<(), ChannelError> {
        let HandshakeMessage::Confirm { session_id, public_key, nonce, timestamp, signature } = confirm else {
            return Err(ChannelError::UnexpectedMessage);
        };
        let signer = Self::verify_handshake(session_id, public_key, *nonce, *timestamp, signature)?;

        let session = self.sessions.get_mut(session_id).ok_or(ChannelError::UnexpectedMessage)?;
        if session.state != HandshakeState::AwaitConfirm {
            return Err(ChannelError::UnexpectedMessage);
        }
        if signer != session.peer_address {
            return Err(ChannelError::SignatureInvalid);
        }
        session.state = HandshakeState::Authenticated;
        Ok(())
    }

    pub fn session_mut(&mut self, session_id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(session_id)
    }

    /// Drop sessions that have been inactive past [`SESSION_TTL`].
    pub fn sweep_expired(&mut self) {
        self.sessions.retain(|_, session| !session.expired());
    }
}

impl Default for SecureChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake(initiator: &mut SecureChannel, responder: &mut SecureChannel) -> String {
        let session_id = "session-1".to_string();
        let init = initiator.initiate("responder", session_id.clone());
        let response = responder.accept(&init).unwrap();
        let confirm = initiator.complete("initiator".to_string(), &response).unwrap();
        responder.confirm(&confirm).unwrap();
        session_id
    }

    #[test]
    fn handshake_yields_matching_shared_secrets() {
        let mut initiator = SecureChannel::new();
        let mut responder = SecureChannel::new();
        let session_id = handshake(&mut initiator, &mut responder);

        let plaintext = b"hello peer";
        let frame = initiator.session_mut(&session_id).unwrap().seal(plaintext).unwrap();
        let opened = responder.session_mut(&session_id).unwrap().open(&frame).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn handshake_recovers_correct_peer_address() {
        let mut initiator = SecureChannel::new();
        let mut responder = SecureChannel::new();
        let session_id = handshake(&mut initiator, &mut responder);

        let expected_initiator_address = address_from_public_key(&initiator.local_public());
        let expected_responder_address = address_from_public_key(&responder.local_public());
        assert_eq!(responder.session_mut(&session_id).unwrap().peer_address, expected_initiator_address);
        assert_eq!(initiator.session_mut(&session_id).unwrap().peer_address, expected_responder_address);
    }

    #[test]
    fn tampered_public_key_fails_signature_verification() {
        let mut initiator = SecureChannel::new();
        let mut responder = SecureChannel::new();
        let session_id = "session-1".to_string();
        let init = initiator.initiate("responder", session_id.clone());

        let mitm_key = SecureChannel::new().local_public();
        let tampered = match init {
            HandshakeMessage::Init { session_id, peer_id, nonce, timestamp, signature, .. } => {
                HandshakeMessage::Init { session_id, peer_id, public_key: mitm_key, nonce, timestamp, signature }
            }
            _ => unreachable!(),
        };

        let result = responder.accept(&tampered);
        assert!(matches!(result, Err(ChannelError::SignatureInvalid)));
    }

    #[test]
    fn replayed_nonce_is_rejected() {
        let mut initiator = SecureChannel::new();
        let mut responder = SecureChannel::new();
        let session_id = handshake(&mut initiator, &mut responder);

        let frame = initiator.session_mut(&session_id).unwrap().seal(b"first").unwrap();
        responder.session_mut(&session_id).unwrap().open(&frame).unwrap();
        let replay_result = responder.session_mut(&session_id).unwrap().open(&frame);
        assert!(matches!(replay_result, Err(ChannelError::ReplayDetected)));
    }

    #[test]
    fn tampered_ciphertext_fails_hmac_check() {
        let mut initiator = SecureChannel::new();
        let mut responder = SecureChannel::new();
        let session_id = handshake(&mut initiator, &mut responder);

        let mut frame = initiator.session_mut(&session_id).unwrap().seal(b"payload").unwrap();
        frame.ciphertext[0] ^= 0xFF;
        let result = responder.session_mut(&session_id).unwrap().open(&frame);
        assert!(matches!(result, Err(ChannelError::HmacMismatch)));
    }
}
