//! Salted PBKDF2 password hashing, constant-time verification, lockout
//! tracking, and strength classification (§4.2).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::errors::VaultError;

const ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 32;
const HASH_LEN: usize = 64;
const HASH_PREFIX: &str = "v1";

pub const MAX_PASSWORD_ATTEMPTS: u32 = 5;
pub const LOCKOUT_DURATION: Duration = Duration::from_secs(5 * 60);

const WEAK_PASSWORDS: &[&str] = &["password", "12345678", "qwerty123", "letmein", "password1"];

/// Hash a password into the `v1$<iterations>$<salt_hex>$<hash_hex>` format.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    hash_with_salt(password, &salt, ITERATIONS)
}

fn hash_with_salt(password: &str, salt: &[u8], iterations: u32) -> String {
    let mut out = [0u8; HASH_LEN];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(password.as_bytes(), salt, iterations, &mut out);
    format!("{HASH_PREFIX}${iterations}${}${}", hex::encode(salt), hex::encode(out))
}

/// Verify `password` against a stored `v1$...` hash in constant time.
/// Returns `Ok(false)` (not an error) for a well-formed mismatch; returns
/// `Err(PasswordInvalid)` if the stored hash is not in the recognized
/// format (e.g. legacy plaintext, which must go through the migration
/// flow at the call site instead).
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool, VaultError> {
    let mut parts = stored_hash.splitn(4, '$');
    let (Some(prefix), Some(iterations), Some(salt_hex), Some(hash_hex)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(VaultError::PasswordInvalid);
    };
    if prefix != HASH_PREFIX {
        return Err(VaultError::PasswordInvalid);
    }
    let iterations: u32 = iterations.parse().map_err(|_| VaultError::PasswordInvalid)?;
    let salt = hex::decode(salt_hex).map_err(|_| VaultError::PasswordInvalid)?;
    let expected = hex::decode(hash_hex).map_err(|_| VaultError::PasswordInvalid)?;

    let mut actual = vec![0u8; expected.len()];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(password.as_bytes(), &salt, iterations, &mut actual);

    Ok(bool::from(actual.ct_eq(&expected)))
}

/// Returns `true` if `stored_hash` is not in the recognized `v1$...` format
/// and should be treated as legacy plaintext pending migration.
pub fn is_legacy_plaintext(stored_hash: &str) -> bool {
    !stored_hash.starts_with("v1$")
}

/// Password strength classification result.
#[derive(Debug, Clone)]
pub struct StrengthReport {
    pub is_valid: bool,
    pub score: u8,
    pub feedback: Vec<String>,
}

/// Classify password strength on an 0..8 scale.
pub fn classify_strength(password: &str) -> StrengthReport {
    let mut feedback = Vec::new();
    let mut score = 0u8;

    if password.len() >= 8 {
        score += 2;
    } else {
        feedback.push("use at least 8 characters".to_string());
    }
    if password.chars().any(|c| c.is_ascii_uppercase()) {
        score += 1;
    } else {
        feedback.push("add an uppercase letter".to_string());
    }
    if password.chars().any(|c| c.is_ascii_lowercase()) {
        score += 1;
    } else {
        feedback.push("add a lowercase letter".to_string());
    }
    if password.chars().any(|c| c.is_ascii_digit()) {
        score += 1;
    } else {
        feedback.push("add a digit".to_string());
    }
    if password.chars().any(|c| !c.is_ascii_alphanumeric()) {
        score += 1;
    } else {
        feedback.push("add a special character".to_string());
    }
    if password.len() >= 12 {
        score += 2;
    }

    let is_weak_listed = WEAK_PASSWORDS
        .iter()
        .any(|weak| weak.eq_ignore_ascii_case(password));
    if is_weak_listed {
        feedback.push("this password is on a known weak-password list".to_string());
        score = score.min(1);
    }

    StrengthReport {
        is_valid: password.len() >= 8 && !is_weak_listed,
        score: score.min(8),
        feedback,
    }
}

/// Tracks failed password attempts for the lockout window (§4.2, persisted
/// key `password_attempts`).
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct PasswordAttempts {
    pub timestamp_secs: u64,
    pub count: u32,
}

impl PasswordAttempts {
    pub fn record_failure(&mut self, now: SystemTime) {
        let now_secs = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        if now_secs.saturating_sub(self.timestamp_secs) > LOCKOUT_DURATION.as_secs() {
            self.count = 0;
        }
        self.count += 1;
        self.timestamp_secs = now_secs;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Seconds remaining in the lockout window, or `None` if not locked out.
    pub fn locked_out_for(&self, now: SystemTime) -> Option<u64> {
        if self.count < MAX_PASSWORD_ATTEMPTS {
            return None;
        }
        let now_secs = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let elapsed = now_secs.saturating_sub(self.timestamp_secs);
        if elapsed >= LOCKOUT_DURATION.as_secs() {
            None
        } else {
            Some(LOCKOUT_DURATION.as_secs() - elapsed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_same_password_twice_yields_different_hashes_both_verify() {
        let h1 = hash_password("correct horse battery staple");
        let h2 = hash_password("correct horse battery staple");
        assert_ne!(h1, h2);
        assert!(verify_password("correct horse battery staple", &h1).unwrap());
        assert!(verify_password("correct horse battery staple", &h2).unwrap());
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let hash = hash_password("correct horse battery staple");
        assert!(!verify_password("wrong password", &hash).unwrap());
    }

    #[test]
    fn verify_rejects_non_v1_hash() {
        assert!(verify_password("anything", "plaintext-legacy").is_err());
        assert!(is_legacy_plaintext("plaintext-legacy"));
        assert!(!is_legacy_plaintext(&hash_password("x")));
    }

    #[test]
    fn strength_flags_weak_list() {
        let report = classify_strength("password1");
        assert!(!report.is_valid);
    }

    #[test]
    fn lockout_triggers_after_max_attempts() {
        let mut attempts = PasswordAttempts::default();
        let now = SystemTime::now();
        for _ in 0..MAX_PASSWORD_ATTEMPTS {
            attempts.record_failure(now);
        }
        assert!(attempts.locked_out_for(now).is_some());
    }

    #[test]
    fn lockout_clears_after_window() {
        let mut attempts = PasswordAttempts::default();
        let now = SystemTime::now();
        for _ in 0..MAX_PASSWORD_ATTEMPTS {
            attempts.record_failure(now);
        }
        let later = now + LOCKOUT_DURATION + Duration::from_secs(1);
        assert!(attempts.locked_out_for(later).is_none());
    }
}
