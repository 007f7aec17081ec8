//! Top-level application configuration, loaded from TOML or environment.

use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Profile name (for logging/identification).
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// Offline-queue expiry sweep timing.
    #[serde(default)]
    pub expiry: ExpiryTimingConfig,

    /// Password lockout and session timeout policy.
    #[serde(default)]
    pub security: SecurityConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Timing knobs for [`crate::expiry::ExpiryService`] (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryTimingConfig {
    /// Offline age after which a queued tx is force-expired.
    #[serde(default = "default_max_offline_duration_secs")]
    pub max_offline_duration_secs: u64,

    /// Offline age at which the first expiry warning fires.
    #[serde(default = "default_warning_threshold_secs")]
    pub warning_threshold_secs: u64,

    /// How often the cleanup sweep runs.
    #[serde(default = "default_cleanup_period_secs")]
    pub cleanup_period_secs: u64,

    /// Max sync retries before a queued tx is marked failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between sync retries (before exponential backoff applies).
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

fn default_max_offline_duration_secs() -> u64 {
    24 * 3600
}
fn default_warning_threshold_secs() -> u64 {
    12 * 3600
}
fn default_cleanup_period_secs() -> u64 {
    3600
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    30 * 60
}

impl Default for ExpiryTimingConfig {
    fn default() -> Self {
        Self {
            max_offline_duration_secs: default_max_offline_duration_secs(),
            warning_threshold_secs: default_warning_threshold_secs(),
            cleanup_period_secs: default_cleanup_period_secs(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl ExpiryTimingConfig {
    pub fn max_offline_duration(&self) -> Duration {
        Duration::from_secs(self.max_offline_duration_secs)
    }
    pub fn warning_threshold(&self) -> Duration {
        Duration::from_secs(self.warning_threshold_secs)
    }
    pub fn cleanup_period(&self) -> Duration {
        Duration::from_secs(self.cleanup_period_secs)
    }
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Password lockout and secure-session timeout policy (§4.4, §4.13).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Failed password attempts before lockout.
    #[serde(default = "default_max_password_attempts")]
    pub max_password_attempts: u32,

    /// Lockout duration after exhausting attempts.
    #[serde(default = "default_lockout_duration_secs")]
    pub lockout_duration_secs: u64,

    /// Secure-channel session inactivity timeout.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,

    /// Lenient payload verification window.
    #[serde(default = "default_payload_max_age_secs")]
    pub payload_max_age_secs: i64,

    /// Strict payload verification window.
    #[serde(default = "default_payload_strict_max_age_secs")]
    pub payload_strict_max_age_secs: i64,
}

fn default_max_password_attempts() -> u32 {
    5
}
fn default_lockout_duration_secs() -> u64 {
    5 * 60
}
fn default_session_timeout_secs() -> u64 {
    5 * 60
}
fn default_payload_max_age_secs() -> i64 {
    30 * 60
}
fn default_payload_strict_max_age_secs() -> i64 {
    5 * 60
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_password_attempts: default_max_password_attempts(),
            lockout_duration_secs: default_lockout_duration_secs(),
            session_timeout_secs: default_session_timeout_secs(),
            payload_max_age_secs: default_payload_max_age_secs(),
            payload_strict_max_age_secs: default_payload_strict_max_age_secs(),
        }
    }
}

impl SecurityConfig {
    pub fn lockout_duration(&self) -> Duration {
        Duration::from_secs(self.lockout_duration_secs)
    }
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            expiry: ExpiryTimingConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `AIRCHAINPAY_CONFIG` if set, otherwise defaults.
    pub fn from_env() -> Self {
        match std::env::var("AIRCHAINPAY_CONFIG") {
            Ok(path) => Self::from_file(&path).unwrap_or_else(|e| {
                tracing::warn!(error = %e, path, "failed to load config file, using defaults");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "application configuration loaded");
        tracing::info!(
            max_offline_duration_secs = self.expiry.max_offline_duration_secs,
            warning_threshold_secs = self.expiry.warning_threshold_secs,
            cleanup_period_secs = self.expiry.cleanup_period_secs,
            "expiry timing"
        );
        tracing::info!(
            max_password_attempts = self.security.max_password_attempts,
            lockout_duration_secs = self.security.lockout_duration_secs,
            session_timeout_secs = self.security.session_timeout_secs,
            "security policy"
        );
    }
}

static GLOBAL_CONFIG: OnceLock<AppConfig> = OnceLock::new();

pub fn init_config(config: AppConfig) {
    let _ = GLOBAL_CONFIG.set(config);
}

pub fn config() -> &'static AppConfig {
    GLOBAL_CONFIG.get_or_init(AppConfig::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_values() {
        let config = AppConfig::default();
        assert_eq!(config.expiry.max_offline_duration_secs, 24 * 3600);
        assert_eq!(config.security.max_password_attempts, 5);
        assert_eq!(config.security.payload_strict_max_age_secs, 5 * 60);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.expiry.max_retries, config.expiry.max_retries);
    }
}
