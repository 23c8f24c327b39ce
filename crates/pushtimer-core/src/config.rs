//! Configuration resolution for pushtimer.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/pushtimer/settings.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete pushtimer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub vapid: VapidConfig,
}

/// HTTP server and partition runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Root directory for partition databases. `None` resolves to the
    /// platform data directory.
    pub data_dir: Option<PathBuf>,
    pub log_level: String,
    /// Seconds an actor with no pending alarm stays resident without
    /// traffic. Zero keeps actors resident forever.
    pub idle_timeout_secs: u64,
    /// Bounded mailbox size of each partition actor.
    pub mailbox_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8787".to_string(),
            data_dir: None,
            log_level: "info".to_string(),
            idle_timeout_secs: 300,
            mailbox_capacity: 64,
        }
    }
}

impl ServerConfig {
    /// Idle eviction timeout, or `None` when eviction is disabled.
    pub const fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_secs))
        }
    }
}

/// What the delivery worker does after the push service rejects a message.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log only. The subscription stays stored and no alarm is re-armed.
    #[default]
    Stall,
    /// 404/410 removes the subscription; anything else re-arms the alarm
    /// after `retry_delay_secs`.
    Classify,
}

impl std::str::FromStr for FailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stall" => Ok(Self::Stall),
            "classify" => Ok(Self::Classify),
            other => Err(Error::Config(format!(
                "Unknown failure policy '{other}' (expected 'stall' or 'classify')"
            ))),
        }
    }
}

/// Delivery timing and failure handling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Fixed delay between registration and the delivery attempt.
    pub delay_secs: u64,
    /// Push message time-to-live sent to the push service.
    pub ttl_secs: u64,
    pub failure_policy: FailurePolicy,
    pub retry_delay_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            delay_secs: 5,
            ttl_secs: 60,
            failure_policy: FailurePolicy::Stall,
            retry_delay_secs: 60,
        }
    }
}

/// VAPID application-server identity and legacy GCM key.
///
/// Every field is optional at load time; missing signing keys surface as a
/// delivery configuration error when a timer fires.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct VapidConfig {
    /// `mailto:` or `https:` contact URI placed in the JWT `sub` claim.
    pub subject: Option<String>,
    /// Base64url-encoded uncompressed P-256 public key.
    pub public_key: Option<String>,
    /// Path to the PKCS#8 PEM private key.
    pub private_key_path: Option<PathBuf>,
    pub gcm_api_key: Option<String>,
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit_file: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        let global = load_config_file(&global_path)?;
        merge_config(&mut config, global);
    }

    if let Some(path) = explicit_file {
        let explicit = load_config_file(path)?;
        merge_config(&mut config, explicit);
    }

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate(&config)?;

    Ok(config)
}

/// Reject settings the scheduler cannot run with.
pub fn validate(config: &Config) -> Result<()> {
    if config.delivery.retry_delay_secs == 0 {
        return Err(Error::Config(
            "delivery.retry_delay_secs must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("pushtimer").join("settings.json"))
}

/// Default root directory for partition databases.
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("pushtimer"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    if overlay.server.data_dir.is_some() {
        base.server.data_dir = overlay.server.data_dir;
    }
    base.server.listen_addr = overlay.server.listen_addr;
    base.server.log_level = overlay.server.log_level;
    base.server.idle_timeout_secs = overlay.server.idle_timeout_secs;
    base.server.mailbox_capacity = overlay.server.mailbox_capacity;

    base.delivery = overlay.delivery;

    // Secrets are merged field by field so a project file can add a key
    // without repeating the rest.
    if overlay.vapid.subject.is_some() {
        base.vapid.subject = overlay.vapid.subject;
    }
    if overlay.vapid.public_key.is_some() {
        base.vapid.public_key = overlay.vapid.public_key;
    }
    if overlay.vapid.private_key_path.is_some() {
        base.vapid.private_key_path = overlay.vapid.private_key_path;
    }
    if overlay.vapid.gcm_api_key.is_some() {
        base.vapid.gcm_api_key = overlay.vapid.gcm_api_key;
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, val: &str) -> Result<T> {
    val.parse()
        .map_err(|_| Error::Config(format!("Invalid value for {name}: '{val}'")))
}

fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(val) = lookup("PUSHTIMER_LISTEN_ADDR") {
        config.server.listen_addr = val;
    }
    if let Some(val) = lookup("PUSHTIMER_DATA_DIR") {
        config.server.data_dir = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("PUSHTIMER_LOG_LEVEL") {
        config.server.log_level = val;
    }
    if let Some(val) = lookup("PUSHTIMER_IDLE_TIMEOUT_SECS") {
        config.server.idle_timeout_secs = parse_env("PUSHTIMER_IDLE_TIMEOUT_SECS", &val)?;
    }
    if let Some(val) = lookup("PUSHTIMER_DELAY_SECS") {
        config.delivery.delay_secs = parse_env("PUSHTIMER_DELAY_SECS", &val)?;
    }
    if let Some(val) = lookup("PUSHTIMER_FAILURE_POLICY") {
        config.delivery.failure_policy = val.parse()?;
    }
    if let Some(val) = lookup("PUSHTIMER_VAPID_SUBJECT") {
        config.vapid.subject = Some(val);
    }
    if let Some(val) = lookup("PUSHTIMER_VAPID_PUBLIC_KEY") {
        config.vapid.public_key = Some(val);
    }
    if let Some(val) = lookup("PUSHTIMER_VAPID_PRIVATE_KEY_PATH") {
        config.vapid.private_key_path = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("PUSHTIMER_GCM_API_KEY") {
        config.vapid.gcm_api_key = Some(val);
    }
    Ok(())
}
