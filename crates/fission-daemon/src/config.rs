//! Configuration file management.
//!
//! Settings come from `config.toml` and are then overridden by environment
//! variables. They are loaded once at startup and never change afterwards.

use std::net::SocketAddr;
use std::path::PathBuf;

use fission_entitlement::EntitlementConfig;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Project identifier; names the database file. Required.
    #[serde(default)]
    pub project_id: String,
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Caller identity settings.
    #[serde(default)]
    pub identity: IdentityConfig,
    /// External entitlement service.
    #[serde(default)]
    pub entitlement: EntitlementSettings,
    /// Accrual backlog recovery.
    #[serde(default)]
    pub accrual: AccrualConfig,
    /// Entitlement redelivery.
    #[serde(default)]
    pub outbox: OutboxConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Change-bus buffer per subscriber.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

/// How the acting user is identified on intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// Every request acts as `static_uid`.
    Static,
    /// The uid is read from a header set by a trusted gateway.
    Header,
}

/// Identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_identity_mode")]
    pub mode: IdentityMode,
    #[serde(default = "default_static_uid")]
    pub static_uid: String,
    #[serde(default = "default_uid_header")]
    pub uid_header: String,
}

/// Entitlement service configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct EntitlementSettings {
    /// Grants are only attempted when enabled.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub entitlement_id: String,
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub audience: String,
    #[serde(default)]
    pub kid: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub app_platform: String,
    /// HS256 signing secret. Never written back out.
    #[serde(default, skip_serializing)]
    pub shared_secret: String,
    /// Credential lifetime; clamped to one to two days.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Accrual backlog configuration.
///
/// Referral records not yet accrued are swept from the database at startup,
/// after the bus drops changes, on shutdown and every `backlog_interval_secs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccrualConfig {
    #[serde(default = "default_backlog_interval")]
    pub backlog_interval_secs: u64,
    #[serde(default = "default_backlog_batch")]
    pub backlog_batch: u32,
}

/// Outbox redelivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// "trace" | "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_bus_capacity() -> usize {
    1000
}

fn default_identity_mode() -> IdentityMode {
    IdentityMode::Static
}

fn default_static_uid() -> String {
    "test_uid_abcd_efg".to_string()
}

fn default_uid_header() -> String {
    "x-fission-uid".to_string()
}

fn default_token_ttl() -> u64 {
    2 * 86_400
}

fn default_request_timeout() -> u64 {
    10
}

fn default_backlog_interval() -> u64 {
    30
}

fn default_backlog_batch() -> u32 {
    100
}

fn default_retry_interval() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    5
}

fn default_batch_size() -> u32 {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            bus_capacity: default_bus_capacity(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            mode: default_identity_mode(),
            static_uid: default_static_uid(),
            uid_header: default_uid_header(),
        }
    }
}

impl Default for EntitlementSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            entitlement_id: String::new(),
            issuer: String::new(),
            audience: String::new(),
            kid: String::new(),
            app_version: String::new(),
            app_platform: String::new(),
            shared_secret: String::new(),
            token_ttl_secs: default_token_ttl(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for EntitlementSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitlementSettings")
            .field("enabled", &self.enabled)
            .field("url", &self.url)
            .field("entitlement_id", &self.entitlement_id)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("kid", &self.kid)
            .field("shared_secret", &"[REDACTED]")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish_non_exhaustive()
    }
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            backlog_interval_secs: default_backlog_interval(),
            backlog_batch: default_backlog_batch(),
        }
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: default_retry_interval(),
            max_attempts: default_max_attempts(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl EntitlementSettings {
    /// Client settings for [`fission_entitlement::HttpEntitlementNotifier`].
    pub fn client_config(&self) -> EntitlementConfig {
        EntitlementConfig {
            url: self.url.clone(),
            entitlement_id: self.entitlement_id.clone(),
            issuer: self.issuer.clone(),
            audience: self.audience.clone(),
            kid: self.kid.clone(),
            app_version: self.app_version.clone(),
            app_platform: self.app_platform.clone(),
            shared_secret: SecretString::from(self.shared_secret.clone()),
            token_ttl_secs: self.token_ttl_secs,
            timeout_secs: self.request_timeout_secs,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the config file, apply environment
    /// overrides and validate the result.
    ///
    /// Falls back to defaults if the file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override settings from environment variables looked up via `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |target: &mut String, keys: &[&str]| {
            if let Some(value) = keys.iter().find_map(|k| lookup(*k).filter(|v| !v.is_empty())) {
                *target = value;
            }
        };

        set(&mut self.project_id, &["FISSION_PROJECT_ID", "GCP_PROJECT", "GOOGLE_CLOUD_PROJECT"]);
        set(&mut self.server.listen_addr, &["FISSION_LISTEN_ADDR"]);
        set(&mut self.storage.data_dir, &["FISSION_DATA_DIR"]);
        set(&mut self.logging.level, &["FISSION_LOG_LEVEL"]);

        let e = &mut self.entitlement;
        set(&mut e.url, &["FISSION_ENTITLEMENT_URL"]);
        set(&mut e.entitlement_id, &["FISSION_ENTITLEMENT_ID"]);
        set(&mut e.issuer, &["FISSION_ENTITLEMENT_ISSUER"]);
        set(&mut e.audience, &["FISSION_ENTITLEMENT_AUDIENCE"]);
        set(&mut e.kid, &["FISSION_ENTITLEMENT_KID"]);
        set(&mut e.app_version, &["FISSION_APP_VERSION"]);
        set(&mut e.app_platform, &["FISSION_APP_PLATFORM"]);
        set(&mut e.shared_secret, &["FISSION_ENTITLEMENT_SECRET"]);

        if let Some(ttl) = lookup("FISSION_TOKEN_TTL_SECS").and_then(|v| v.parse().ok()) {
            e.token_ttl_secs = ttl;
        }
        if let Some(enabled) = lookup("FISSION_ENTITLEMENT_ENABLED") {
            e.enabled = enabled == "true" || enabled == "1";
        }
    }

    /// Reject configurations the daemon cannot start with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.project_id.trim().is_empty() {
            anyhow::bail!("project_id must be set (FISSION_PROJECT_ID)");
        }
        self.listen_addr()?;
        if self.identity.mode == IdentityMode::Static && self.identity.static_uid.is_empty() {
            anyhow::bail!("identity.static_uid must not be empty in static mode");
        }
        if self.identity.mode == IdentityMode::Header
            && axum::http::HeaderName::from_bytes(self.identity.uid_header.as_bytes()).is_err()
        {
            anyhow::bail!("identity.uid_header is not a valid header name");
        }

        let e = &self.entitlement;
        if e.enabled {
            for (name, value) in [
                ("entitlement.url", &e.url),
                ("entitlement.entitlement_id", &e.entitlement_id),
                ("entitlement.shared_secret", &e.shared_secret),
            ] {
                if value.trim().is_empty() {
                    anyhow::bail!("{name} must be set when the entitlement service is enabled");
                }
            }
            // Redelivery must not pick up a row whose first attempt may still be in flight.
            if e.request_timeout_secs >= self.outbox.retry_interval_secs {
                anyhow::bail!(
                    "entitlement.request_timeout_secs ({}) must be less than outbox.retry_interval_secs ({})",
                    e.request_timeout_secs,
                    self.outbox.retry_interval_secs
                );
            }
        }
        if self.outbox.max_attempts == 0 {
            anyhow::bail!("outbox.max_attempts must be at least 1");
        }
        if self.accrual.backlog_batch == 0 {
            anyhow::bail!("accrual.backlog_batch must be at least 1");
        }
        Ok(())
    }

    /// Parsed listen address.
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.server
            .listen_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid listen_addr {:?}: {e}", self.server.listen_addr))
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    /// Database file for this project.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join(format!("{}.db", self.project_id))
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("FISSION_CONFIG") {
            return PathBuf::from(path);
        }
        Self::default_data_dir().join("config.toml")
    }

    /// Default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("FISSION_DATA_DIR") {
            return PathBuf::from(dir);
        }
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".fission"))
            .unwrap_or_else(|_| PathBuf::from("/tmp/fission"))
    }
}
