//! # fission-entitlement
//!
//! Client for the external entitlement (purchase management) service.
//!
//! Each grant mints a short-lived HS256 credential ([`token`]) and issues a
//! single `PUT` carrying `{app_user_id, entitlement_id, duration}`. Callers
//! treat the grant as best effort: failures are reported, never retried
//! here.

pub mod mock;
pub mod token;

use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Shortest allowed credential lifetime.
pub const MIN_TOKEN_TTL: Duration = Duration::from_secs(86_400);

/// Longest allowed credential lifetime.
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(2 * 86_400);

/// Errors raised while granting an entitlement.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("entitlement configuration error: {0}")]
    Config(String),

    #[error("credential error: {0}")]
    Token(String),

    #[error("entitlement transport error: {0}")]
    Transport(String),

    #[error("entitlement service returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },
}

impl From<reqwest::Error> for NotificationError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

/// Static settings for the entitlement service.
#[derive(Debug)]
pub struct EntitlementConfig {
    /// Endpoint receiving the `PUT`.
    pub url: String,
    pub entitlement_id: String,
    pub issuer: String,
    pub audience: String,
    /// Key identifier carried as a custom claim.
    pub kid: String,
    pub app_version: String,
    pub app_platform: String,
    pub shared_secret: SecretString,
    /// Requested credential lifetime; clamped to one to two days.
    pub token_ttl_secs: u64,
    /// Whole-request timeout.
    pub timeout_secs: u64,
}

impl EntitlementConfig {
    /// Credential lifetime after clamping.
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs).clamp(MIN_TOKEN_TTL, MAX_TOKEN_TTL)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(url: &str) -> Self {
        Self {
            url: url.to_string(),
            entitlement_id: "premium".into(),
            issuer: "fission".into(),
            audience: "entitlements".into(),
            kid: "key-1".into(),
            app_version: "1.0.0".into(),
            app_platform: "ios".into(),
            shared_secret: SecretString::from("test-secret".to_string()),
            token_ttl_secs: 172_800,
            timeout_secs: 5,
        }
    }
}

/// Body of the entitlement `PUT`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementsPutRequest {
    pub app_user_id: String,
    pub entitlement_id: String,
    pub duration: String,
}

/// Grants time-boxed entitlements to users.
#[async_trait]
pub trait EntitlementNotifier: Send + Sync {
    /// Grant `duration` (a duration-class name such as `"weekly"`) to `uid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential cannot be minted, the request
    /// cannot be sent, or the service answers with a non-success status.
    async fn grant(&self, uid: &str, duration: &str) -> Result<(), NotificationError>;

    /// Returns the notifier name for logging.
    fn name(&self) -> &'static str;
}

/// Production notifier speaking HTTP to the entitlement service.
pub struct HttpEntitlementNotifier {
    config: EntitlementConfig,
    http_client: reqwest::Client,
}

impl HttpEntitlementNotifier {
    /// # Errors
    ///
    /// Returns an error when the URL is empty or the HTTP client cannot be
    /// initialized.
    pub fn new(config: EntitlementConfig) -> Result<Self, NotificationError> {
        if config.url.trim().is_empty() {
            return Err(NotificationError::Config("url must not be empty".into()));
        }
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let http_client = reqwest::Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(15)))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &EntitlementConfig {
        &self.config
    }
}

#[async_trait]
impl EntitlementNotifier for HttpEntitlementNotifier {
    async fn grant(&self, uid: &str, duration: &str) -> Result<(), NotificationError> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| NotificationError::Token(e.to_string()))?
            .as_secs();
        let jwt = token::mint(&self.config, now)?;

        let body = EntitlementsPutRequest {
            app_user_id: uid.to_string(),
            entitlement_id: self.config.entitlement_id.clone(),
            duration: duration.to_string(),
        };

        let response = self
            .http_client
            .put(&self.config.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .bearer_auth(jwt)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        info!(uid, duration, status = status.as_u16(), "entitlement granted");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
