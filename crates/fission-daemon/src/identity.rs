//! Resolution of the acting user on intake requests.

use axum::http::{HeaderMap, HeaderName};

use crate::config::{IdentityConfig, IdentityMode};

/// Identity resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("missing identity header {0}")]
    Missing(String),

    #[error("invalid identity header {0}")]
    Invalid(String),
}

/// Maps an incoming request to the uid it acts as.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Result<String, IdentityError>;

    /// Returns the resolver name for logging.
    fn name(&self) -> &'static str;
}

/// Every request acts as one fixed uid.
pub struct StaticIdentity {
    uid: String,
}

impl StaticIdentity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self { uid: uid.into() }
    }
}

impl IdentityResolver for StaticIdentity {
    fn resolve(&self, _headers: &HeaderMap) -> Result<String, IdentityError> {
        Ok(self.uid.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Reads the uid from a header populated by an authenticating gateway.
pub struct HeaderIdentity {
    header: HeaderName,
}

impl HeaderIdentity {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl IdentityResolver for HeaderIdentity {
    fn resolve(&self, headers: &HeaderMap) -> Result<String, IdentityError> {
        let value = headers
            .get(&self.header)
            .ok_or_else(|| IdentityError::Missing(self.header.to_string()))?;
        let uid = value
            .to_str()
            .map_err(|_| IdentityError::Invalid(self.header.to_string()))?
            .trim();
        if uid.is_empty() {
            return Err(IdentityError::Missing(self.header.to_string()));
        }
        Ok(uid.to_string())
    }

    fn name(&self) -> &'static str {
        "header"
    }
}

/// Build the resolver selected by configuration.
pub fn from_config(config: &IdentityConfig) -> anyhow::Result<Box<dyn IdentityResolver>> {
    match config.mode {
        IdentityMode::Static => Ok(Box::new(StaticIdentity::new(config.static_uid.clone()))),
        IdentityMode::Header => {
            let header = HeaderName::from_bytes(config.uid_header.as_bytes())?;
            Ok(Box::new(HeaderIdentity::new(header)))
        }
    }
}
