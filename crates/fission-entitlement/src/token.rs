//! Signed bearer credential for the entitlement service.

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::{EntitlementConfig, NotificationError};

/// Client identity carried in every credential.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_platform: String,
}

/// Standard plus custom claims.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub aud: String,
    pub iat: u64,
    pub exp: u64,
    pub identity: Identity,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kid: String,
}

impl Claims {
    pub fn new(config: &EntitlementConfig, now: u64) -> Self {
        Self {
            iss: config.issuer.clone(),
            aud: config.audience.clone(),
            iat: now,
            exp: now + config.token_ttl().as_secs(),
            identity: Identity {
                app_version: config.app_version.clone(),
                app_platform: config.app_platform.clone(),
            },
            kid: config.kid.clone(),
        }
    }
}

/// Mint an HS256 token valid from `now` for the configured window.
pub fn mint(config: &EntitlementConfig, now: u64) -> Result<String, NotificationError> {
    let claims = Claims::new(config, now);
    let key = EncodingKey::from_secret(config.shared_secret.expose_secret().as_bytes());
    jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &key)
        .map_err(|e| NotificationError::Token(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation};

    fn decode(token: &str, secret: &str, config: &EntitlementConfig) -> jsonwebtoken::errors::Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[config.audience.as_str()]);
        validation.set_issuer(&[config.issuer.as_str()]);
        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
            .map(|data| data.claims)
    }

    fn now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    #[test]
    fn test_mint_carries_claims() {
        let config = EntitlementConfig::for_tests("http://localhost/entitlements");
        let issued = now();
        let token = mint(&config, issued).expect("mint");

        let claims = decode(&token, "test-secret", &config).expect("decode");
        assert_eq!(claims.iss, "fission");
        assert_eq!(claims.aud, "entitlements");
        assert_eq!(claims.kid, "key-1");
        assert_eq!(claims.identity.app_version, "1.0.0");
        assert_eq!(claims.identity.app_platform, "ios");
        assert_eq!(claims.exp - claims.iat, 172_800);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let config = EntitlementConfig::for_tests("http://localhost/entitlements");
        let token = mint(&config, now()).expect("mint");
        assert!(decode(&token, "other-secret", &config).is_err());
    }

    #[test]
    fn test_identity_omits_empty_fields() {
        let mut config = EntitlementConfig::for_tests("http://localhost/entitlements");
        config.app_platform = String::new();
        let json = serde_json::to_value(Claims::new(&config, 10)).expect("serialize");
        assert_eq!(json["identity"], serde_json::json!({"app_version": "1.0.0"}));
    }
}
